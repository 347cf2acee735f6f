mod db;
mod document;
mod importer;
mod parser;
mod periods;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use document::Document;
use importer::ImportStats;
use parser::{day, ExtractOptions, ImportMode};
use periods::PeriodCatalog;

#[derive(Parser)]
#[command(name = "schedule_import", about = "School timetable extraction and import")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Dump the structure of a page-dump document
    Inspect {
        file: PathBuf,
        /// Max pages to show in detail
        #[arg(short = 'n', long, default_value = "3")]
        pages: usize,
    },
    /// Extract one document and import it into a floor
    Import {
        file: PathBuf,
        /// Target floor number
        #[arg(short, long)]
        floor: i64,
        #[arg(short, long, value_enum, default_value_t = ImportMode::Sparse)]
        mode: ImportMode,
        /// Delete the floor's existing schedules before importing
        #[arg(long)]
        clear: bool,
        /// Degraded fallback: use the page index as day-of-week
        #[arg(long)]
        guess_day_from_page: bool,
        /// JSON file replacing the built-in period catalog
        #[arg(long)]
        periods: Option<PathBuf>,
    },
    /// Import several floors in one run, given FLOOR=FILE pairs
    ImportAll {
        /// e.g. 2=dumps/floor2.json 3=dumps/floor3.json
        #[arg(required = true)]
        floors: Vec<String>,
        #[arg(short, long, value_enum, default_value_t = ImportMode::Complete)]
        mode: ImportMode,
        /// Delete each floor's existing schedules before importing it
        #[arg(long)]
        clear: bool,
        /// Degraded fallback: use the page index as day-of-week
        #[arg(long)]
        guess_day_from_page: bool,
        /// JSON file replacing the built-in period catalog
        #[arg(long)]
        periods: Option<PathBuf>,
    },
    /// Entity counts and per-floor schedule breakdown
    Verify,
    /// Report class days carrying fewer than the full set of periods
    Missing {
        /// JSON file replacing the built-in period catalog
        #[arg(long)]
        periods: Option<PathBuf>,
    },
    /// Record attendance for a schedule
    Attend {
        schedule_id: i64,
        #[arg(short, long, value_enum)]
        status: AttendanceStatus,
        /// Actual arrival time (HH:MM), used for Late
        #[arg(short, long)]
        time: Option<String>,
        /// Calendar date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Delete an entity by id (teachers/subjects in use are refused)
    Delete {
        #[arg(value_enum)]
        kind: EntityKind,
        id: i64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Late => "Late",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EntityKind {
    Floor,
    Class,
    Teacher,
    Subject,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            println!("Database schema ready.");
            Ok(())
        }
        Commands::Inspect { file, pages } => inspect(&file, pages),
        Commands::Import {
            file,
            floor,
            mode,
            clear,
            guess_day_from_page,
            periods,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let cfg = ImportConfig {
                mode,
                clear,
                guess_day_from_page,
                catalog: load_catalog(periods.as_deref())?,
            };
            println!("Importing {} into floor {}...", file.display(), floor);
            let stats = run_floor_import(&conn, &file, floor, &cfg)?;
            println!("\nImport summary (floor {}):", floor);
            stats.print();
            Ok(())
        }
        Commands::ImportAll {
            floors,
            mode,
            clear,
            guess_day_from_page,
            periods,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let cfg = ImportConfig {
                mode,
                clear,
                guess_day_from_page,
                catalog: load_catalog(periods.as_deref())?,
            };
            import_all(&conn, &floors, &cfg)
        }
        Commands::Verify => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            verify(&conn)
        }
        Commands::Missing { periods } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            missing(&conn, &load_catalog(periods.as_deref())?)
        }
        Commands::Attend {
            schedule_id,
            status,
            time,
            date,
            notes,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            attend(&conn, schedule_id, status, time.as_deref(), date, &notes)
        }
        Commands::Delete { kind, id } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            match kind {
                EntityKind::Floor => db::delete_floor(&conn, id)?,
                EntityKind::Class => db::delete_class(&conn, id)?,
                EntityKind::Teacher => db::delete_teacher(&conn, id)?,
                EntityKind::Subject => db::delete_subject(&conn, id)?,
            }
            println!("Deleted {:?} {}.", kind, id);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

struct ImportConfig {
    mode: ImportMode,
    clear: bool,
    guess_day_from_page: bool,
    catalog: PeriodCatalog,
}

fn load_catalog(path: Option<&Path>) -> Result<PeriodCatalog> {
    match path {
        Some(p) => PeriodCatalog::from_path(p),
        None => Ok(PeriodCatalog::default()),
    }
}

/// Extract every page of one document, then import the materialized entries
/// into the target floor. Extraction finishes before the first write.
fn run_floor_import(
    conn: &rusqlite::Connection,
    file: &Path,
    floor: i64,
    cfg: &ImportConfig,
) -> Result<ImportStats> {
    let doc = Document::load(file)?;
    info!("loaded {} pages from {}", doc.pages.len(), file.display());

    let opts = ExtractOptions {
        mode: cfg.mode,
        guess_day_from_page: cfg.guess_day_from_page,
    };

    let mut entries = Vec::new();
    let mut skipped_pages = 0usize;
    for (idx, page) in doc.pages.iter().enumerate() {
        match parser::process_page(page, idx, &opts, &cfg.catalog) {
            Ok(page_entries) => {
                info!("page {}: {} entries", idx + 1, page_entries.len());
                entries.extend(page_entries);
            }
            Err(skip) => {
                warn!("page {} skipped: {}", idx + 1, skip.describe());
                skipped_pages += 1;
            }
        }
    }
    if skipped_pages > 0 {
        println!(
            "{} of {} pages skipped as unparseable.",
            skipped_pages,
            doc.pages.len()
        );
    }
    if entries.is_empty() {
        warn!("no schedule entries extracted from {}", file.display());
    }

    importer::import_entries(conn, floor, &entries, cfg.clear)
}

/// Sequential multi-floor run. A failing floor is reported and the run
/// moves on; the final summary lists every unit's outcome.
fn import_all(conn: &rusqlite::Connection, specs: &[String], cfg: &ImportConfig) -> Result<()> {
    let mut units = Vec::with_capacity(specs.len());
    for spec in specs {
        units.push(parse_floor_spec(spec)?);
    }

    let mut results: Vec<(i64, PathBuf, Result<ImportStats>)> = Vec::new();
    for (floor, file) in units {
        println!("\n=== Floor {}: {} ===", floor, file.display());
        let outcome = run_floor_import(conn, &file, floor, cfg);
        if let Err(e) = &outcome {
            warn!("floor {} failed: {:#}", floor, e);
        }
        results.push((floor, file, outcome));
    }

    println!("\nPer-floor results:");
    let mut failures = 0usize;
    for (floor, file, outcome) in &results {
        match outcome {
            Ok(stats) => println!(
                "  floor {}: {} imported, {} duplicates, {} invalid, {} errors",
                floor, stats.imported, stats.skipped_duplicate, stats.skipped_invalid, stats.errors
            ),
            Err(e) => {
                failures += 1;
                println!("  floor {} ({}): FAILED: {:#}", floor, file.display(), e);
            }
        }
    }
    println!(
        "{} of {} floors imported successfully.",
        results.len() - failures,
        results.len()
    );
    Ok(())
}

fn parse_floor_spec(spec: &str) -> Result<(i64, PathBuf)> {
    let Some((floor, path)) = spec.split_once('=') else {
        bail!("bad floor spec {:?}, expected FLOOR=FILE", spec);
    };
    let floor: i64 = floor
        .trim()
        .parse()
        .with_context(|| format!("bad floor number in {:?}", spec))?;
    Ok((floor, PathBuf::from(path)))
}

fn inspect(file: &Path, max_pages: usize) -> Result<()> {
    let doc = Document::load(file)?;
    println!("{}: {} pages", file.display(), doc.pages.len());

    for (idx, page) in doc.pages.iter().take(max_pages).enumerate() {
        println!("\n--- Page {} ---", idx + 1);
        let preview: String = page.text.chars().take(300).collect();
        if preview.is_empty() {
            println!("(no text)");
        } else {
            println!("{}", preview);
            if page.text.chars().count() > 300 {
                println!("... ({} more characters)", page.text.chars().count() - 300);
            }
        }

        println!("Tables: {}", page.tables.len());
        if let Some((rows, cols)) = page.primary_table_dims() {
            println!("Primary table: {} rows x {} columns", rows, cols);
            for (r, row) in page.tables[0].iter().take(3).enumerate() {
                let cells: Vec<String> = row
                    .iter()
                    .map(|c| match c {
                        Some(text) => truncate(&text.replace('\n', "\\n"), 24),
                        None => "-".to_string(),
                    })
                    .collect();
                println!("  row {}: {}", r + 1, cells.join(" | "));
            }
        }
        match day::resolve_day(page.tables.first(), &page.text) {
            Some(d) => println!("Day: {}", day::label(d)),
            None => println!("Day: not detected"),
        }
    }

    if doc.pages.len() > max_pages {
        println!("\n... {} more pages", doc.pages.len() - max_pages);
    }
    Ok(())
}

fn verify(conn: &rusqlite::Connection) -> Result<()> {
    let counts = db::entity_counts(conn)?;
    println!("Floors:    {}", counts.floors);
    println!("Classes:   {}", counts.classes);
    println!("Teachers:  {}", counts.teachers);
    println!("Subjects:  {}", counts.subjects);
    println!("Schedules: {}", counts.schedules);

    for floor in db::floor_summaries(conn)? {
        let total: i64 = floor.classes.iter().map(|(_, n)| n).sum();
        println!(
            "\n{} (floor {}): {} classes, {} schedules",
            floor.name,
            floor.number,
            floor.classes.len(),
            total
        );
        for (class, n) in &floor.classes {
            println!("  {:<24} {} schedules", truncate(class, 24), n);
        }
    }

    println!("\nTeachers:");
    for (name, n) in db::teacher_usage(conn)? {
        println!("  {:<24} {} schedules", truncate(&name, 24), n);
    }

    println!("\nSubjects:");
    for (name, n) in db::subject_usage(conn)? {
        println!("  {:<24} {} schedules", truncate(&name, 24), n);
    }

    println!("\nSchedules per day:");
    let dist = db::day_distribution(conn)?;
    for (idx, label) in day::DAY_LABELS.iter().enumerate() {
        println!("  {:<10} {}", label, dist[idx]);
    }
    Ok(())
}

/// Flag every (class, day) carrying fewer periods than the catalog defines.
fn missing(conn: &rusqlite::Connection, catalog: &PeriodCatalog) -> Result<()> {
    let sessions = db::class_day_sessions(conn)?;
    if sessions.is_empty() {
        println!("No schedules in the database.");
        return Ok(());
    }

    let mut incomplete = 0usize;
    for group in &sessions {
        let present: Vec<u8> = group
            .start_times
            .iter()
            .filter_map(|s| periods::parse_hhmm(s))
            .filter_map(|t| catalog.period_for_start(t))
            .collect();
        if present.len() >= catalog.len() {
            continue;
        }
        incomplete += 1;
        let missing: Vec<String> = catalog
            .ids()
            .filter(|id| !present.contains(id))
            .map(|id| id.to_string())
            .collect();
        println!(
            "floor {} / {:<12} {:<10} {} periods, missing: {}",
            group.floor_number,
            truncate(&group.class_name, 12),
            day::label(group.day),
            present.len(),
            missing.join(", ")
        );
    }

    if incomplete == 0 {
        println!("Every class day carries all {} periods.", catalog.len());
    } else {
        println!("\n{} incomplete class days.", incomplete);
    }
    Ok(())
}

fn attend(
    conn: &rusqlite::Connection,
    schedule_id: i64,
    status: AttendanceStatus,
    time: Option<&str>,
    date: Option<String>,
    notes: &str,
) -> Result<()> {
    let Some(schedule) = db::schedule_ref(conn, schedule_id)? else {
        bail!("schedule {} not found", schedule_id);
    };

    let actual_time = match time {
        Some(raw) => Some(
            periods::parse_hhmm(raw)
                .with_context(|| format!("bad arrival time {:?}, expected HH:MM", raw))?,
        ),
        None => None,
    };
    let date = date.unwrap_or_else(|| chrono::Local::now().date_naive().to_string());

    let minutes_late =
        db::record_attendance(conn, &schedule, &date, status.as_str(), actual_time, notes)?;
    match minutes_late {
        Some(minutes) => println!(
            "Recorded {} for schedule {} on {} ({} minutes late).",
            status.as_str(),
            schedule_id,
            date,
            minutes
        ),
        None => println!(
            "Recorded {} for schedule {} on {}.",
            status.as_str(),
            schedule_id,
            date
        ),
    }

    let summary = db::daily_attendance_summary(conn, &date)?;
    println!(
        "{}: {} records ({} present, {} late, {} absent, {} minutes late in total)",
        date, summary.total, summary.present, summary.late, summary.absent, summary.total_minutes_late
    );
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
