use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::db;
use crate::parser::{day, RawEntry, FREE_SUBJECT, FREE_TEACHER};

/// Outcome counters for one import run. Every entry lands in exactly one of
/// imported / skipped_duplicate / skipped_invalid / errors.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub total: usize,
    pub imported: usize,
    pub academic: usize,
    pub free_periods: usize,
    pub skipped_duplicate: usize,
    pub skipped_invalid: usize,
    pub errors: usize,
    pub classes_created: usize,
    pub teachers_created: usize,
    pub subjects_created: usize,
}

impl ImportStats {
    pub fn print(&self) {
        println!("  Total processed:     {}", self.total);
        println!("  Imported:            {}", self.imported);
        println!("    academic sessions: {}", self.academic);
        println!("    free periods:      {}", self.free_periods);
        println!("  Skipped duplicates:  {}", self.skipped_duplicate);
        println!("  Skipped invalid:     {}", self.skipped_invalid);
        println!("  Errors:              {}", self.errors);
        println!(
            "  Created: {} classes, {} teachers, {} subjects",
            self.classes_created, self.teachers_created, self.subjects_created
        );
    }
}

enum Outcome {
    Imported,
    Duplicate,
}

struct CreatedEntities {
    class: bool,
    teacher: bool,
    subject: bool,
}

/// Import a batch of extracted entries into one floor. Additive and
/// idempotent unless `clear_existing` is set, in which case the floor's
/// schedules are dropped first in their own transaction (a failed clear
/// aborts the whole floor import; mixed old/new state is disallowed).
pub fn import_entries(
    conn: &Connection,
    floor_number: i64,
    entries: &[RawEntry],
    clear_existing: bool,
) -> Result<ImportStats> {
    let mut stats = ImportStats {
        total: entries.len(),
        ..Default::default()
    };

    let (floor_id, floor_created) = db::get_or_create_floor(conn, floor_number)
        .with_context(|| format!("resolve floor {floor_number}"))?;
    if floor_created {
        info!("created floor {}", floor_number);
    }

    if clear_existing {
        let tx = conn.unchecked_transaction()?;
        let removed = db::clear_floor_schedules(&tx, floor_id)?;
        tx.commit()
            .with_context(|| format!("clear existing schedules for floor {floor_number}"))?;
        info!("cleared {} existing schedules for floor {}", removed, floor_number);
    }

    // Sentinel entities are shared across floors; resolve them once, and
    // only for runs that actually carry free-period placeholders.
    let sentinels = if entries.iter().any(|e| e.is_free) {
        let (teacher, tc) = db::get_or_create_teacher(conn, FREE_TEACHER)?;
        let (subject, sc) = db::get_or_create_subject(conn, FREE_SUBJECT)?;
        stats.teachers_created += tc as usize;
        stats.subjects_created += sc as usize;
        Some((teacher, subject))
    } else {
        None
    };

    let pb = ProgressBar::new(entries.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap()
            .progress_chars("#>-"),
    );

    for entry in entries {
        pb.inc(1);

        if let Err(reason) = validate(entry) {
            warn!("skipping invalid entry for {:?}: {}", entry.class_name, reason);
            stats.skipped_invalid += 1;
            continue;
        }

        match import_one(conn, floor_id, entry, sentinels) {
            Ok((outcome, created)) => {
                stats.classes_created += created.class as usize;
                stats.teachers_created += created.teacher as usize;
                stats.subjects_created += created.subject as usize;
                match outcome {
                    Outcome::Imported => {
                        stats.imported += 1;
                        if entry.is_free {
                            stats.free_periods += 1;
                        } else {
                            stats.academic += 1;
                        }
                    }
                    Outcome::Duplicate => stats.skipped_duplicate += 1,
                }
            }
            Err(e) => {
                warn!(
                    "entry {} {} period {}: {:#}",
                    entry.class_name,
                    day::label(entry.day),
                    entry.period,
                    e
                );
                stats.errors += 1;
            }
        }
    }

    pb.finish_and_clear();
    Ok(stats)
}

/// Required-field and range checks. Invalid entries are counted, never
/// fatal.
fn validate(entry: &RawEntry) -> Result<(), &'static str> {
    if entry.class_name.trim().is_empty() {
        return Err("missing class name");
    }
    if entry.subject.trim().is_empty() {
        return Err("missing subject");
    }
    if entry.teacher.trim().is_empty() {
        return Err("missing teacher");
    }
    if entry.day > 6 {
        return Err("day of week out of range");
    }
    if entry.start >= entry.end {
        return Err("start time not before end time");
    }
    Ok(())
}

/// Resolve entities and insert (or skip) one entry. All writes share a
/// transaction, so a failure rolls back only this entry.
fn import_one(
    conn: &Connection,
    floor_id: i64,
    entry: &RawEntry,
    sentinels: Option<(i64, i64)>,
) -> Result<(Outcome, CreatedEntities)> {
    let tx = conn.unchecked_transaction()?;

    let (class_id, class_created) =
        db::get_or_create_class(&tx, entry.class_name.trim(), floor_id)?;

    let (teacher_id, teacher_created, subject_id, subject_created) = if entry.is_free {
        match sentinels {
            Some((teacher, subject)) => (teacher, false, subject, false),
            None => {
                let (teacher, tc) = db::get_or_create_teacher(&tx, FREE_TEACHER)?;
                let (subject, sc) = db::get_or_create_subject(&tx, FREE_SUBJECT)?;
                (teacher, tc, subject, sc)
            }
        }
    } else {
        let (teacher, tc) = db::get_or_create_teacher(&tx, entry.teacher.trim())?;
        let (subject, sc) = db::get_or_create_subject(&tx, entry.subject.trim())?;
        (teacher, tc, subject, sc)
    };

    let created = CreatedEntities {
        class: class_created,
        teacher: teacher_created,
        subject: subject_created,
    };

    let start = entry.start.format("%H:%M").to_string();
    let end = entry.end.format("%H:%M").to_string();

    if let Some(existing) = db::find_schedule(&tx, class_id, entry.day, &start, &end)? {
        // The natural key ignores teacher/subject: an existing row always
        // wins, so corrections re-imported for a taken slot are no-ops.
        if existing.teacher_id != teacher_id || existing.subject_id != subject_id {
            debug!(
                "slot {} {} {}-{} kept its existing assignment (schedule {})",
                entry.class_name,
                day::label(entry.day),
                start,
                end,
                existing.id
            );
        }
        tx.commit()?;
        return Ok((Outcome::Duplicate, created));
    }

    db::insert_schedule(&tx, class_id, teacher_id, subject_id, entry.day, &start, &end)?;
    tx.commit()?;
    Ok((Outcome::Imported, created))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periods::PeriodCatalog;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    fn entry(class: &str, day: u8, period: u8, subject: &str, teacher: &str) -> RawEntry {
        let (start, end) = PeriodCatalog::default().lookup(period).unwrap();
        RawEntry {
            class_name: class.to_string(),
            day,
            period,
            start,
            end,
            subject: subject.to_string(),
            teacher: teacher.to_string(),
            is_free: false,
        }
    }

    fn free_entry(class: &str, day: u8, period: u8) -> RawEntry {
        let mut e = entry(class, day, period, FREE_SUBJECT, FREE_TEACHER);
        e.is_free = true;
        e
    }

    #[test]
    fn import_is_idempotent() {
        let conn = test_conn();
        let entries = vec![
            entry("5A", 0, 1, "Math", "Mr. Ali"),
            entry("5A", 0, 2, "Science", "Ms. Sara"),
            entry("5B", 0, 1, "English", "Mr. Omar"),
        ];

        let first = import_entries(&conn, 2, &entries, false).unwrap();
        assert_eq!(first.imported, 3);
        assert_eq!(first.skipped_duplicate, 0);
        assert_eq!(first.classes_created, 2);
        assert_eq!(first.teachers_created, 3);

        let second = import_entries(&conn, 2, &entries, false).unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped_duplicate, 3);
        assert_eq!(second.classes_created, 0);
        assert_eq!(second.teachers_created, 0);
        assert_eq!(db::entity_counts(&conn).unwrap().schedules, 3);
    }

    #[test]
    fn one_invalid_entry_never_blocks_the_rest() {
        let conn = test_conn();
        let mut entries: Vec<RawEntry> = (1..=9)
            .map(|p| entry("5A", 0, p, "Math", "Mr. Ali"))
            .collect();
        entries.insert(4, entry("5A", 0, 10, "", "Mr. Ali"));

        let stats = import_entries(&conn, 2, &entries, false).unwrap();
        assert_eq!(stats.total, 10);
        assert_eq!(stats.imported, 9);
        assert_eq!(stats.skipped_invalid, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(db::entity_counts(&conn).unwrap().schedules, 9);
    }

    #[test]
    fn out_of_range_day_is_invalid() {
        let conn = test_conn();
        let stats =
            import_entries(&conn, 2, &[entry("5A", 7, 1, "Math", "Mr. Ali")], false).unwrap();
        assert_eq!(stats.skipped_invalid, 1);
        assert_eq!(stats.imported, 0);
    }

    #[test]
    fn reimported_correction_keeps_existing_row() {
        let conn = test_conn();
        import_entries(&conn, 2, &[entry("5A", 0, 1, "Math", "Mr. Ali")], false).unwrap();

        let stats =
            import_entries(&conn, 2, &[entry("5A", 0, 1, "Math", "Mr. Hassan")], false).unwrap();
        assert_eq!(stats.skipped_duplicate, 1);

        let (floor, _) = db::get_or_create_floor(&conn, 2).unwrap();
        let (class, _) = db::get_or_create_class(&conn, "5A", floor).unwrap();
        let existing = db::find_schedule(&conn, class, 0, "08:30", "09:05")
            .unwrap()
            .unwrap();
        let (ali, _) = db::get_or_create_teacher(&conn, "Mr. Ali").unwrap();
        assert_eq!(existing.teacher_id, ali);
    }

    #[test]
    fn sentinels_shared_across_floors() {
        let conn = test_conn();
        let a = import_entries(&conn, 2, &[free_entry("5A", 0, 1)], false).unwrap();
        let b = import_entries(&conn, 3, &[free_entry("7C", 0, 1)], false).unwrap();
        assert_eq!(a.free_periods, 1);
        assert_eq!(b.free_periods, 1);
        // Only one sentinel teacher/subject exists in total.
        let teachers: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM teachers WHERE name = ?1",
                [FREE_TEACHER],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(teachers, 1);
        assert_eq!(a.teachers_created, 1);
        assert_eq!(b.teachers_created, 0);
    }

    #[test]
    fn sparse_runs_never_create_sentinels() {
        let conn = test_conn();
        import_entries(&conn, 2, &[entry("5A", 0, 1, "Math", "Mr. Ali")], false).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM teachers WHERE name = ?1",
                [FREE_TEACHER],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn clear_existing_replaces_floor_schedules() {
        let conn = test_conn();
        import_entries(
            &conn,
            2,
            &[
                entry("5A", 0, 1, "Math", "Mr. Ali"),
                entry("5A", 0, 2, "Science", "Ms. Sara"),
            ],
            false,
        )
        .unwrap();
        // Another floor's rows must survive the clear.
        import_entries(&conn, 3, &[entry("7C", 0, 1, "Art", "Mr. Omar")], false).unwrap();

        let stats =
            import_entries(&conn, 2, &[entry("5A", 1, 1, "Math", "Mr. Ali")], true).unwrap();
        assert_eq!(stats.imported, 1);

        let counts = db::entity_counts(&conn).unwrap();
        assert_eq!(counts.schedules, 2);
        let (floor3, _) = db::get_or_create_floor(&conn, 3).unwrap();
        let (class7c, _) = db::get_or_create_class(&conn, "7C", floor3).unwrap();
        assert!(db::find_schedule(&conn, class7c, 0, "08:30", "09:05")
            .unwrap()
            .is_some());
    }

    #[test]
    fn interval_matches_catalog_for_all_rows() {
        let conn = test_conn();
        let entries: Vec<RawEntry> = (1..=10)
            .map(|p| entry("5A", 2, p, "Math", "Mr. Ali"))
            .collect();
        import_entries(&conn, 2, &entries, false).unwrap();

        let catalog = PeriodCatalog::default();
        let mut stmt = conn
            .prepare("SELECT start_time, end_time FROM schedules")
            .unwrap();
        let rows: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 10);
        for (start, end) in rows {
            let s = crate::periods::parse_hhmm(&start).unwrap();
            let e = crate::periods::parse_hhmm(&end).unwrap();
            assert!(s < e);
            let period = catalog.period_for_start(s).unwrap();
            assert_eq!(catalog.lookup(period), Some((s, e)));
        }
    }
}
