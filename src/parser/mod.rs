pub mod cell;
pub mod day;
pub mod table;

use chrono::NaiveTime;
use clap::ValueEnum;
use tracing::warn;

use crate::document::Page;
use crate::periods::PeriodCatalog;
use cell::CellKind;

/// Sentinel subject/teacher pair for unfilled slots in complete mode.
pub const FREE_SUBJECT: &str = "Free Period";
pub const FREE_TEACHER: &str = "No Teacher";

/// First-column labels that belong to the grid itself, not to a class.
const NON_CLASS_LABELS: &[&str] = &["class", "total"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImportMode {
    /// Emit only periods with recognizable academic content
    Sparse,
    /// Emit every catalog period per class, free-period placeholders included
    Complete,
}

/// One extracted (class, period) slot, ready for the import engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub class_name: String,
    pub day: u8,
    pub period: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub subject: String,
    pub teacher: String,
    pub is_free: bool,
}

/// Why a page contributed nothing. Never fatal for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSkip {
    NoTable,
    NoDay,
    NoPeriodColumns,
}

impl PageSkip {
    pub fn describe(self) -> &'static str {
        match self {
            PageSkip::NoTable => "no table",
            PageSkip::NoDay => "no recognizable day",
            PageSkip::NoPeriodColumns => "no period columns",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub mode: ImportMode,
    /// Degraded fallback: use the page index as day-of-week for the first
    /// seven pages when no day token is found anywhere on the page.
    pub guess_day_from_page: bool,
}

/// Walk one page's primary table and produce its schedule entries, ordered
/// by class row then period id.
pub fn process_page(
    page: &Page,
    page_index: usize,
    opts: &ExtractOptions,
    catalog: &PeriodCatalog,
) -> Result<Vec<RawEntry>, PageSkip> {
    let Some(table) = page.tables.first() else {
        return Err(PageSkip::NoTable);
    };

    let day = match day::resolve_day(Some(table), &page.text) {
        Some(d) => d,
        None if opts.guess_day_from_page && page_index < 7 => {
            warn!(
                "page {}: no day token, using page index as {} (degraded fallback)",
                page_index + 1,
                day::label(page_index as u8)
            );
            page_index as u8
        }
        None => return Err(PageSkip::NoDay),
    };

    let Some(header) = table::locate_period_header(table, catalog) else {
        return Err(PageSkip::NoPeriodColumns);
    };

    let mut entries = Vec::new();
    for row in table.iter().skip(header.row + 1) {
        let Some(class_name) = class_row_name(row) else {
            continue;
        };
        match opts.mode {
            ImportMode::Sparse => emit_sparse(&class_name, day, row, &header, catalog, &mut entries),
            ImportMode::Complete => {
                emit_complete(&class_name, day, row, &header, catalog, &mut entries)
            }
        }
    }
    Ok(entries)
}

/// A candidate class row names the class in its first column: non-empty,
/// at least 2 characters, and not a grid label.
fn class_row_name(row: &[Option<String>]) -> Option<String> {
    let name = row.first()?.as_deref()?.trim();
    if name.chars().count() < 2 {
        return None;
    }
    if NON_CLASS_LABELS.iter().any(|l| name.eq_ignore_ascii_case(l)) {
        return None;
    }
    Some(name.to_string())
}

fn emit_sparse(
    class_name: &str,
    day: u8,
    row: &[Option<String>],
    header: &table::PeriodHeader,
    catalog: &PeriodCatalog,
    entries: &mut Vec<RawEntry>,
) {
    for (&period, &col) in &header.columns {
        let Some((start, end)) = catalog.lookup(period) else {
            continue;
        };
        let raw = row.get(col).and_then(|c| c.as_deref());
        if let CellKind::Academic { subject, teacher } = cell::classify(raw) {
            entries.push(RawEntry {
                class_name: class_name.to_string(),
                day,
                period,
                start,
                end,
                subject,
                teacher,
                is_free: false,
            });
        }
    }
}

/// Complete mode guarantees one entry per catalog period for every class
/// row, free-period placeholders filling the gaps.
fn emit_complete(
    class_name: &str,
    day: u8,
    row: &[Option<String>],
    header: &table::PeriodHeader,
    catalog: &PeriodCatalog,
    entries: &mut Vec<RawEntry>,
) {
    for period in catalog.ids() {
        let Some((start, end)) = catalog.lookup(period) else {
            continue;
        };
        let raw = header
            .columns
            .get(&period)
            .and_then(|&col| row.get(col))
            .and_then(|c| c.as_deref());

        let (subject, teacher, is_free) = match cell::classify(raw) {
            CellKind::Academic { subject, teacher } => (subject, teacher, false),
            CellKind::Filler | CellKind::Empty => {
                (FREE_SUBJECT.to_string(), FREE_TEACHER.to_string(), true)
            }
        };

        entries.push(RawEntry {
            class_name: class_name.to_string(),
            day,
            period,
            start,
            end,
            subject,
            teacher,
            is_free,
        });
    }
}

// ── Tests ──
