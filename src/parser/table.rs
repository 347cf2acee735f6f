use std::collections::BTreeMap;

use crate::document::Table;
use crate::periods::PeriodCatalog;

/// Header detection only looks this deep into the table.
const HEADER_SCAN_ROWS: usize = 5;
/// A row qualifies as the period header once it names this many distinct
/// periods.
const MIN_PERIOD_MATCHES: usize = 3;

/// Location of the period-header row and the period → column mapping
/// recorded from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodHeader {
    pub row: usize,
    pub columns: BTreeMap<u8, usize>,
}

/// Scan the first rows of a table for the one carrying period numbers.
/// Returns `None` when no row names enough periods, which makes the page
/// unparseable for the caller.
pub fn locate_period_header(table: &Table, catalog: &PeriodCatalog) -> Option<PeriodHeader> {
    let period_ids: Vec<u8> = catalog.ids().collect();

    for (row_idx, row) in table.iter().take(HEADER_SCAN_ROWS).enumerate() {
        let mut columns: BTreeMap<u8, usize> = BTreeMap::new();
        for (col_idx, cell) in row.iter().enumerate() {
            let Some(text) = cell.as_deref() else { continue };
            if let Some(id) = match_period_token(text, &period_ids) {
                columns.entry(id).or_insert(col_idx);
            }
        }
        if columns.len() >= MIN_PERIOD_MATCHES {
            return Some(PeriodHeader {
                row: row_idx,
                columns,
            });
        }
    }
    None
}

/// Match a header cell against the known period ids: the bare numeral, the
/// numeral as a standalone line, or the phrase "period N". Ids are tried
/// longest-first so "period 10" never resolves to period 1.
fn match_period_token(text: &str, period_ids: &[u8]) -> Option<u8> {
    let trimmed = text.trim();
    let lower = text.to_lowercase();

    let mut ids: Vec<u8> = period_ids.to_vec();
    ids.sort_by_key(|id| std::cmp::Reverse(id.to_string().len()));

    for id in ids {
        let n = id.to_string();
        if trimmed == n
            || text.starts_with(&format!("{n}\n"))
            || text.contains(&format!("\n{n}\n"))
            || lower.contains(&format!("period {n}"))
        {
            return Some(id);
        }
    }
    None
}

// ── Tests ──
