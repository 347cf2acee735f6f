use crate::document::Table;

/// Day vocabulary mapped onto the canonical range, Monday=0 … Sunday=6.
/// The source timetables carry both Arabic and English day names.
const DAY_NAMES: &[(&str, u8)] = &[
    ("الاثنين", 0),
    ("الثلاثاء", 1),
    ("الأربعاء", 2),
    ("الخميس", 3),
    ("الجمعة", 4),
    ("السبت", 5),
    ("الأحد", 6),
    ("monday", 0),
    ("tuesday", 1),
    ("wednesday", 2),
    ("thursday", 3),
    ("friday", 4),
    ("saturday", 5),
    ("sunday", 6),
];

/// English labels for reports, indexed by canonical day number.
pub const DAY_LABELS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Day headers sit in the top rows of the table.
const HEADER_SCAN_ROWS: usize = 3;

/// Resolve the day a page represents: first from the primary table's header
/// cells, then from the page's full text. `None` means the page carries no
/// recognizable day token at all.
pub fn resolve_day(table: Option<&Table>, page_text: &str) -> Option<u8> {
    if let Some(table) = table {
        for row in table.iter().take(HEADER_SCAN_ROWS) {
            for cell in row {
                if let Some(day) = cell.as_deref().and_then(match_day) {
                    return Some(day);
                }
            }
        }
    }
    match_day(page_text)
}

/// Case-insensitive substring match against the day vocabulary.
pub fn match_day(text: &str) -> Option<u8> {
    let lower = text.to_lowercase();
    DAY_NAMES
        .iter()
        .find(|(name, _)| lower.contains(name))
        .map(|&(_, day)| day)
}

pub fn label(day: u8) -> &'static str {
    DAY_LABELS.get(day as usize).copied().unwrap_or("?")
}

// ── Tests ──
