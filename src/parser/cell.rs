/// Instructor sentinel for a cell whose text names a subject but no teacher.
pub const UNASSIGNED_TEACHER: &str = "Unknown";

/// Non-teaching intervals. Matched case-insensitively as substrings, both
/// forwards and character-reversed: the grid extractor reverses the text of
/// some cells adjacent to RTL runs ("assembly" arrives as "ylbmessa").
const FILLER_KEYWORDS: &[&str] = &[
    "assembly",
    "breakfast",
    "break",
    "lunch",
    "recess",
    "snack",
    "prayer",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellKind {
    /// A teaching session: subject plus instructor.
    Academic { subject: String, teacher: String },
    /// Break, assembly and similar non-teaching slots.
    Filler,
    /// Nothing usable in the cell.
    Empty,
}

/// Classify one grid cell. Rule order matters: filler keywords win over the
/// length check, and an academic subject line must be at least 2 characters.
pub fn classify(raw: Option<&str>) -> CellKind {
    let Some(text) = raw else {
        return CellKind::Empty;
    };
    let text = text.trim();
    if text.is_empty() {
        return CellKind::Empty;
    }

    let lower = text.to_lowercase();
    if FILLER_KEYWORDS
        .iter()
        .any(|kw| lower.contains(kw) || lower.contains(&reverse(kw)))
    {
        return CellKind::Filler;
    }

    if text.chars().count() < 2 {
        return CellKind::Empty;
    }

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(subject) = lines.next() else {
        return CellKind::Empty;
    };
    if subject.chars().count() < 2 {
        return CellKind::Empty;
    }

    let rest: Vec<&str> = lines.collect();
    let teacher = if rest.is_empty() {
        UNASSIGNED_TEACHER.to_string()
    } else {
        rest.join(" ")
    };

    CellKind::Academic {
        subject: subject.to_string(),
        teacher,
    }
}

fn reverse(s: &str) -> String {
    s.chars().rev().collect()
}

// ── Tests ──
