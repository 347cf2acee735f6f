use std::path::Path;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use regex::Regex;
use serde::Deserialize;

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[:.](\d{2})$").unwrap());

/// Built-in daily timetable: ten ordered periods from first bell to last.
const DEFAULT_PERIODS: &[(u8, &str, &str)] = &[
    (1, "08:30", "09:05"),
    (2, "09:05", "09:40"),
    (3, "09:40", "10:20"),
    (4, "10:20", "11:00"),
    (5, "11:00", "11:40"),
    (6, "11:40", "12:20"),
    (7, "12:20", "13:00"),
    (8, "13:00", "13:40"),
    (9, "13:40", "14:15"),
    (10, "14:15", "14:50"),
];

static DEFAULT_SLOTS: LazyLock<Vec<PeriodSlot>> = LazyLock::new(|| {
    DEFAULT_PERIODS
        .iter()
        .map(|&(id, start, end)| PeriodSlot {
            id,
            start: parse_hhmm(start).unwrap(),
            end: parse_hhmm(end).unwrap(),
        })
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSlot {
    pub id: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Fixed mapping from period id to its wall-clock interval. Loaded once per
/// run; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PeriodCatalog {
    slots: Vec<PeriodSlot>,
}

#[derive(Deserialize)]
struct PeriodFileEntry {
    period: u8,
    start: String,
    end: String,
}

impl Default for PeriodCatalog {
    fn default() -> Self {
        PeriodCatalog {
            slots: DEFAULT_SLOTS.clone(),
        }
    }
}

impl PeriodCatalog {
    /// Load a replacement catalog from a JSON file: `[{"period": 1, "start":
    /// "08:30", "end": "09:05"}, ...]`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read period catalog {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: Vec<PeriodFileEntry> =
            serde_json::from_str(raw).context("parse period catalog JSON")?;
        let mut slots = Vec::with_capacity(entries.len());
        for e in &entries {
            let start = parse_hhmm(&e.start)
                .with_context(|| format!("period {}: bad start time {:?}", e.period, e.start))?;
            let end = parse_hhmm(&e.end)
                .with_context(|| format!("period {}: bad end time {:?}", e.period, e.end))?;
            slots.push(PeriodSlot {
                id: e.period,
                start,
                end,
            });
        }
        validate(&slots)?;
        Ok(PeriodCatalog { slots })
    }

    pub fn lookup(&self, period_id: u8) -> Option<(NaiveTime, NaiveTime)> {
        self.slots
            .iter()
            .find(|s| s.id == period_id)
            .map(|s| (s.start, s.end))
    }

    /// Reverse lookup, used by the missing-period report: which period starts
    /// at this time.
    pub fn period_for_start(&self, start: NaiveTime) -> Option<u8> {
        self.slots.iter().find(|s| s.start == start).map(|s| s.id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.slots.iter().map(|s| s.id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

fn validate(slots: &[PeriodSlot]) -> Result<()> {
    if slots.is_empty() {
        bail!("period catalog is empty");
    }
    for s in slots {
        if s.start >= s.end {
            bail!("period {}: start {} is not before end {}", s.id, s.start, s.end);
        }
    }
    for pair in slots.windows(2) {
        if pair[1].id <= pair[0].id {
            bail!("period ids must be ascending: {} after {}", pair[1].id, pair[0].id);
        }
        if pair[1].start < pair[0].end {
            bail!("period {} overlaps period {}", pair[1].id, pair[0].id);
        }
    }
    Ok(())
}

/// Parse "HH:MM" (also tolerates "HH.MM") into a NaiveTime.
pub fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    let caps = TIME_RE.captures(raw.trim())?;
    let h: u32 = caps[1].parse().ok()?;
    let m: u32 = caps[2].parse().ok()?;
    NaiveTime::from_hms_opt(h, m, 0)
}

// ── Tests ──
