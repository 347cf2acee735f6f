use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// One extracted table: rows of optional cell text, row-major. A `None` cell
/// is a grid position the extractor could not fill (merged or empty cells).
pub type Table = Vec<Vec<Option<String>>>;

/// One page of a timetable document, as serialized by the upstream grid
/// extractor: the page's full text plus zero or more tables.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tables: Vec<Table>,
}

#[derive(Debug)]
pub struct Document {
    pub pages: Vec<Page>,
}

impl Document {
    /// Load a page-dump file: a JSON array of pages.
    pub fn load(path: &Path) -> Result<Document> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read document {}", path.display()))?;
        let pages: Vec<Page> = serde_json::from_str(&raw)
            .with_context(|| format!("parse document {}", path.display()))?;
        Ok(Document { pages })
    }
}

impl Page {
    /// Dimensions of the page's primary table, if any.
    pub fn primary_table_dims(&self) -> Option<(usize, usize)> {
        let table = self.tables.first()?;
        let cols = table.iter().map(Vec::len).max().unwrap_or(0);
        Some((table.len(), cols))
    }
}

// ── Tests ──
