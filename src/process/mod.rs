// src/process/mod.rs

pub mod utils;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::schema::header::sanitize_header;

/// How many consecutive fully-blank rows end data extraction. Sheets routinely
/// carry footnote blocks far below the table; this guard keeps them out.
const BLANK_ROW_STREAK_LIMIT: usize = 10;

/// One decoded worksheet, exactly as the external decoder produced it:
/// an ordered grid of cell text plus the sheet title when there is one.
/// Empty cells are empty strings. The engine never mutates a grid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawGrid {
    #[serde(default)]
    pub title: String,
    pub rows: Vec<Vec<String>>,
}

/// One data row, keyed by the sanitized header labels. Blank cells are kept as
/// empty strings (never missing keys) so downstream numeric coercion stays
/// uniform.
pub type SheetRow = HashMap<String, String>;

/// A normalized sheet: the sanitized header plus every surviving data row.
#[derive(Debug, Clone)]
pub struct SheetData {
    pub header: Vec<String>,
    pub rows: Vec<SheetRow>,
}

/// Cut a raw grid at `header_idx` and turn everything below it into keyed row
/// records.
///
/// Rows before the header are dropped. Fully blank rows are dropped, and a run
/// of ten of them ends extraction entirely. Partially blank rows keep their
/// blanks as empty strings.
pub fn normalize(grid: &RawGrid, header_idx: usize) -> SheetData {
    let raw_header = grid
        .rows
        .get(header_idx)
        .map(|r| r.as_slice())
        .unwrap_or(&[]);
    let header = sanitize_header(raw_header);

    let mut rows: Vec<SheetRow> = Vec::new();
    let mut blank_streak = 0usize;

    for raw in grid.rows.iter().skip(header_idx + 1) {
        if raw.iter().all(|c| c.trim().is_empty()) {
            blank_streak += 1;
            if blank_streak >= BLANK_ROW_STREAK_LIMIT {
                debug!(
                    rows = rows.len(),
                    "blank-row streak reached, stopping extraction"
                );
                break;
            }
            continue;
        }
        blank_streak = 0;

        let mut row = SheetRow::with_capacity(header.len());
        for (i, label) in header.iter().enumerate() {
            let cell = raw.get(i).cloned().unwrap_or_default();
            row.insert(label.clone(), cell);
        }
        rows.push(row);
    }

    SheetData { header, rows }
}
