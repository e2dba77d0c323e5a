use std::collections::HashMap;

/// How far down a grid we look for the header row. Published workbooks bury
/// the table under varying amounts of preamble, but never this much.
const SCAN_WINDOW: usize = 160;

/// A row must have at least this many non-empty cells to qualify as a header.
const MIN_NONEMPTY_CELLS: usize = 5;

/// Score bonus when a row contains domain vocabulary.
const KEYWORD_BONUS: usize = 10;

/// Vocabulary that marks a header row across all three source layouts:
/// facility, total, age buckets (half and full width), accept/wait/enrolled.
const HEADER_KEYWORDS: &[&str] = &[
    "施設", "合計", "0歳", "０歳", "1歳", "１歳", "受入", "待ち", "児童",
];

/// Find the most likely header row within the first [`SCAN_WINDOW`] rows.
///
/// Each candidate is scored by its non-empty cell count, with a bonus when any
/// cell contains a domain keyword. Only rows with at least
/// [`MIN_NONEMPTY_CELLS`] non-empty cells qualify; the highest score wins and
/// ties go to the earliest row. Returns `None` when nothing qualifies —
/// callers must treat that as "no data extractable", not as row 0.
pub fn find_header_index(rows: &[Vec<String>]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None; // (index, score)

    for (i, row) in rows.iter().take(SCAN_WINDOW).enumerate() {
        let nonempty = row.iter().filter(|c| !c.trim().is_empty()).count();
        if nonempty < MIN_NONEMPTY_CELLS {
            continue;
        }
        let has_keyword = row
            .iter()
            .any(|c| HEADER_KEYWORDS.iter().any(|k| c.contains(k)));
        let score = nonempty + if has_keyword { KEYWORD_BONUS } else { 0 };

        // strict > keeps the earliest row on ties
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }

    best.map(|(i, _)| i)
}

/// Deduplicate a raw header row: blank labels become `col{i}` and repeated
/// labels are suffixed `_{n}`, so every label keys exactly one column.
pub fn sanitize_header(raw: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(raw.len());

    for (i, h) in raw.iter().enumerate() {
        let mut label = h.trim().to_string();
        if label.is_empty() {
            label = format!("col{i}");
        }
        match seen.get_mut(&label) {
            Some(n) => {
                *n += 1;
                out.push(format!("{label}_{n}"));
            }
            None => {
                seen.insert(label.clone(), 0);
                out.push(label);
            }
        }
    }

    out
}
