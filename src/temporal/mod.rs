// src/temporal/mod.rs
//
// Everything calendar-shaped: the canonical month label, recovery of that
// label from sheet titles / cell text / row metadata (era calendar included),
// fiscal-year hints, and the month-window arithmetic the batch runner uses.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::process::utils::normalize_digits;
use crate::process::{RawGrid, SheetData};

/// Reiwa 1 = 2019.
const REIWA_EPOCH: i32 = 2018;

/// How many rows / cells of a grid are scanned for date text when the sheet
/// title carries none.
const DATE_SCAN_ROWS: usize = 20;
const DATE_SCAN_COLS: usize = 10;

/// Metadata column names that carry a row-level "last updated" date.
const UPDATED_COLUMNS: &[&str] = &["更新日", "更新年月日", "更新日時", "更新年月"];

/// A calendar month, normalized to the first day (`YYYY-MM-01`).
///
/// Never guessed: resolvers hand back `None` instead of a fabricated label
/// when there is no textual evidence and no fiscal hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthLabel(NaiveDate);

impl MonthLabel {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(MonthLabel)
    }

    /// Floor an arbitrary date to its month.
    pub fn from_date(d: NaiveDate) -> Self {
        MonthLabel(NaiveDate::from_ymd_opt(d.year(), d.month(), 1).expect("day 1 always valid"))
    }

    /// Parse `YYYY-MM-DD` (or `YYYY/MM/DD`), flooring to day 1.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().replace('/', "-");
        NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .ok()
            .map(Self::from_date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }
}

impl fmt::Display for MonthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl Serialize for MonthLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MonthLabel::parse(&s).ok_or_else(|| de::Error::custom(format!("bad month label `{s}`")))
    }
}

static REIWA_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"令和\s*([0-9]+)\s*年\s*([0-9]+)\s*月\s*1\s*日").unwrap());
static GREGORIAN_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]{4})\s*年\s*([0-9]{1,2})\s*月\s*1\s*日").unwrap());
static MONTH_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]{1,2})\s*月\s*1\s*日").unwrap());
static REIWA_FISCAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"令和\s*([0-9]+)\s*年度").unwrap());
static GREGORIAN_FISCAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9]{4})\s*年度").unwrap());

/// Extract a month label from free text such as a sheet title.
///
/// Priority, first match wins: era full date (`令和６年４月１日`), Gregorian
/// full date (`2024年4月1日`), then month-only text (`４月１日`) combined with
/// the fiscal hint — months April and later fall in the hint year, January
/// through March in the year after (the fiscal year rolls over each April).
pub fn month_from_text(text: &str, fiscal_hint: Option<i32>) -> Option<MonthLabel> {
    if text.is_empty() {
        return None;
    }
    let t = normalize_digits(text);

    if let Some(c) = REIWA_DATE.captures(&t) {
        let ry: i32 = c[1].parse().ok()?;
        let month: u32 = c[2].parse().ok()?;
        return MonthLabel::new(REIWA_EPOCH + ry, month);
    }

    if let Some(c) = GREGORIAN_DATE.captures(&t) {
        let year: i32 = c[1].parse().ok()?;
        let month: u32 = c[2].parse().ok()?;
        return MonthLabel::new(year, month);
    }

    if let (Some(c), Some(base)) = (MONTH_ONLY.captures(&t), fiscal_hint) {
        let month: u32 = c[1].parse().ok()?;
        let year = if month >= 4 { base } else { base + 1 };
        return MonthLabel::new(year, month);
    }

    None
}

/// Extract a month from a normalized sheet: a dedicated "last updated"
/// metadata column wins; otherwise the first row's leading cells are scanned
/// as free text, in header order. Returns `None` rather than guessing.
pub fn month_from_rows(sheet: &SheetData, fiscal_hint: Option<i32>) -> Option<MonthLabel> {
    let first = sheet.rows.first()?;

    for key in UPDATED_COLUMNS {
        if let Some(v) = first.get(*key) {
            let v = v.trim();
            if !v.is_empty() {
                // 2026/02/01 and 2026-02-01 both appear in the wild
                let head: String = v.chars().take(10).collect();
                return MonthLabel::parse(&head);
            }
        }
    }

    let sample = sheet
        .header
        .iter()
        .take(DATE_SCAN_COLS)
        .filter_map(|label| first.get(label).cloned())
        .collect::<Vec<_>>()
        .join(" ");
    month_from_text(&sample, fiscal_hint)
}

/// Resolve the month for one sheet: title first, then a bounded scan of the
/// grid's leading cells, and finally the row-level metadata column — which,
/// being the most specific signal, overrides anything the title suggested.
pub fn resolve_month(
    grid: &RawGrid,
    sheet: &SheetData,
    fiscal_hint: Option<i32>,
) -> Option<MonthLabel> {
    let mut month = month_from_text(&grid.title, fiscal_hint);

    if month.is_none() {
        'scan: for row in grid.rows.iter().take(DATE_SCAN_ROWS) {
            for cell in row.iter().take(DATE_SCAN_COLS) {
                if let Some(m) = month_from_text(cell, fiscal_hint) {
                    month = Some(m);
                    break 'scan;
                }
            }
        }
    }

    if let Some(m) = month_from_rows(sheet, fiscal_hint) {
        month = Some(m);
    }

    month
}

/// Infer the fiscal base year from surrounding text such as `令和7年度` or
/// `2024年度`. Collaborators use this on link context before handing the hint
/// to [`month_from_text`].
pub fn fiscal_hint_from_context(text: &str) -> Option<i32> {
    if text.is_empty() {
        return None;
    }
    let t = normalize_digits(text);

    if let Some(c) = REIWA_FISCAL.captures(&t) {
        let ry: i32 = c[1].parse().ok()?;
        return Some(REIWA_EPOCH + ry);
    }
    if let Some(c) = GREGORIAN_FISCAL.captures(&t) {
        return c[1].parse().ok();
    }
    None
}

/// Shift a month label by `delta` months (may be negative).
pub fn add_months(m: MonthLabel, delta: i32) -> MonthLabel {
    let zero_based = m.year() * 12 + m.month() as i32 - 1 + delta;
    let year = zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    MonthLabel::new(year, month).expect("month arithmetic stays in range")
}

/// The `count` months ending at `end`, ascending — the "wanted" window the
/// batch runner reports against.
pub fn months_back_window(end: MonthLabel, count: u32) -> Vec<MonthLabel> {
    (0..count as i32)
        .rev()
        .map(|back| add_months(end, -back))
        .collect()
}
