use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::errors::SchemaError;
use crate::process::utils::normalize_digits;
use crate::process::SheetRow;

/// Semantic fields the engine needs out of a sheet. Only the facility id is
/// mandatory — it is the join key across the three sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    FacilityId,
    Name,
    Ward,
    Total,
    Age(u8),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::FacilityId => write!(f, "facility_id"),
            Field::Name => write!(f, "name"),
            Field::Ward => write!(f, "ward"),
            Field::Total => write!(f, "total"),
            Field::Age(n) => write!(f, "age_{n}"),
        }
    }
}

/// Which strategy produced a column binding. Ordered from strongest to
/// weakest evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Exact,
    Pattern,
    Statistical,
}

#[derive(Debug, Clone)]
pub struct ResolvedColumn {
    pub label: String,
    pub confidence: Confidence,
}

/// Mapping from semantic field to the header label that carries it in one
/// particular grid. Labels come from the sanitized header, so each maps to
/// exactly one column.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    columns: HashMap<Field, ResolvedColumn>,
}

impl ColumnMap {
    pub fn label(&self, field: Field) -> Option<&str> {
        self.columns.get(&field).map(|c| c.label.as_str())
    }

    pub fn confidence(&self, field: Field) -> Option<Confidence> {
        self.columns.get(&field).map(|c| c.confidence)
    }

    pub fn get(&self, field: Field) -> Option<&ResolvedColumn> {
        self.columns.get(&field)
    }
}

/// Curated synonym and fragment tables, injected rather than global so tests
/// can substitute fixtures. Defaults mirror the label drift observed across
/// a decade of published workbooks.
#[derive(Debug, Clone)]
pub struct ColumnSynonyms {
    pub facility_id: Vec<String>,
    pub facility_id_fragments: Vec<String>,
    pub facility_id_context: Vec<String>,
    pub name: Vec<String>,
    pub ward: Vec<String>,
    pub total: Vec<String>,
    pub total_fragments: Vec<String>,
}

impl Default for ColumnSynonyms {
    fn default() -> Self {
        let v = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        Self {
            facility_id: v(&[
                "施設番号",
                "施設・事業所番号",
                "施設事業所番号",
                "事業所番号",
                "施設ID",
                "施設ＩＤ",
                "施設・事業所ID",
                "施設・事業所ＩＤ",
                "施設No",
                "施設Ｎｏ",
                "事業所No",
                "事業所Ｎｏ",
            ]),
            facility_id_fragments: v(&["番号", "ID", "ＩＤ", "No", "Ｎｏ", "NO", "ＮＯ"]),
            facility_id_context: v(&["施設", "事業所"]),
            name: v(&["施設名", "施設・事業名", "施設・事業所名", "事業名"]),
            ward: v(&["施設所在区", "所在区", "区名"]),
            total: v(&["合計"]),
            total_fragments: v(&["合計", "入所可能人数", "入所待ち人数", "入所児童数"]),
        }
    }
}

/// Sample size for the statistical facility-id fallback.
const ID_SAMPLE_ROWS: usize = 200;
/// Minimum absolute hits for the fallback to bind.
const ID_MIN_MATCHES: usize = 10;
/// Minimum fraction of the sample that must look like an id.
const ID_MIN_MATCH_RATE: f64 = 0.30;

static LONG_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4,}$").unwrap());

/// Resolve every semantic field against a sanitized header.
///
/// Strategies run in priority order per field: exact synonym, then label
/// fragments, then (for the facility id only) a statistical scan of sampled
/// cell values. A missing facility id fails resolution; every other field
/// simply stays absent.
pub fn resolve(
    grid_name: &str,
    header: &[String],
    sample: &[SheetRow],
    syn: &ColumnSynonyms,
) -> Result<ColumnMap, SchemaError> {
    let mut columns = HashMap::new();

    let facility_id = exact_match(header, &syn.facility_id)
        .or_else(|| fragment_with_context(header, &syn.facility_id_fragments, &syn.facility_id_context))
        .or_else(|| digit_column(header, sample))
        .ok_or_else(|| SchemaError::NoFacilityIdColumn {
            grid: grid_name.to_string(),
        })?;
    debug!(
        grid = grid_name,
        label = %facility_id.label,
        confidence = ?facility_id.confidence,
        "resolved facility id column"
    );
    let id_label = facility_id.label.clone();
    columns.insert(Field::FacilityId, facility_id);

    // The name fragment pass would happily bind 施設番号, so the claimed id
    // column is excluded from everything below.
    if let Some(c) = exact_match(header, &syn.name).or_else(|| {
        fragment_match(header, &["施設".to_string()], |label| {
            label != id_label && !label.contains('区')
        })
    }) {
        columns.insert(Field::Name, c);
    }

    if let Some(c) = exact_match(header, &syn.ward)
        .or_else(|| fragment_match(header, &["区".to_string()], |label| label != id_label))
    {
        columns.insert(Field::Ward, c);
    }

    if let Some(c) = exact_match(header, &syn.total)
        .or_else(|| fragment_match(header, &syn.total_fragments, |label| label != id_label))
    {
        columns.insert(Field::Total, c);
    }

    for age in 0u8..=5 {
        let exact: Vec<String> = age_labels(age);
        if let Some(c) = exact_match(header, &exact)
            .or_else(|| fragment_match(header, &exact, |label| label != id_label))
        {
            columns.insert(Field::Age(age), c);
        }
    }

    Ok(ColumnMap { columns })
}

/// Exact and fragment label variants for one age bucket, half and full width.
pub fn age_labels(age: u8) -> Vec<String> {
    let zenkaku = ['０', '１', '２', '３', '４', '５'][age as usize];
    vec![
        format!("{age}歳児"),
        format!("{age}歳"),
        format!("{zenkaku}歳児"),
        format!("{zenkaku}歳"),
    ]
}

fn exact_match(header: &[String], candidates: &[String]) -> Option<ResolvedColumn> {
    for cand in candidates {
        if let Some(label) = header.iter().find(|h| *h == cand) {
            return Some(ResolvedColumn {
                label: label.clone(),
                confidence: Confidence::Exact,
            });
        }
    }
    None
}

fn fragment_match(
    header: &[String],
    fragments: &[String],
    keep: impl Fn(&str) -> bool,
) -> Option<ResolvedColumn> {
    header
        .iter()
        .find(|h| keep(h) && fragments.iter().any(|f| h.contains(f.as_str())))
        .map(|label| ResolvedColumn {
            label: label.clone(),
            confidence: Confidence::Pattern,
        })
}

/// Fragment match that additionally requires a context word (施設/事業所) in
/// the label, so a lone 番号 column elsewhere in the sheet cannot bind.
fn fragment_with_context(
    header: &[String],
    fragments: &[String],
    context: &[String],
) -> Option<ResolvedColumn> {
    header
        .iter()
        .find(|h| {
            fragments.iter().any(|f| h.contains(f.as_str()))
                && context.iter().any(|c| h.contains(c.as_str()))
        })
        .map(|label| ResolvedColumn {
            label: label.clone(),
            confidence: Confidence::Pattern,
        })
}

/// Statistical fallback for the facility id: the column whose sampled values
/// most consistently look like a long digit string. Binds only above both an
/// absolute and a relative threshold.
fn digit_column(header: &[String], sample: &[SheetRow]) -> Option<ResolvedColumn> {
    let n = sample.len().min(ID_SAMPLE_ROWS);
    if n == 0 {
        return None;
    }

    let mut best: Option<(&String, usize)> = None;
    for label in header {
        let hits = sample[..n]
            .iter()
            .filter(|row| {
                row.get(label)
                    .map(|v| LONG_DIGITS.is_match(&normalize_digits(v.trim())))
                    .unwrap_or(false)
            })
            .count();
        if best.map_or(true, |(_, b)| hits > b) {
            best = Some((label, hits));
        }
    }

    let (label, hits) = best?;
    let floor = ID_MIN_MATCHES.max((n as f64 * ID_MIN_MATCH_RATE) as usize);
    if hits >= floor {
        Some(ResolvedColumn {
            label: label.clone(),
            confidence: Confidence::Statistical,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn rows_with(label: &str, values: &[&str]) -> Vec<SheetRow> {
        values
            .iter()
            .map(|v| {
                let mut row = SheetRow::new();
                row.insert(label.to_string(), v.to_string());
                row.insert("備考".to_string(), "メモ".to_string());
                row
            })
            .collect()
    }

    #[test]
    fn exact_synonym_wins() {
        let h = header(&["施設番号", "施設名", "施設所在区", "合計", "0歳児"]);
        let map = resolve("accept", &h, &[], &ColumnSynonyms::default()).unwrap();
        assert_eq!(map.label(Field::FacilityId), Some("施設番号"));
        assert_eq!(map.confidence(Field::FacilityId), Some(Confidence::Exact));
        assert_eq!(map.label(Field::Name), Some("施設名"));
        assert_eq!(map.label(Field::Ward), Some("施設所在区"));
        assert_eq!(map.label(Field::Total), Some("合計"));
        assert_eq!(map.label(Field::Age(0)), Some("0歳児"));
    }

    #[test]
    fn fragment_fallback_binds_drifted_labels() {
        let h = header(&["施設のＮｏ", "施設・事業名", "所在の区", "合計_受入可能"]);
        let map = resolve("accept", &h, &[], &ColumnSynonyms::default()).unwrap();
        assert_eq!(map.label(Field::FacilityId), Some("施設のＮｏ"));
        assert_eq!(
            map.confidence(Field::FacilityId),
            Some(Confidence::Pattern)
        );
        assert_eq!(map.label(Field::Total), Some("合計_受入可能"));
        assert_eq!(map.confidence(Field::Total), Some(Confidence::Pattern));
    }

    #[test]
    fn statistical_fallback_needs_enough_hits() {
        let h = header(&["col0", "備考"]);
        let values: Vec<&str> = vec!["14100123"; 12];
        let sample = rows_with("col0", &values);
        let map = resolve("accept", &h, &sample, &ColumnSynonyms::default()).unwrap();
        assert_eq!(map.label(Field::FacilityId), Some("col0"));
        assert_eq!(
            map.confidence(Field::FacilityId),
            Some(Confidence::Statistical)
        );

        // below the absolute floor of 10 the fallback must not bind
        let small = rows_with("col0", &["14100123"; 5]);
        let err = resolve("accept", &h, &small, &ColumnSynonyms::default()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::NoFacilityIdColumn {
                grid: "accept".into()
            }
        );
    }

    #[test]
    fn fullwidth_ids_count_for_statistics() {
        let h = header(&["col0", "備考"]);
        let values: Vec<&str> = vec!["１４１００１２３"; 12];
        let sample = rows_with("col0", &values);
        let map = resolve("accept", &h, &sample, &ColumnSynonyms::default()).unwrap();
        assert_eq!(map.label(Field::FacilityId), Some("col0"));
    }

    #[test]
    fn optional_fields_degrade_to_absent() {
        let h = header(&["施設番号", "合計"]);
        let map = resolve("wait", &h, &[], &ColumnSynonyms::default()).unwrap();
        assert_eq!(map.label(Field::Name), None);
        assert_eq!(map.label(Field::Ward), None);
    }

    #[test]
    fn name_fragment_never_steals_the_id_column() {
        let h = header(&["施設番号", "合計"]);
        let map = resolve("accept", &h, &[], &ColumnSynonyms::default()).unwrap();
        // 施設番号 contains 施設 but is already claimed as the id
        assert_eq!(map.label(Field::Name), None);
    }

    #[test]
    fn missing_id_is_an_error() {
        let h = header(&["名前", "合計"]);
        let err = resolve("accept", &h, &[], &ColumnSynonyms::default()).unwrap_err();
        assert!(matches!(err, SchemaError::NoFacilityIdColumn { .. }));
    }
}
