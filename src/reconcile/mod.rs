// src/reconcile/mod.rs
//
// Merges the three independently-shaped monthly datasets (accept / wait /
// enrolled) into per-facility records. The accept sheet is authoritative for
// which facilities exist in a month; wait and enrolled only ever contribute
// numbers to facilities the accept sheet already names.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::errors::SchemaError;
use crate::process::utils::{coerce_count, norm_cell};
use crate::process::{self, RawGrid, SheetData, SheetRow};
use crate::schema::columns::{self, age_labels, ColumnMap, ColumnSynonyms, Field};
use crate::schema::header::find_header_index;
use crate::temporal::{self, MonthLabel};

/// The four observed/derived counts for one scope (facility total or one age
/// bucket). `capacity_est` is derived from `enrolled + accept` and must never
/// be read as authoritative capacity; every field is absent rather than zero
/// when the inputs do not support it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accept: Option<i64>,
    pub wait: Option<i64>,
    pub enrolled: Option<i64>,
    pub capacity_est: Option<i64>,
    pub wait_per_capacity_est: Option<f64>,
}

impl Metrics {
    pub fn from_counts(accept: Option<i64>, wait: Option<i64>, enrolled: Option<i64>) -> Self {
        let capacity_est = match (enrolled, accept) {
            (Some(e), Some(a)) => Some(e + a),
            _ => None,
        };
        Metrics {
            accept,
            wait,
            enrolled,
            capacity_est,
            wait_per_capacity_est: ratio_opt(wait, capacity_est),
        }
    }
}

/// `wait / capacity_est`, defined only when both operands are present and the
/// estimate is positive. Never raises, never yields a fabricated zero.
pub fn ratio_opt(wait: Option<i64>, capacity_est: Option<i64>) -> Option<f64> {
    match (wait, capacity_est) {
        (Some(w), Some(c)) if c > 0 => Some(w as f64 / c as f64),
        _ => None,
    }
}

/// Sum with absorbing-identity semantics: only present values contribute, and
/// an all-absent input sums to absent, not zero.
pub fn sum_present(values: &[Option<i64>]) -> Option<i64> {
    let present: Vec<i64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum())
    }
}

/// Strict sum: any absent input makes the whole sum absent.
pub fn sum_strict(values: &[Option<i64>]) -> Option<i64> {
    values.iter().copied().sum::<Option<i64>>()
}

/// One facility for one month. Identity is `(id, updated)`. Registry-sourced
/// fields start empty and are filled by the enrichment overlay afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacilityRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub name_kana: String,
    pub ward: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub lat: String,
    #[serde(default)]
    pub lng: String,
    #[serde(default)]
    pub map_url: String,
    #[serde(default)]
    pub facility_type: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub nearest_station: String,
    #[serde(default)]
    pub station_kana: String,
    #[serde(default)]
    pub walk_minutes: Option<String>,
    pub updated: Option<MonthLabel>,
    pub totals: Metrics,
    pub age_groups: BTreeMap<String, Metrics>,
    pub ages_0_5: BTreeMap<String, Metrics>,
}

/// Knobs for one reconciliation pass. The ward scope mirrors the published
/// data: ward cells sometimes carry the city prefix, which is stripped before
/// comparison.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub ward_filter: Option<String>,
    pub city_prefix: String,
    pub synonyms: ColumnSynonyms,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            ward_filter: None,
            city_prefix: "横浜市".to_string(),
            synonyms: ColumnSynonyms::default(),
        }
    }
}

/// Extract the facility total from a row: the exact 合計 label first, then
/// any label containing it. Blank cells are skipped so a labelled-but-empty
/// column cannot shadow a populated one.
pub fn get_total(row: &SheetRow) -> Option<i64> {
    if let Some(v) = row.get("合計") {
        if !v.trim().is_empty() {
            return coerce_count(v);
        }
    }
    let mut keys: Vec<&String> = row.keys().collect();
    keys.sort();
    for k in keys {
        if k.contains("合計") && !row[k].trim().is_empty() {
            return coerce_count(&row[k]);
        }
    }
    None
}

/// Extract one age bucket's value: exact `N歳児`/`N歳` (half or full width)
/// first, then any label containing one of those fragments.
pub fn get_age_value(row: &SheetRow, age: u8) -> Option<i64> {
    let patterns = age_labels(age);

    for p in &patterns {
        if let Some(v) = row.get(p) {
            if !v.trim().is_empty() {
                return coerce_count(v);
            }
        }
    }

    let mut keys: Vec<&String> = row.keys().collect();
    keys.sort();
    for k in keys {
        if patterns.iter().any(|p| k.contains(p.as_str())) && !row[k].trim().is_empty() {
            return coerce_count(&row[k]);
        }
    }
    None
}

/// Build the per-age detail (`ages_0_5`) and the synthesized buckets
/// (`age_groups`: 0, 1, 2, 3-5) for one facility.
///
/// Bucket 3-5 sums ages 3..5: `accept`/`enrolled` under absorbing-identity
/// semantics, `wait`/`capacity_est` strictly — a single unknown waitlist makes
/// the aggregate unknown instead of silently understating it.
pub fn build_age_groups(
    accept_row: &SheetRow,
    wait_row: Option<&SheetRow>,
    enrolled_row: Option<&SheetRow>,
) -> (BTreeMap<String, Metrics>, BTreeMap<String, Metrics>) {
    let mut ages_0_5 = BTreeMap::new();
    for age in 0u8..=5 {
        let a = get_age_value(accept_row, age);
        let w = wait_row.and_then(|r| get_age_value(r, age));
        let e = enrolled_row.and_then(|r| get_age_value(r, age));
        ages_0_5.insert(age.to_string(), Metrics::from_counts(a, w, e));
    }

    let pick = |age: u8, f: fn(&Metrics) -> Option<i64>| f(&ages_0_5[&age.to_string()]);
    let accepts: Vec<_> = (3..=5).map(|a| pick(a, |m| m.accept)).collect();
    let enrolleds: Vec<_> = (3..=5).map(|a| pick(a, |m| m.enrolled)).collect();
    let waits: Vec<_> = (3..=5).map(|a| pick(a, |m| m.wait)).collect();
    let caps: Vec<_> = (3..=5).map(|a| pick(a, |m| m.capacity_est)).collect();

    let wait_35 = sum_strict(&waits);
    let cap_35 = sum_strict(&caps);

    let mut age_groups = BTreeMap::new();
    for age in 0u8..=2 {
        age_groups.insert(age.to_string(), ages_0_5[&age.to_string()].clone());
    }
    age_groups.insert(
        "3-5".to_string(),
        Metrics {
            accept: sum_present(&accepts),
            wait: wait_35,
            enrolled: sum_present(&enrolleds),
            capacity_est: cap_35,
            wait_per_capacity_est: ratio_opt(wait_35, cap_35),
        },
    );

    (age_groups, ages_0_5)
}

/// A source sheet readied for joining: normalized rows indexed by the inferred
/// facility id.
struct KeyedSheet {
    sheet: SheetData,
    columns: ColumnMap,
    by_id: HashMap<String, usize>,
}

impl KeyedSheet {
    fn row(&self, id: &str) -> Option<&SheetRow> {
        self.by_id.get(id).map(|&i| &self.sheet.rows[i])
    }
}

/// Locate the header, normalize rows, and resolve columns for one grid.
fn prepare_sheet(
    grid_name: &str,
    grid: &RawGrid,
    synonyms: &ColumnSynonyms,
) -> Result<KeyedSheet, SchemaError> {
    let header_idx = find_header_index(&grid.rows).ok_or_else(|| SchemaError::NoHeaderRow {
        grid: grid_name.to_string(),
    })?;
    let sheet = process::normalize(grid, header_idx);
    let columns = columns::resolve(grid_name, &sheet.header, &sheet.rows, synonyms)?;

    let id_label = columns
        .label(Field::FacilityId)
        .expect("facility id is mandatory in a resolved map")
        .to_string();

    let mut by_id = HashMap::with_capacity(sheet.rows.len());
    for (i, row) in sheet.rows.iter().enumerate() {
        let id = row.get(&id_label).map(|v| norm_cell(v)).unwrap_or_default();
        if !id.is_empty() {
            by_id.insert(id, i);
        }
    }

    debug!(
        grid = grid_name,
        header_row = header_idx,
        rows = sheet.rows.len(),
        keyed = by_id.len(),
        "prepared sheet"
    );

    Ok(KeyedSheet {
        sheet,
        columns,
        by_id,
    })
}

/// Prepare an optional sub-source. Schema failures here degrade the source to
/// empty instead of aborting the month.
fn prepare_optional(
    grid_name: &str,
    grid: Option<&RawGrid>,
    synonyms: &ColumnSynonyms,
) -> Option<KeyedSheet> {
    let grid = grid?;
    match prepare_sheet(grid_name, grid, synonyms) {
        Ok(k) => Some(k),
        Err(e) => {
            warn!(grid = grid_name, error = %e, "sub-source unusable, continuing without it");
            None
        }
    }
}

/// Reconcile one month: accept grid mandatory, wait/enrolled optional.
///
/// Returns the resolved month label (or `None` when no textual evidence nor
/// fiscal hint could place the sheet — in that case no records are produced,
/// since an unlabeled month must not be persisted) and the facility records.
/// Schema failure on the accept grid is the only hard error.
pub fn reconcile_month(
    accept: &RawGrid,
    wait: Option<&RawGrid>,
    enrolled: Option<&RawGrid>,
    fiscal_hint: Option<i32>,
    opts: &ReconcileOptions,
) -> Result<(Option<MonthLabel>, Vec<FacilityRecord>), SchemaError> {
    let accept_sheet = prepare_sheet("accept", accept, &opts.synonyms)?;

    let month = temporal::resolve_month(accept, &accept_sheet.sheet, fiscal_hint);
    let Some(month) = month else {
        warn!("month unresolved for accept sheet, skipping");
        return Ok((None, Vec::new()));
    };

    let wait_sheet = prepare_optional("wait", wait, &opts.synonyms);
    let enrolled_sheet = prepare_optional("enrolled", enrolled, &opts.synonyms);

    let name_label = accept_sheet.columns.label(Field::Name);
    let ward_label = accept_sheet.columns.label(Field::Ward);
    let target_ward = opts.ward_filter.as_ref().map(|w| norm_cell(w));

    // Sorted ids keep output order stable run to run.
    let mut ids: Vec<&String> = accept_sheet.by_id.keys().collect();
    ids.sort();

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        let ar = accept_sheet.row(id).expect("id came from this index");

        let ward = ward_label
            .and_then(|l| ar.get(l))
            .map(|v| norm_cell(v).replace(&opts.city_prefix, ""))
            .unwrap_or_default();
        if let Some(target) = &target_ward {
            if !ward.contains(target.as_str()) {
                continue;
            }
        }

        let wr = wait_sheet.as_ref().and_then(|s| s.row(id));
        let er = enrolled_sheet.as_ref().and_then(|s| s.row(id));

        let name = name_label
            .and_then(|l| ar.get(l))
            .map(|v| norm_cell(v))
            .unwrap_or_default();

        // A facility with no extractable total still yields a record; "no
        // data" must stay distinguishable from "zero capacity" downstream.
        let tot_accept = get_total(ar);
        let tot_wait = wr.and_then(get_total);
        let tot_enrolled = er.and_then(get_total);

        let (age_groups, ages_0_5) = build_age_groups(ar, wr, er);

        records.push(FacilityRecord {
            id: id.clone(),
            name,
            ward,
            updated: Some(month),
            totals: Metrics::from_counts(tot_accept, tot_wait, tot_enrolled),
            age_groups,
            ages_0_5,
            ..FacilityRecord::default()
        });
    }

    debug!(month = %month, facilities = records.len(), "reconciled month");
    Ok((Some(month), records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(title: &str, rows: Vec<Vec<&str>>) -> RawGrid {
        RawGrid {
            title: title.to_string(),
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect(),
        }
    }

    fn row(pairs: &[(&str, &str)]) -> SheetRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn ratio_is_absent_on_zero_or_missing_capacity() {
        assert_eq!(ratio_opt(Some(3), Some(12)), Some(0.25));
        assert_eq!(ratio_opt(Some(3), Some(0)), None);
        assert_eq!(ratio_opt(Some(3), None), None);
        assert_eq!(ratio_opt(None, Some(12)), None);
    }

    #[test]
    fn sum_semantics() {
        assert_eq!(sum_present(&[Some(1), None, Some(2)]), Some(3));
        assert_eq!(sum_present(&[None, None]), None);
        assert_eq!(sum_strict(&[Some(1), None, Some(2)]), None);
        assert_eq!(sum_strict(&[Some(1), Some(2), Some(3)]), Some(6));
    }

    #[test]
    fn capacity_needs_both_operands() {
        let m = Metrics::from_counts(Some(5), Some(2), Some(20));
        assert_eq!(m.capacity_est, Some(25));
        assert_eq!(m.wait_per_capacity_est, Some(2.0 / 25.0));

        let m = Metrics::from_counts(Some(5), Some(2), None);
        assert_eq!(m.capacity_est, None);
        assert_eq!(m.wait_per_capacity_est, None);
    }

    #[test]
    fn total_prefers_exact_label_and_skips_blanks() {
        let r = row(&[("合計", "12"), ("合計_受入可能", "99")]);
        assert_eq!(get_total(&r), Some(12));

        let r = row(&[("合計", ""), ("合計_受入可能", "7")]);
        assert_eq!(get_total(&r), Some(7));

        let r = row(&[("施設名", "さくら")]);
        assert_eq!(get_total(&r), None);
    }

    #[test]
    fn age_values_tolerate_fullwidth_and_suffixes() {
        let r = row(&[("０歳児", "5"), ("1歳児_受入可能", "7")]);
        assert_eq!(get_age_value(&r, 0), Some(5));
        assert_eq!(get_age_value(&r, 1), Some(7));
        assert_eq!(get_age_value(&r, 2), None);
    }

    #[test]
    fn bucket_3_5_aggregation_law() {
        // all present: plain sum
        let ar = row(&[("3歳児", "1"), ("4歳児", "2"), ("5歳児", "3")]);
        let (groups, _) = build_age_groups(&ar, None, None);
        assert_eq!(groups["3-5"].accept, Some(6));

        // one absent: absorbing rule still sums the present values
        let ar = row(&[("3歳児", "1"), ("5歳児", "3")]);
        let (groups, _) = build_age_groups(&ar, None, None);
        assert_eq!(groups["3-5"].accept, Some(4));

        // all absent: absent, never zero
        let ar = row(&[("0歳児", "9")]);
        let (groups, _) = build_age_groups(&ar, None, None);
        assert_eq!(groups["3-5"].accept, None);
    }

    #[test]
    fn bucket_3_5_wait_is_strict() {
        let ar = row(&[("3歳児", "1"), ("4歳児", "2"), ("5歳児", "3")]);
        let wr = row(&[("3歳児", "1"), ("4歳児", "2")]); // age 5 unknown
        let (groups, _) = build_age_groups(&ar, Some(&wr), None);
        assert_eq!(groups["3-5"].wait, None);

        let wr = row(&[("3歳児", "1"), ("4歳児", "2"), ("5歳児", "0")]);
        let (groups, _) = build_age_groups(&ar, Some(&wr), None);
        assert_eq!(groups["3-5"].wait, Some(3));
    }

    #[test]
    fn end_to_end_accept_only() {
        let accept = grid(
            "令和６年４月１日時点",
            vec![
                vec!["保育所等の受入可能数", "", "", "", "", ""],
                vec!["", "", "", "", "", ""],
                vec!["", "", "", "", "", ""],
                vec!["施設番号", "施設名", "施設所在区", "合計", "0歳児", "1歳児"],
                vec!["1001", "さくら保育園", "港北区", "12", "5", "7"],
            ],
        );

        let (month, records) =
            reconcile_month(&accept, None, None, None, &ReconcileOptions::default()).unwrap();
        assert_eq!(month.unwrap().to_string(), "2024-04-01");
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.id, "1001");
        assert_eq!(r.name, "さくら保育園");
        assert_eq!(r.ward, "港北区");
        assert_eq!(r.totals.accept, Some(12));
        assert_eq!(r.totals.wait, None);
        assert_eq!(r.totals.enrolled, None);
        assert_eq!(r.totals.capacity_est, None);
        assert_eq!(r.age_groups["0"].accept, Some(5));
        assert_eq!(r.age_groups["1"].accept, Some(7));
    }

    #[test]
    fn wait_and_enrolled_join_on_the_inferred_key() {
        let accept = grid(
            "令和６年４月１日時点",
            vec![
                vec!["施設番号", "施設名", "施設所在区", "合計", "0歳児", "1歳児"],
                vec!["1001", "さくら保育園", "港北区", "12", "5", "7"],
                vec!["1002", "うめ保育園", "港北区", "8", "3", "5"],
            ],
        );
        // different id label on the wait sheet; join still works
        let wait = grid(
            "令和６年４月１日時点",
            vec![
                vec!["施設・事業所番号", "施設名", "施設所在区", "合計", "0歳児", "1歳児"],
                vec!["1001", "さくら保育園", "港北区", "3", "1", "2"],
            ],
        );
        let enrolled = grid(
            "令和６年４月１日時点",
            vec![
                vec!["施設番号", "施設名", "施設所在区", "合計", "0歳児", "1歳児"],
                vec!["1001", "さくら保育園", "港北区", "30", "10", "12"],
            ],
        );

        let (_, records) = reconcile_month(
            &accept,
            Some(&wait),
            Some(&enrolled),
            None,
            &ReconcileOptions::default(),
        )
        .unwrap();
        assert_eq!(records.len(), 2);

        let r = records.iter().find(|r| r.id == "1001").unwrap();
        assert_eq!(r.totals.wait, Some(3));
        assert_eq!(r.totals.enrolled, Some(30));
        assert_eq!(r.totals.capacity_est, Some(42));
        assert_eq!(r.totals.wait_per_capacity_est, Some(3.0 / 42.0));

        // absence in the sub-sources is not an error
        let r = records.iter().find(|r| r.id == "1002").unwrap();
        assert_eq!(r.totals.wait, None);
        assert_eq!(r.totals.capacity_est, None);
    }

    #[test]
    fn unusable_wait_sheet_degrades_to_empty() {
        let accept = grid(
            "令和６年４月１日時点",
            vec![
                vec!["施設番号", "施設名", "施設所在区", "合計", "0歳児", "1歳児"],
                vec!["1001", "さくら保育園", "港北区", "12", "5", "7"],
            ],
        );
        let wait = grid("", vec![vec!["", "", "", "", ""]]);

        let (_, records) =
            reconcile_month(&accept, Some(&wait), None, None, &ReconcileOptions::default())
                .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].totals.wait, None);
    }

    #[test]
    fn accept_without_id_column_fails_fast() {
        let accept = grid(
            "令和６年４月１日時点",
            vec![
                vec!["名前", "住所", "合計", "0歳児", "1歳児"],
                vec!["さくら保育園", "港北区", "12", "5", "7"],
            ],
        );
        let err =
            reconcile_month(&accept, None, None, None, &ReconcileOptions::default()).unwrap_err();
        assert!(matches!(err, SchemaError::NoFacilityIdColumn { .. }));
    }

    #[test]
    fn unresolved_month_yields_no_records() {
        let accept = grid(
            "入所状況",
            vec![
                vec!["施設番号", "施設名", "施設所在区", "合計", "0歳児", "1歳児"],
                vec!["1001", "さくら保育園", "港北区", "12", "5", "7"],
            ],
        );
        let (month, records) =
            reconcile_month(&accept, None, None, None, &ReconcileOptions::default()).unwrap();
        assert_eq!(month, None);
        assert!(records.is_empty());
    }

    #[test]
    fn ward_scope_strips_city_prefix() {
        let accept = grid(
            "令和６年４月１日時点",
            vec![
                vec!["施設番号", "施設名", "施設所在区", "合計", "0歳児", "1歳児"],
                vec!["1001", "さくら保育園", "横浜市港北区", "12", "5", "7"],
                vec!["1002", "うめ保育園", "横浜市鶴見区", "8", "3", "5"],
            ],
        );
        let opts = ReconcileOptions {
            ward_filter: Some("港北区".to_string()),
            ..ReconcileOptions::default()
        };
        let (_, records) = reconcile_month(&accept, None, None, None, &opts).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ward, "港北区");
    }

    #[test]
    fn dash_total_is_zero_not_absent() {
        let accept = grid(
            "令和６年４月１日時点",
            vec![
                vec!["施設番号", "施設名", "施設所在区", "合計", "0歳児", "1歳児"],
                vec!["1001", "さくら保育園", "港北区", "－", "-", "7"],
            ],
        );
        let (_, records) =
            reconcile_month(&accept, None, None, None, &ReconcileOptions::default()).unwrap();
        let r = &records[0];
        assert_eq!(r.totals.accept, Some(0));
        assert_eq!(r.age_groups["0"].accept, Some(0));
        assert_eq!(r.age_groups["1"].accept, Some(7));
    }
}
