// src/run.rs

use anyhow::{bail, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::fetch::GridSource;
use crate::reconcile::{self, ReconcileOptions};
use crate::registry::{enrich, write_misses, MissRecord, OverwritePolicy, RegistryLookup};
use crate::schema::ColumnSynonyms;
use crate::snapshot::{MonthSnapshot, SnapshotStore};
use crate::temporal::MonthLabel;

/// Everything one batch run needs decided up front.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Keep only facilities in this ward when set.
    pub ward_filter: Option<String>,
    /// City prefix stripped from ward values and used in map queries.
    pub city: String,
    /// Re-reconcile months that already have a snapshot.
    pub force: bool,
    pub policy: OverwritePolicy,
    pub synonyms: ColumnSynonyms,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ward_filter: None,
            city: "横浜市".to_string(),
            force: false,
            policy: OverwritePolicy::default(),
            synonyms: ColumnSynonyms::default(),
        }
    }
}

/// What a batch run did, for the closing log line.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub bundles: usize,
    pub months_written: Vec<MonthLabel>,
    pub months_skipped: Vec<MonthLabel>,
    pub unresolved: usize,
    pub changed_cells: usize,
    pub misses: Vec<MissRecord>,
}

/// Reconcile every bundle the source offers, enrich from the registry, and
/// persist one snapshot per resolved month.
///
/// Per-bundle failures degrade: a bundle whose acceptance grid has no usable
/// schema, or whose month cannot be resolved, is logged and dropped. The run
/// as a whole fails only when every bundle failed, so one bad publication
/// never blocks the months around it.
pub fn run_batch<S: GridSource, R: RegistryLookup>(
    source: &S,
    registry: &R,
    store: &SnapshotStore,
    cfg: &RunConfig,
) -> Result<RunSummary> {
    let bundles = source.bundles()?;
    let mut summary = RunSummary {
        bundles: bundles.len(),
        ..RunSummary::default()
    };

    let opts = ReconcileOptions {
        ward_filter: cfg.ward_filter.clone(),
        city_prefix: cfg.city.clone(),
        synonyms: cfg.synonyms.clone(),
    };

    for bundle in &bundles {
        let (month, mut records) = match reconcile::reconcile_month(
            &bundle.accept,
            bundle.wait.as_ref(),
            bundle.enrolled.as_ref(),
            bundle.fiscal_hint,
            &opts,
        ) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "bundle dropped");
                continue;
            }
        };

        let month = match month {
            Some(m) => m,
            None => {
                warn!(title = %bundle.accept.title, "no resolvable month, bundle dropped");
                summary.unresolved += 1;
                continue;
            }
        };

        if records.is_empty() {
            warn!(month = %month, "no facility rows extracted, bundle dropped");
            continue;
        }

        if store.exists(month) && !cfg.force {
            info!(month = %month, "snapshot already present, skipping");
            summary.months_skipped.push(month);
            continue;
        }

        let outcome = enrich(&mut records, registry, &cfg.policy, &cfg.city);
        summary.changed_cells += outcome.changed_cells;
        summary.misses.extend(outcome.misses);

        store.write_month(&MonthSnapshot {
            month,
            ward: cfg.ward_filter.clone().unwrap_or_default(),
            facilities: records,
        })?;
        summary.months_written.push(month);
    }

    if summary.bundles > 0
        && summary.months_written.is_empty()
        && summary.months_skipped.is_empty()
    {
        bail!("no capacity data extracted from {} bundles", summary.bundles);
    }

    summary.months_written.sort();
    summary.months_skipped.sort();
    Ok(summary)
}

/// Write the run's registry misses next to the snapshots, for follow-up
/// curation. No-op when there were none.
pub fn report_misses(summary: &RunSummary, path: &Path) -> Result<()> {
    write_misses(path, &summary.misses)
}

/// Which of the wanted months have no snapshot yet. Used to report coverage
/// gaps after a run.
pub fn missing_months(wanted: &[MonthLabel], store: &SnapshotStore) -> Vec<MonthLabel> {
    wanted
        .iter()
        .copied()
        .filter(|m| !store.exists(*m))
        .collect()
}
