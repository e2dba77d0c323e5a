use anyhow::Result;
use hoikuscraper::{
    fetch::FileGridSource,
    registry::{MasterRegistry, StationRules},
    run::{missing_months, report_misses, run_batch, RunConfig},
    snapshot::SnapshotStore,
    temporal::{months_back_window, MonthLabel},
};
use chrono::Local;
use std::{env, path::PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env_filter).init();
    info!("startup");

    // ─── 2) configure dirs & run options ─────────────────────────────
    let grids_dir = PathBuf::from(env::var("GRIDS_DIR").unwrap_or_else(|_| "grids".into()));
    let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));
    let registry_path = data_dir.join("master_facilities.csv");
    let misses_path = data_dir.join("registry_misses.csv");

    let cfg = RunConfig {
        ward_filter: env::var("WARD_FILTER").ok().filter(|w| !w.is_empty()),
        force: env::var("FORCE_REBUILD").map(|v| v == "1").unwrap_or(false),
        ..RunConfig::default()
    };
    let months_back: u32 = env::var("MONTHS_BACK")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(24);

    // ─── 3) load + sanitize the master registry ──────────────────────
    let mut registry = MasterRegistry::load(&registry_path)?;
    let rules = StationRules::default();
    let cleared: usize = registry
        .entries_mut()
        .map(|e| rules.sanitize_entry(e))
        .sum();
    if cleared > 0 {
        info!(cleared, "reset invalid station data in registry");
        registry.write(&registry_path)?;
    }

    // ─── 4) reconcile every grid bundle ──────────────────────────────
    let source = FileGridSource::new(&grids_dir);
    let store = SnapshotStore::new(&data_dir)?;
    let summary = run_batch(&source, &registry, &store, &cfg)?;
    report_misses(&summary, &misses_path)?;

    // ─── 5) report coverage against the wanted window ────────────────
    let this_month = MonthLabel::from_date(Local::now().date_naive());
    let wanted = months_back_window(this_month, months_back);
    let missing = missing_months(&wanted, &store);
    if !missing.is_empty() {
        warn!(
            missing = missing.len(),
            first = %missing[0],
            "months in the wanted window have no snapshot"
        );
    }

    info!(
        bundles = summary.bundles,
        written = summary.months_written.len(),
        skipped = summary.months_skipped.len(),
        unresolved = summary.unresolved,
        changed_cells = summary.changed_cells,
        misses = summary.misses.len(),
        "all done"
    );
    Ok(())
}
