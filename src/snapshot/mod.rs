// src/snapshot/mod.rs

use anyhow::{bail, Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::reconcile::FacilityRecord;
use crate::temporal::MonthLabel;

/// One month's reconciled, enriched record set, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthSnapshot {
    pub month: MonthLabel,
    #[serde(default)]
    pub ward: String,
    pub facilities: Vec<FacilityRecord>,
}

/// The index artifact: every month for which a valid, non-trivial snapshot
/// exists. Consumers trust this list blindly, so it must never reference an
/// empty month.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonthsIndex {
    pub months: Vec<String>,
}

/// Directory-backed snapshot store: one `YYYY-MM-01.json` per month plus a
/// `months.json` index.
pub struct SnapshotStore {
    data_dir: PathBuf,
}

const INDEX_FILE: &str = "months.json";

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        Ok(Self { data_dir })
    }

    pub fn month_path(&self, month: MonthLabel) -> PathBuf {
        self.data_dir.join(format!("{month}.json"))
    }

    pub fn exists(&self, month: MonthLabel) -> bool {
        self.month_path(month).is_file()
    }

    /// Persist one month and add it to the index. Refuses an empty record
    /// list: a failed month is discarded upstream, never committed.
    pub fn write_month(&self, snapshot: &MonthSnapshot) -> Result<()> {
        if snapshot.facilities.is_empty() {
            bail!("refusing to write empty snapshot for {}", snapshot.month);
        }

        let path = self.month_path(snapshot.month);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(snapshot).context("serializing snapshot")?;
        fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;

        self.index_month(snapshot.month)?;
        info!(month = %snapshot.month, facilities = snapshot.facilities.len(), "wrote snapshot");
        Ok(())
    }

    pub fn load_month(&self, month: MonthLabel) -> Result<MonthSnapshot> {
        let path = self.month_path(month);
        let raw =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn load_index(&self) -> Result<MonthsIndex> {
        let path = self.data_dir.join(INDEX_FILE);
        if !path.is_file() {
            return Ok(MonthsIndex::default());
        }
        let raw =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    fn write_index(&self, index: &MonthsIndex) -> Result<()> {
        let path = self.data_dir.join(INDEX_FILE);
        let json = serde_json::to_string_pretty(index).context("serializing months index")?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
    }

    /// Insert one month into the index, keeping it sorted and deduplicated.
    fn index_month(&self, month: MonthLabel) -> Result<()> {
        let mut index = self.load_index()?;
        let label = month.to_string();
        if !index.months.contains(&label) {
            index.months.push(label);
            index.months.sort();
        }
        self.write_index(&index)
    }

    /// Rebuild `months.json` from the snapshot files on disk, admitting only
    /// months whose snapshot parses and carries at least one facility.
    pub fn rebuild_index(&self) -> Result<MonthsIndex> {
        let mut months = Vec::new();
        let pattern = format!("{}/????-??-01.json", self.data_dir.display());

        for entry in glob(&pattern).context("invalid glob pattern for snapshot scan")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "cannot read snapshot entry");
                    continue;
                }
            };
            let raw = match fs::read_to_string(&path) {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable snapshot");
                    continue;
                }
            };
            match serde_json::from_str::<MonthSnapshot>(&raw) {
                Ok(snap) if !snap.facilities.is_empty() => months.push(snap.month.to_string()),
                Ok(snap) => {
                    warn!(month = %snap.month, "empty snapshot excluded from index");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unparsable snapshot excluded");
                }
            }
        }

        months.sort();
        months.dedup();
        let index = MonthsIndex { months };
        self.write_index(&index)?;
        Ok(index)
    }
}
