use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One enrichment failure, kept for human follow-up rather than surfaced as
/// an error: a facility the registry does not know, or whose lookup data was
/// out of scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissRecord {
    pub facility_id: String,
    pub name: String,
    pub ward: String,
    pub reason: String,
    pub query_tried: String,
}

/// Write the miss side artifact. Nothing is written when there are no misses,
/// so an empty file never masquerades as a clean run.
pub fn write_misses(path: &Path, misses: &[MissRecord]) -> Result<()> {
    if misses.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for miss in misses {
        wtr.serialize(miss).context("writing miss record")?;
    }
    wtr.flush().context("flushing miss records")?;
    Ok(())
}
