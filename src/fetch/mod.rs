// src/fetch/mod.rs

use anyhow::{Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::process::RawGrid;

/// One publication unit as retrieved: the mandatory acceptance grid plus the
/// optional companion grids, and whatever fiscal-year context the source
/// carried (page heading, file name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridBundle {
    pub accept: RawGrid,
    #[serde(default)]
    pub wait: Option<RawGrid>,
    #[serde(default)]
    pub enrolled: Option<RawGrid>,
    #[serde(default)]
    pub fiscal_hint: Option<i32>,
}

/// Where grid bundles come from. The reconciliation pipeline only sees this
/// trait, so a live scraper and a directory of saved extracts are
/// interchangeable.
pub trait GridSource {
    fn bundles(&self) -> Result<Vec<GridBundle>>;
}

/// Bundle source backed by a directory of `*.json` files, one bundle per
/// file. Files are visited in path order so runs are repeatable.
pub struct FileGridSource {
    grids_dir: PathBuf,
}

impl FileGridSource {
    pub fn new(grids_dir: impl Into<PathBuf>) -> Self {
        Self {
            grids_dir: grids_dir.into(),
        }
    }
}

impl GridSource for FileGridSource {
    fn bundles(&self) -> Result<Vec<GridBundle>> {
        let pattern = format!("{}/*.json", self.grids_dir.display());
        let mut bundles = Vec::new();

        for entry in glob(&pattern).context("invalid glob pattern for grid scan")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "cannot read grid entry");
                    continue;
                }
            };
            let raw = match fs::read_to_string(&path) {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable grid bundle, skipping");
                    continue;
                }
            };
            match serde_json::from_str::<GridBundle>(&raw) {
                Ok(bundle) => bundles.push(bundle),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unparsable grid bundle, skipping");
                }
            }
        }

        info!(dir = %self.grids_dir.display(), bundles = bundles.len(), "loaded grid bundles");
        Ok(bundles)
    }
}
