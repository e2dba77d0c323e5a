use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// One curated facility in the master registry, keyed by `facility_id`.
///
/// Every field is a plain string ("" = absent) because the registry is
/// maintained as a hand-edited CSV. Only registry-maintenance routines write
/// these entries; the reconciliation engine reads them through
/// [`RegistryLookup`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterRegistryEntry {
    pub facility_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
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
    pub walk_minutes: String,
    #[serde(default)]
    pub name_kana: String,
    #[serde(default)]
    pub station_kana: String,
}

/// Read access to the registry. A trait so the enricher can be tested against
/// fixtures and so an alternative backing store can be swapped in.
pub trait RegistryLookup {
    fn lookup(&self, facility_id: &str) -> Option<&MasterRegistryEntry>;
}

/// In-memory registry backed by `master_facilities.csv`.
#[derive(Debug, Default)]
pub struct MasterRegistry {
    entries: BTreeMap<String, MasterRegistryEntry>,
}

impl MasterRegistry {
    pub fn from_entries(entries: impl IntoIterator<Item = MasterRegistryEntry>) -> Self {
        let entries = entries
            .into_iter()
            .filter(|e| !e.facility_id.trim().is_empty())
            .map(|mut e| {
                e.facility_id = e.facility_id.trim().to_string();
                (e.facility_id.clone(), e)
            })
            .collect();
        Self { entries }
    }

    /// Load the registry CSV. A missing file is an empty registry, not an
    /// error — months can still be reconciled, just not enriched.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no master registry, continuing unenriched");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading registry {}", path.display()))?;
        // hand-maintained CSVs routinely carry a UTF-8 BOM
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(raw.as_bytes());
        let mut entries = Vec::new();
        for result in rdr.deserialize() {
            let entry: MasterRegistryEntry =
                result.with_context(|| format!("parsing registry {}", path.display()))?;
            entries.push(entry);
        }

        let registry = Self::from_entries(entries);
        info!(path = %path.display(), entries = registry.len(), "loaded master registry");
        Ok(registry)
    }

    /// Write the registry back with a stable column order, via tmp + rename so
    /// a failed write never truncates the curated file.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = path.with_extension("csv.tmp");

        {
            let mut wtr = csv::Writer::from_path(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            for entry in self.entries.values() {
                wtr.serialize(entry).context("writing registry row")?;
            }
            wtr.flush().context("flushing registry")?;
        }

        fs::rename(&tmp, path)
            .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut MasterRegistryEntry> {
        self.entries.values_mut()
    }
}

impl RegistryLookup for MasterRegistry {
    fn lookup(&self, facility_id: &str) -> Option<&MasterRegistryEntry> {
        self.entries.get(facility_id)
    }
}
