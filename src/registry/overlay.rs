use tracing::{debug, warn};

use crate::reconcile::FacilityRecord;
use crate::registry::master::{MasterRegistryEntry, RegistryLookup};
use crate::registry::misses::MissRecord;

/// Which field categories may overwrite a non-empty record value. Empty record
/// fields are always fillable; these flags only govern replacement.
///
/// Defaults follow the curation workflow: location data is authoritative in
/// the registry, contact data is not (monthly sheets occasionally carry
/// fresher phone numbers), and station/kana data is registry-owned.
#[derive(Debug, Clone)]
pub struct OverwritePolicy {
    /// address, lat, lng, facility_type
    pub location: bool,
    /// phone, website, map_url, notes
    pub contact: bool,
    /// nearest_station, walk_minutes, name_kana, station_kana
    pub station_kana: bool,
}

impl Default for OverwritePolicy {
    fn default() -> Self {
        Self {
            location: true,
            contact: false,
            station_kana: true,
        }
    }
}

/// What one enrichment pass did: how many cells actually changed (zero on a
/// repeated pass with unchanged registry data) and which facilities had no
/// registry entry.
#[derive(Debug, Default)]
pub struct EnrichOutcome {
    pub changed_cells: usize,
    pub misses: Vec<MissRecord>,
}

/// Coerce a walk-minutes-style value to an integer-shaped string. Empty,
/// `null`, `-`, and malformed values are absent — never zero.
pub fn as_int_str(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") || s == "-" {
        return None;
    }
    s.parse::<f64>().ok().map(|f| (f as i64).to_string())
}

/// Write `value` into `slot` when the registry value is non-empty and either
/// the slot is empty or `overwrite` allows replacement. Only an actual change
/// counts.
fn set_if(slot: &mut String, value: &str, overwrite: bool) -> usize {
    let value = value.trim();
    if value.is_empty() {
        return 0;
    }
    let current = slot.trim();
    if (overwrite || current.is_empty()) && current != value {
        *slot = value.to_string();
        return 1;
    }
    0
}

/// Overlay one registry entry onto one record. Returns the number of cells
/// changed; applying the same entry twice changes nothing the second time.
pub fn apply_entry(
    record: &mut FacilityRecord,
    entry: &MasterRegistryEntry,
    policy: &OverwritePolicy,
) -> usize {
    let mut changed = 0;

    changed += set_if(&mut record.address, &entry.address, policy.location);
    changed += set_if(&mut record.lat, &entry.lat, policy.location);
    changed += set_if(&mut record.lng, &entry.lng, policy.location);
    changed += set_if(&mut record.facility_type, &entry.facility_type, policy.location);

    changed += set_if(&mut record.phone, &entry.phone, policy.contact);
    changed += set_if(&mut record.website, &entry.website, policy.contact);
    changed += set_if(&mut record.map_url, &entry.map_url, policy.contact);
    changed += set_if(&mut record.notes, &entry.notes, policy.contact);

    changed += set_if(
        &mut record.nearest_station,
        &entry.nearest_station,
        policy.station_kana,
    );
    changed += set_if(&mut record.name_kana, &entry.name_kana, policy.station_kana);
    changed += set_if(
        &mut record.station_kana,
        &entry.station_kana,
        policy.station_kana,
    );

    if let Some(wm) = as_int_str(&entry.walk_minutes) {
        let current = record.walk_minutes.as_deref().unwrap_or("");
        if (policy.station_kana || current.is_empty()) && current != wm {
            record.walk_minutes = Some(wm);
            changed += 1;
        }
    }

    changed
}

/// Derive a map URL when none was overlaid: coordinates when present,
/// otherwise a name + ward + city text query.
pub fn fill_map_url(record: &mut FacilityRecord, city: &str) -> bool {
    if !record.map_url.trim().is_empty() {
        return false;
    }
    let url = if !record.lat.trim().is_empty() && !record.lng.trim().is_empty() {
        format!(
            "https://www.google.com/maps/search/?api=1&query={},{}",
            record.lat.trim(),
            record.lng.trim()
        )
    } else {
        let q = [record.name.as_str(), record.ward.as_str(), city]
            .iter()
            .filter(|p| !p.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        if q.is_empty() {
            return false;
        }
        format!("https://www.google.com/maps/search/?api=1&query={q}")
    };
    record.map_url = url;
    true
}

/// Enrich a month's records from the registry. Lookup misses are recorded for
/// human follow-up, never fatal.
pub fn enrich<R: RegistryLookup>(
    records: &mut [FacilityRecord],
    lookup: &R,
    policy: &OverwritePolicy,
    city: &str,
) -> EnrichOutcome {
    let mut outcome = EnrichOutcome::default();

    for record in records.iter_mut() {
        match lookup.lookup(&record.id) {
            Some(entry) => {
                outcome.changed_cells += apply_entry(record, entry, policy);
            }
            None => {
                outcome.misses.push(MissRecord {
                    facility_id: record.id.clone(),
                    name: record.name.clone(),
                    ward: record.ward.clone(),
                    reason: "registry_miss".to_string(),
                    query_tried: format!("{} {}", record.name, record.ward),
                });
            }
        }
        if fill_map_url(record, city) {
            outcome.changed_cells += 1;
        }
    }

    if outcome.changed_cells == 0 {
        warn!("enrichment changed zero cells");
    } else {
        debug!(
            changed = outcome.changed_cells,
            misses = outcome.misses.len(),
            "enrichment pass done"
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::master::MasterRegistry;

    fn record(id: &str) -> FacilityRecord {
        FacilityRecord {
            id: id.to_string(),
            name: "さくら保育園".into(),
            ward: "港北区".into(),
            ..FacilityRecord::default()
        }
    }

    fn entry(id: &str) -> MasterRegistryEntry {
        MasterRegistryEntry {
            facility_id: id.to_string(),
            address: "横浜市港北区日吉1-2-3".into(),
            lat: "35.55".into(),
            lng: "139.64".into(),
            phone: "045-000-0000".into(),
            nearest_station: "日吉駅".into(),
            walk_minutes: "7.0".into(),
            ..MasterRegistryEntry::default()
        }
    }

    #[test]
    fn fills_empty_fields_and_counts_changes() {
        let mut r = record("1001");
        let changed = apply_entry(&mut r, &entry("1001"), &OverwritePolicy::default());
        // address, lat, lng, phone (empty → fill), station, walk_minutes
        assert_eq!(changed, 6);
        assert_eq!(r.address, "横浜市港北区日吉1-2-3");
        assert_eq!(r.walk_minutes.as_deref(), Some("7"));
    }

    #[test]
    fn contact_category_does_not_overwrite() {
        let mut r = record("1001");
        r.phone = "045-111-1111".into();
        apply_entry(&mut r, &entry("1001"), &OverwritePolicy::default());
        assert_eq!(r.phone, "045-111-1111");

        let policy = OverwritePolicy {
            contact: true,
            ..OverwritePolicy::default()
        };
        let changed = apply_entry(&mut r, &entry("1001"), &policy);
        assert_eq!(changed, 1);
        assert_eq!(r.phone, "045-000-0000");
    }

    #[test]
    fn malformed_walk_minutes_is_absent_not_zero() {
        assert_eq!(as_int_str("7.0"), Some("7".to_string()));
        assert_eq!(as_int_str("12"), Some("12".to_string()));
        assert_eq!(as_int_str("-"), None);
        assert_eq!(as_int_str("null"), None);
        assert_eq!(as_int_str("やく5ふん"), None);

        let mut r = record("1001");
        let mut e = entry("1001");
        e.walk_minutes = "約5分".into();
        apply_entry(&mut r, &e, &OverwritePolicy::default());
        assert_eq!(r.walk_minutes, None);
    }

    #[test]
    fn overlay_is_idempotent() {
        let registry = MasterRegistry::from_entries(vec![entry("1001")]);
        let policy = OverwritePolicy::default();
        let mut records = vec![record("1001")];

        let first = enrich(&mut records, &registry, &policy, "横浜市");
        assert!(first.changed_cells > 0);

        let second = enrich(&mut records, &registry, &policy, "横浜市");
        assert_eq!(second.changed_cells, 0);
    }

    #[test]
    fn lookup_miss_is_recorded_not_fatal() {
        let registry = MasterRegistry::from_entries(vec![entry("1001")]);
        let mut records = vec![record("1001"), record("9999")];

        let outcome = enrich(&mut records, &registry, &OverwritePolicy::default(), "横浜市");
        assert_eq!(outcome.misses.len(), 1);
        assert_eq!(outcome.misses[0].facility_id, "9999");
        assert_eq!(outcome.misses[0].reason, "registry_miss");
    }

    #[test]
    fn map_url_prefers_coordinates() {
        let mut r = record("1001");
        r.lat = "35.55".into();
        r.lng = "139.64".into();
        assert!(fill_map_url(&mut r, "横浜市"));
        assert_eq!(
            r.map_url,
            "https://www.google.com/maps/search/?api=1&query=35.55,139.64"
        );

        let mut r = record("1002");
        assert!(fill_map_url(&mut r, "横浜市"));
        assert_eq!(
            r.map_url,
            "https://www.google.com/maps/search/?api=1&query=さくら保育園 港北区 横浜市"
        );

        // second pass: already set, no change
        assert!(!fill_map_url(&mut r, "横浜市"));
    }
}
