use once_cell::sync::Lazy;
use regex::Regex;

use crate::registry::master::MasterRegistryEntry;

/// Suffixes that contain 駅 but name an exit, gate, or forecourt rather than
/// the station itself (e.g. 日吉駅東口).
static BAD_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(東口|西口|南口|北口|出口|改札|改札口|駅前|駅通り|駅入口|駅東口|駅西口|駅南口|駅北口)$")
        .unwrap()
});

/// Block/lot-number shapes: anything address-like is not a station name.
static ADDRESS_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+丁目|\d+番|\d+号").unwrap());

/// Pull the leading `〇〇駅` out of a longer string.
static STATION_HEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?駅)").unwrap());

/// Validity rules for nearest-station values. Injected rather than global so
/// tests can substitute a narrow deny-list; the default carries the vocabulary
/// that has actually leaked into the registry over the years (bus stops,
/// schools, hospitals, ward offices, apartment-complex branding, landmarks).
#[derive(Debug, Clone)]
pub struct StationRules {
    pub deny_words: Vec<String>,
}

impl Default for StationRules {
    fn default() -> Self {
        let deny = [
            "バス", "バス停", "交差点", "公園", "小学校", "中学校", "高校", "病院",
            "クリニック", "消防", "警察", "区役所", "市役所", "郵便局", "図書館", "体育館",
            "保育園", "幼稚園", "こども園", "店", "スーパー", "コンビニ", "薬局", "営業所",
            "本社", "支店", "工場", "交番", "入口", "寺", "神社", "橋", "踏切",
            "二丁目", "三丁目", "四丁目", "五丁目", "丁目", "番地", "番", "号",
            "プラウド", "シティ", "レジデンス", "マンション", "団地", "ハイツ", "コーポ",
            "SST", "脇", "通り", "新道", "坂", "堀", "中央", "ホテル", "前",
        ];
        Self {
            deny_words: deny.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl StationRules {
    /// Normalize a candidate to the bare `〇〇駅` form, or empty when no
    /// station head exists.
    pub fn normalize(&self, raw: &str) -> String {
        let s = raw.trim();
        if s.is_empty() {
            return String::new();
        }
        STATION_HEAD
            .captures(s)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default()
    }

    /// Strict acceptance test for a value about to be stored: must end with
    /// the station suffix, carry no exit/gate/forecourt tail, contain no
    /// deny-list vocabulary, and not be address-shaped.
    pub fn is_clean(&self, raw: &str) -> bool {
        let raw = raw.trim();
        if raw.is_empty() {
            return false;
        }

        if raw.contains('駅') && !raw.ends_with('駅') {
            return false;
        }
        if BAD_SUFFIX.is_match(raw) {
            return false;
        }

        let normalized = self.normalize(raw);
        if normalized.is_empty() || !normalized.ends_with('駅') {
            return false;
        }

        if self
            .deny_words
            .iter()
            .any(|w| raw.contains(w.as_str()) || normalized.contains(w.as_str()))
        {
            return false;
        }

        if ADDRESS_SHAPE.is_match(raw) || raw.contains("丁目") || raw.contains("番地") {
            return false;
        }

        true
    }

    /// True when a stored value must not stand: empty markers or anything
    /// failing [`is_clean`]. Note `-` means absent here, not zero.
    pub fn is_bad_value(&self, raw: &str) -> bool {
        let s = raw.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("null") || s == "-" {
            return true;
        }
        !self.is_clean(s)
    }

    /// Reset invalid stored station data on a registry entry so a later
    /// enrichment pass can repopulate it instead of compounding bad data.
    /// Walk minutes cannot outlive the station they were measured from.
    /// Returns the number of cells cleared.
    pub fn sanitize_entry(&self, entry: &mut MasterRegistryEntry) -> usize {
        let mut changed = 0;

        if !entry.nearest_station.trim().is_empty() && self.is_bad_value(&entry.nearest_station) {
            entry.nearest_station.clear();
            entry.station_kana.clear();
            changed += 1;
        }
        if entry.nearest_station.trim().is_empty() && !entry.walk_minutes.trim().is_empty() {
            entry.walk_minutes.clear();
            changed += 1;
        }

        changed
    }
}
