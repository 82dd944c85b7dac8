//! Domain types shared across the tracker.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Canonical region identifier: the 5-digit official district key (RS/AGS).
pub type RegionId = String;

/// Width of the official district key.
pub const REGION_KEY_LEN: usize = 5;

/// Length of the trailing incidence window in days.
pub const WINDOW_DAYS: u64 = 7;

/// Population basis the incidence is scaled to.
pub const PER_INHABITANTS: f64 = 100_000.0;

// ── Reference data ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// A German district as carried by the reference dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Official district key, e.g. "09162".
    pub id: RegionId,
    /// Short name (`GEN`), e.g. "München".
    pub name: String,
    /// District type (`BEZ`), e.g. "Kreisfreie Stadt".
    #[serde(default)]
    pub district_type: String,
    /// Federal state (`BL`).
    pub state: String,
    pub population: u64,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

impl Region {
    /// Name as shown in tables: "München Kreisfreie Stadt".
    pub fn display_name(&self) -> String {
        if self.district_type.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.district_type)
        }
    }

    /// RKI case data labels districts as "SK Name" / "LK Name".
    fn rki_label(&self) -> Option<String> {
        let prefix = match self.district_type.as_str() {
            "Kreisfreie Stadt" | "Stadtkreis" | "Bezirk" => "SK",
            "Landkreis" | "Kreis" => "LK",
            _ => return None,
        };
        Some(format!("{} {}", prefix, self.name))
    }
}

/// Left-pad an all-digit provider key to the official key width.
///
/// Returns `None` for keys that are not purely numeric or too long.
pub fn canonical_region_key(raw: &str) -> Option<RegionId> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.len() > REGION_KEY_LEN
        || !trimmed.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some(format!("{:0>width$}", trimmed, width = REGION_KEY_LEN))
}

/// Immutable reference table of regions with a name alias index.
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: BTreeMap<RegionId, Region>,
    aliases: HashMap<String, RegionId>,
}

impl RegionTable {
    /// Build a table, rejecting duplicate ids, malformed keys and empty populations.
    pub fn new(regions: Vec<Region>) -> Result<Self, Error> {
        let mut by_id = BTreeMap::new();
        for mut region in regions {
            let id = canonical_region_key(&region.id).ok_or_else(|| {
                Error::Parse(format!("region key {:?} is not a district key", region.id))
            })?;
            if region.population == 0 {
                return Err(Error::Parse(format!(
                    "region {} ({}) has zero population",
                    id, region.name
                )));
            }
            region.id = id.clone();
            if by_id.insert(id.clone(), region).is_some() {
                return Err(Error::Parse(format!("duplicate region key {}", id)));
            }
        }

        // Names shared by several districts (city and county of the same
        // name) are dropped from the index instead of resolving arbitrarily.
        let mut aliases: HashMap<String, RegionId> = HashMap::new();
        let mut ambiguous: HashSet<String> = HashSet::new();
        for region in by_id.values() {
            let mut names = vec![region.display_name(), region.name.clone()];
            names.extend(region.rki_label());
            for name in names {
                let key = name.trim().to_lowercase();
                if ambiguous.contains(&key) {
                    continue;
                }
                match aliases.get(&key) {
                    Some(existing) if existing != &region.id => {
                        aliases.remove(&key);
                        ambiguous.insert(key);
                    }
                    Some(_) => {}
                    None => {
                        aliases.insert(key, region.id.clone());
                    }
                }
            }
        }

        Ok(Self {
            regions: by_id,
            aliases,
        })
    }

    /// Add configured provider-name aliases. Targets must exist in the table.
    pub fn with_aliases(mut self, extra: &BTreeMap<String, RegionId>) -> Result<Self, Error> {
        for (alias, target) in extra {
            let id = canonical_region_key(target)
                .filter(|id| self.regions.contains_key(id))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "alias {:?} points at unknown region {:?}",
                        alias, target
                    ))
                })?;
            self.aliases.insert(alias.trim().to_lowercase(), id);
        }
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.regions.contains_key(id)
    }

    /// Look up a region by any of its known names, case-insensitively.
    pub fn resolve_alias(&self, name: &str) -> Option<&RegionId> {
        self.aliases.get(&name.trim().to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

// ── Case data ─────────────────────────────────────────────────────────

/// New cases reported for one region on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCaseRecord {
    pub region: RegionId,
    pub date: NaiveDate,
    pub cases: u64,
}

/// Trailing 7-day incidence for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidenceSnapshot {
    pub region: RegionId,
    pub as_of: NaiveDate,
    /// Sum of new cases over the window ending at `as_of`.
    pub cases_7d: u64,
    /// Cases per 100,000 inhabitants, unrounded.
    pub incidence: f64,
}

/// The complete set of incidence values computed in one cycle.
///
/// Every region of `regions` has an entry; `None` marks a coverage gap.
#[derive(Debug, Clone)]
pub struct SnapshotSet {
    pub as_of: NaiveDate,
    pub computed_at: DateTime<Utc>,
    pub regions: Arc<RegionTable>,
    pub entries: BTreeMap<RegionId, Option<IncidenceSnapshot>>,
}

impl SnapshotSet {
    pub fn get(&self, id: &str) -> Option<&IncidenceSnapshot> {
        self.entries.get(id).and_then(|e| e.as_ref())
    }

    /// Number of regions with a computed value.
    pub fn available(&self) -> usize {
        self.entries.values().filter(|e| e.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: &str, name: &str, bez: &str, population: u64) -> Region {
        Region {
            id: id.into(),
            name: name.into(),
            district_type: bez.into(),
            state: "Bayern".into(),
            population,
            coordinates: None,
        }
    }

    #[test]
    fn test_canonical_key_pads_numeric() {
        assert_eq!(canonical_region_key("1001").as_deref(), Some("01001"));
        assert_eq!(canonical_region_key(" 09162 ").as_deref(), Some("09162"));
        assert_eq!(canonical_region_key("SK München"), None);
        assert_eq!(canonical_region_key("123456"), None);
        assert_eq!(canonical_region_key(""), None);
    }

    #[test]
    fn test_table_rejects_zero_population() {
        let result = RegionTable::new(vec![region("09162", "München", "Kreisfreie Stadt", 0)]);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_table_rejects_duplicate_after_padding() {
        let result = RegionTable::new(vec![
            region("1001", "Flensburg", "Kreisfreie Stadt", 90_000),
            region("01001", "Flensburg", "Kreisfreie Stadt", 90_000),
        ]);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_ambiguous_short_name_not_indexed() {
        let table = RegionTable::new(vec![
            region("09162", "München", "Kreisfreie Stadt", 1_480_000),
            region("09184", "München", "Landkreis", 350_000),
        ])
        .expect("valid table");

        assert_eq!(table.resolve_alias("münchen"), None);
        assert_eq!(
            table.resolve_alias("SK München").map(String::as_str),
            Some("09162")
        );
        assert_eq!(
            table.resolve_alias("München Landkreis").map(String::as_str),
            Some("09184")
        );
    }

    #[test]
    fn test_configured_alias_must_target_known_region() {
        let table = RegionTable::new(vec![region("09162", "München", "Kreisfreie Stadt", 1)])
            .expect("valid table");
        let mut extra = BTreeMap::new();
        extra.insert("Munich".to_string(), "09999".to_string());
        assert!(matches!(table.with_aliases(&extra), Err(Error::Config(_))));
    }
}
