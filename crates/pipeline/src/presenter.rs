//! Read side: the current snapshot set and the views a map renderer consumes.
//!
//! The store holds an immutable `Arc<SnapshotSet>`; publishing swaps the
//! whole `Arc`, so a reader that cloned it keeps a consistent set for as
//! long as it needs, and never sees old and new entries mixed.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use common::{Coordinates, RegionId, SnapshotSet, PER_INHABITANTS};
use serde::Serialize;
use tokio::sync::RwLock;

/// Holder of the currently served snapshot set.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Option<Arc<SnapshotSet>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The served set, or `None` before the first successful cycle.
    pub async fn current(&self) -> Option<Arc<SnapshotSet>> {
        self.current.read().await.clone()
    }

    /// Replace the served set wholesale.
    pub async fn publish(&self, set: SnapshotSet) {
        *self.current.write().await = Some(Arc::new(set));
    }
}

// ── View types ────────────────────────────────────────────────────────

/// Incidence as seen by the renderer: a value or an explicit gap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum RegionIncidence {
    Value(f64),
    NoData,
}

impl RegionIncidence {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::NoData => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionView {
    pub name: String,
    pub state: String,
    pub incidence: RegionIncidence,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenterView {
    pub as_of: NaiveDate,
    pub computed_at: DateTime<Utc>,
    /// Seconds since the set was computed.
    pub age_secs: i64,
    pub regions: BTreeMap<RegionId, RegionView>,
    pub states: BTreeMap<String, RegionIncidence>,
}

/// One row of the district table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub district: String,
    pub state: String,
    pub district_incidence: RegionIncidence,
    pub state_incidence: RegionIncidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    District,
    State,
    DistrictIncidence,
    StateIncidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Weighted point for heatmap rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatPoint {
    /// Label for the point's tooltip.
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub weight: f64,
}

/// Boroughs of this city are drawn as one point weighted by the city-state's
/// incidence.
const MERGED_CITY: &str = "Berlin";

// ── Building views ────────────────────────────────────────────────────

/// Per-state incidence, defined only when every district of the state has a value.
pub fn state_incidence(set: &SnapshotSet) -> BTreeMap<String, RegionIncidence> {
    // state -> (cases, population, complete)
    let mut totals: BTreeMap<String, (u64, u64, bool)> = BTreeMap::new();
    for region in set.regions.iter() {
        let entry = totals
            .entry(region.state.clone())
            .or_insert((0, 0, true));
        match set.get(&region.id) {
            Some(snap) => {
                entry.0 += snap.cases_7d;
                entry.1 += region.population;
            }
            None => entry.2 = false,
        }
    }

    totals
        .into_iter()
        .map(|(state, (cases, population, complete))| {
            let value = if complete && population > 0 {
                RegionIncidence::Value(cases as f64 / population as f64 * PER_INHABITANTS)
            } else {
                RegionIncidence::NoData
            };
            (state, value)
        })
        .collect()
}

fn incidence_of(set: &SnapshotSet, id: &str) -> RegionIncidence {
    set.get(id)
        .map(|s| RegionIncidence::Value(s.incidence))
        .unwrap_or(RegionIncidence::NoData)
}

impl PresenterView {
    pub fn from_set(set: &SnapshotSet, now: DateTime<Utc>) -> Self {
        let regions = set
            .regions
            .iter()
            .map(|region| {
                (
                    region.id.clone(),
                    RegionView {
                        name: region.display_name(),
                        state: region.state.clone(),
                        incidence: incidence_of(set, &region.id),
                        coordinates: region.coordinates,
                    },
                )
            })
            .collect();

        Self {
            as_of: set.as_of,
            computed_at: set.computed_at,
            age_secs: (now - set.computed_at).num_seconds().max(0),
            regions,
            states: state_incidence(set),
        }
    }
}

/// District table rows for a set, sorted by `key` in `direction`.
pub fn table_rows(set: &SnapshotSet, key: SortKey, direction: Direction) -> Vec<TableRow> {
    let states = state_incidence(set);
    let mut rows: Vec<TableRow> = set
        .regions
        .iter()
        .map(|region| TableRow {
            district: region.display_name(),
            state: region.state.clone(),
            district_incidence: incidence_of(set, &region.id),
            state_incidence: states
                .get(&region.state)
                .copied()
                .unwrap_or(RegionIncidence::NoData),
        })
        .collect();

    sort_rows(&mut rows, key, direction);
    rows
}

/// Sort rows; gaps go last in either direction and ties break on district name.
pub fn sort_rows(rows: &mut [TableRow], key: SortKey, direction: Direction) {
    rows.sort_by(|a, b| {
        let primary = match key {
            SortKey::District => directed(a.district.cmp(&b.district), direction),
            SortKey::State => directed(a.state.cmp(&b.state), direction),
            SortKey::DistrictIncidence => {
                cmp_incidence(a.district_incidence, b.district_incidence, direction)
            }
            SortKey::StateIncidence => {
                cmp_incidence(a.state_incidence, b.state_incidence, direction)
            }
        };
        primary.then_with(|| a.district.cmp(&b.district))
    });
}

fn directed(ord: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

fn cmp_incidence(a: RegionIncidence, b: RegionIncidence, direction: Direction) -> Ordering {
    match (a.value(), b.value()) {
        (Some(x), Some(y)) => directed(x.total_cmp(&y), direction),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Heatmap points for each district that has both a value and coordinates.
///
/// Berlin boroughs collapse into a single "Berlin" point at the mean of
/// their coordinates, weighted by the state incidence of Berlin.
pub fn heat_points(set: &SnapshotSet) -> Vec<HeatPoint> {
    let mut points = Vec::new();
    let mut boroughs = Vec::new();

    for region in set.regions.iter() {
        if region.name.contains(MERGED_CITY) {
            boroughs.push(region);
            continue;
        }
        let (Some(coords), Some(snap)) = (region.coordinates, set.get(&region.id)) else {
            continue;
        };
        points.push(HeatPoint {
            name: region.display_name(),
            lat: coords.lat,
            lon: coords.lon,
            weight: snap.incidence,
        });
    }

    if let Some(first) = boroughs.first() {
        let coords: Vec<Coordinates> = boroughs.iter().filter_map(|r| r.coordinates).collect();
        let weight = state_incidence(set)
            .get(&first.state)
            .and_then(RegionIncidence::value);
        if let (false, Some(weight)) = (coords.is_empty(), weight) {
            let n = coords.len() as f64;
            points.push(HeatPoint {
                name: MERGED_CITY.to_string(),
                lat: coords.iter().map(|c| c.lat).sum::<f64>() / n,
                lon: coords.iter().map(|c| c.lon).sum::<f64>() / n,
                weight,
            });
        }
    }

    points
}

/// Display text for an incidence: two decimals, or "no data".
pub fn format_incidence(incidence: RegionIncidence) -> String {
    match incidence {
        RegionIncidence::Value(v) => format!("{:.2}", v),
        RegionIncidence::NoData => "no data".to_string(),
    }
}

// ── Presenter ─────────────────────────────────────────────────────────

/// Read-only facade over the store. Each call reads the current set once.
#[derive(Debug, Clone)]
pub struct Presenter {
    store: Arc<SnapshotStore>,
}

impl Presenter {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    pub async fn view(&self) -> Option<PresenterView> {
        let set = self.store.current().await?;
        Some(PresenterView::from_set(&set, Utc::now()))
    }

    pub async fn table(&self, key: SortKey, direction: Direction) -> Vec<TableRow> {
        match self.store.current().await {
            Some(set) => table_rows(&set, key, direction),
            None => Vec::new(),
        }
    }

    pub async fn heatmap(&self) -> Vec<HeatPoint> {
        match self.store.current().await {
            Some(set) => heat_points(&set),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{IncidenceSnapshot, Region, RegionTable};

    use crate::test_support::day;

    fn region(id: &str, name: &str, state: &str, population: u64) -> Region {
        Region {
            id: id.into(),
            name: name.into(),
            district_type: "Landkreis".into(),
            state: state.into(),
            population,
            coordinates: None,
        }
    }

    /// Build a set from (id, name, state, population, cases_7d) tuples.
    fn set_of(rows: &[(&str, &str, &str, u64, Option<u64>)]) -> SnapshotSet {
        let table = RegionTable::new(
            rows.iter()
                .map(|(id, name, state, pop, _)| region(id, name, state, *pop))
                .collect(),
        )
        .expect("valid table");
        let entries = rows
            .iter()
            .map(|(id, _, _, pop, cases)| {
                let snap = cases.map(|c| IncidenceSnapshot {
                    region: id.to_string(),
                    as_of: day(7),
                    cases_7d: c,
                    incidence: c as f64 / *pop as f64 * 100_000.0,
                });
                (id.to_string(), snap)
            })
            .collect();

        SnapshotSet {
            as_of: day(7),
            computed_at: Utc::now(),
            regions: Arc::new(table),
            entries,
        }
    }

    #[test]
    fn test_gap_reported_as_no_data_not_omitted() {
        let set = set_of(&[
            ("09000", "Bavaria", "Bayern", 13_000_000, Some(700)),
            ("09001", "Gapville", "Bayern", 50_000, None),
        ]);
        let view = PresenterView::from_set(&set, Utc::now());

        assert_eq!(view.regions.len(), 2);
        assert_eq!(view.regions["09001"].incidence, RegionIncidence::NoData);
        assert_eq!(format_incidence(view.regions["09000"].incidence), "5.38");
        assert_eq!(format_incidence(view.regions["09001"].incidence), "no data");
    }

    #[test]
    fn test_state_incidence_requires_all_districts() {
        let set = set_of(&[
            ("09000", "A", "Bayern", 100_000, Some(50)),
            ("09001", "B", "Bayern", 100_000, None),
            ("08000", "C", "Baden-Württemberg", 100_000, Some(30)),
            ("08001", "D", "Baden-Württemberg", 300_000, Some(10)),
        ]);
        let states = state_incidence(&set);

        assert_eq!(states["Bayern"], RegionIncidence::NoData);
        let bw = states["Baden-Württemberg"].value().expect("complete state");
        assert!((bw - 40.0 / 400_000.0 * 100_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_sort_puts_no_data_last_both_directions() {
        let set = set_of(&[
            ("09000", "Alpha", "Bayern", 100_000, Some(10)),
            ("09001", "Beta", "Bayern", 100_000, None),
            ("09002", "Gamma", "Bayern", 100_000, Some(90)),
        ]);

        let asc = table_rows(&set, SortKey::DistrictIncidence, Direction::Asc);
        let names: Vec<_> = asc.iter().map(|r| r.district.as_str()).collect();
        assert_eq!(names, ["Alpha Landkreis", "Gamma Landkreis", "Beta Landkreis"]);

        let desc = table_rows(&set, SortKey::DistrictIncidence, Direction::Desc);
        let names: Vec<_> = desc.iter().map(|r| r.district.as_str()).collect();
        assert_eq!(names, ["Gamma Landkreis", "Alpha Landkreis", "Beta Landkreis"]);
    }

    #[test]
    fn test_sort_by_district_desc() {
        let set = set_of(&[
            ("09000", "Alpha", "Bayern", 100_000, Some(10)),
            ("09001", "Beta", "Bayern", 100_000, Some(20)),
        ]);
        let rows = table_rows(&set, SortKey::District, Direction::Desc);
        assert_eq!(rows[0].district, "Beta Landkreis");
        assert_eq!(rows[0].state_incidence, rows[1].state_incidence);
    }

    #[test]
    fn test_heat_points_need_coordinates_and_value() {
        let mut set = set_of(&[
            ("09000", "Alpha", "Bayern", 100_000, Some(10)),
            ("09001", "Beta", "Bayern", 100_000, None),
        ]);
        let mut regions: Vec<Region> = set.regions.iter().cloned().collect();
        for r in &mut regions {
            r.coordinates = Some(Coordinates { lat: 48.1, lon: 11.6 });
        }
        set.regions = Arc::new(RegionTable::new(regions).expect("valid table"));

        let points = heat_points(&set);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "Alpha Landkreis");
        assert!((points[0].weight - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_berlin_boroughs_merge_into_one_point() {
        let mut set = set_of(&[
            ("09000", "Alpha", "Bayern", 100_000, Some(10)),
            ("11001", "Berlin Mitte", "Berlin", 100_000, Some(30)),
            ("11002", "Berlin Friedrichshain-Kreuzberg", "Berlin", 300_000, Some(10)),
        ]);
        let mut regions: Vec<Region> = set.regions.iter().cloned().collect();
        for r in &mut regions {
            r.coordinates = Some(match r.id.as_str() {
                "11001" => Coordinates { lat: 52.52, lon: 13.36 },
                "11002" => Coordinates { lat: 52.50, lon: 13.44 },
                _ => Coordinates { lat: 48.1, lon: 11.6 },
            });
        }
        set.regions = Arc::new(RegionTable::new(regions).expect("valid table"));

        let points = heat_points(&set);
        assert_eq!(points.len(), 2);
        let berlin = points.iter().find(|p| p.name == "Berlin").expect("merged point");
        assert!((berlin.weight - 40.0 / 400_000.0 * 100_000.0).abs() < 1e-9);
        assert!((berlin.lat - 52.51).abs() < 1e-9);
        assert!((berlin.lon - 13.40).abs() < 1e-9);
        assert!(points.iter().all(|p| !p.name.starts_with("Berlin ")));
    }

    #[test]
    fn test_berlin_point_dropped_while_a_borough_has_no_data() {
        let mut set = set_of(&[
            ("11001", "Berlin Mitte", "Berlin", 100_000, Some(30)),
            ("11002", "Berlin Pankow", "Berlin", 100_000, None),
        ]);
        let mut regions: Vec<Region> = set.regions.iter().cloned().collect();
        for r in &mut regions {
            r.coordinates = Some(Coordinates { lat: 52.5, lon: 13.4 });
        }
        set.regions = Arc::new(RegionTable::new(regions).expect("valid table"));

        assert!(heat_points(&set).is_empty());
    }

    #[test]
    fn test_no_data_serializes_with_status_tag() {
        let json = serde_json::to_string(&RegionIncidence::NoData).expect("serialize");
        assert_eq!(json, r#"{"status":"no_data"}"#);
        let json = serde_json::to_string(&RegionIncidence::Value(1.5)).expect("serialize");
        assert_eq!(json, r#"{"status":"value","value":1.5}"#);
    }

    #[tokio::test]
    async fn test_reader_keeps_consistent_set_across_publish() {
        let store = Arc::new(SnapshotStore::new());
        assert!(store.current().await.is_none());

        store
            .publish(set_of(&[
                ("09000", "A", "Bayern", 100_000, Some(10)),
                ("09001", "B", "Bayern", 100_000, Some(20)),
            ]))
            .await;
        let held = store.current().await.expect("published");

        store
            .publish(set_of(&[
                ("09000", "A", "Bayern", 100_000, Some(99)),
                ("09001", "B", "Bayern", 100_000, Some(98)),
            ]))
            .await;

        // The held set is untouched by the swap.
        assert_eq!(held.get("09000").map(|s| s.cases_7d), Some(10));
        assert_eq!(held.get("09001").map(|s| s.cases_7d), Some(20));

        let fresh = store.current().await.expect("published");
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert_eq!(fresh.get("09000").map(|s| s.cases_7d), Some(99));
        assert_eq!(fresh.get("09001").map(|s| s.cases_7d), Some(98));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_readers_never_see_mixed_sets() {
        let store = Arc::new(SnapshotStore::new());
        store
            .publish(set_of(&[
                ("09000", "A", "Bayern", 100_000, Some(0)),
                ("09001", "B", "Bayern", 100_000, Some(0)),
            ]))
            .await;

        let writer_store = store.clone();
        let writer = tokio::spawn(async move {
            for generation in 1..=200u64 {
                writer_store
                    .publish(set_of(&[
                        ("09000", "A", "Bayern", 100_000, Some(generation)),
                        ("09001", "B", "Bayern", 100_000, Some(generation)),
                    ]))
                    .await;
                tokio::task::yield_now().await;
            }
        });

        let presenter = Presenter::new(store.clone());
        for _ in 0..200 {
            let view = presenter.view().await.expect("always published");
            let a = view.regions["09000"].incidence;
            let b = view.regions["09001"].incidence;
            assert_eq!(a, b, "both regions must come from the same generation");
            tokio::task::yield_now().await;
        }

        writer.await.expect("writer task");
    }
}
