//! Property tests for the forecast engine: partition, fusion and propagation.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use geo::Area;
use proptest::prelude::*;

use cloudburst_forecast::propagation::{apply_events, cascade, distance_decay, wind_factor};
use cloudburst_forecast::{
    fuse, partition, AerialSensorData, BoundingRegion, Coordinates, FusionConfig, NodeKind,
    NodeStatus, PropagationConfig, RainfallData, SectorMap, SensorNode, WeatherData, WindData,
};

const LATTICE: usize = 6;

fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 14, 12, 0, 0).unwrap()
}

fn bounds() -> BoundingRegion {
    BoundingRegion::new(30.0, 78.0, 31.0, 79.0).unwrap()
}

/// Nodes on a distinct subset of a 6x6 lattice strictly inside [`bounds`].
fn lattice_nodes(cells: &BTreeSet<usize>) -> Vec<SensorNode> {
    cells
        .iter()
        .map(|&i| SensorNode {
            id: format!("n{i:02}"),
            name: format!("Station {i}"),
            coordinates: Coordinates::new(
                30.05 + (i / LATTICE) as f64 * 0.15,
                78.05 + (i % LATTICE) as f64 * 0.15,
            ),
            kind: NodeKind::Sensor,
            status: NodeStatus::Online,
        })
        .collect()
}

fn lattice_strategy() -> impl Strategy<Value = BTreeSet<usize>> {
    prop::collection::btree_set(0..LATTICE * LATTICE, 2..12)
}

fn sectors_for(cells: &BTreeSet<usize>) -> SectorMap {
    partition(&lattice_nodes(cells), &bounds(), ts()).unwrap()
}

/// Sector ids within `hops` adjacency steps of `source`, excluding it.
fn reachable_within(sectors: &SectorMap, source: &str, hops: usize) -> BTreeSet<String> {
    let mut seen = BTreeSet::from([source.to_string()]);
    let mut frontier = vec![source.to_string()];
    for _ in 0..hops {
        let mut next = Vec::new();
        for id in &frontier {
            for neighbor in &sectors[id].neighbors {
                if seen.insert(neighbor.clone()) {
                    next.push(neighbor.clone());
                }
            }
        }
        frontier = next;
    }
    seen.remove(source);
    seen
}

fn wind(speed: f64, direction: f64) -> WindData {
    WindData {
        speed,
        direction,
        timestamp: ts(),
    }
}

// =============================================================================
// Partition
// =============================================================================
proptest! {
    #[test]
    fn neighbor_relation_is_symmetric(cells in lattice_strategy()) {
        let sectors = sectors_for(&cells);
        for sector in sectors.values() {
            prop_assert!(!sector.neighbors.contains(&sector.id));
            for neighbor in &sector.neighbors {
                let other = &sectors[neighbor];
                prop_assert!(
                    other.neighbors.contains(&sector.id),
                    "{} lists {} but not the reverse", sector.id, other.id
                );
            }
        }
    }

    #[test]
    fn cells_tile_the_bounds(cells in lattice_strategy()) {
        let sectors = sectors_for(&cells);
        prop_assert_eq!(sectors.len(), cells.len());

        let total: f64 = sectors.values().map(|s| s.area).sum();
        prop_assert!((total - 1.0).abs() < 1e-6, "cell areas sum to {}", total);
        for sector in sectors.values() {
            prop_assert!((sector.polygon().unsigned_area() - sector.area).abs() < 1e-9);
        }

        let region = bounds();
        for sector in sectors.values() {
            prop_assert!(sector.boundary.len() >= 3);
            prop_assert!(region.contains(&sector.centroid));
        }
    }
}

// =============================================================================
// Fusion
// =============================================================================
proptest! {
    #[test]
    fn fused_values_stay_in_range(
        rate in 0.0_f64..400.0,
        cumulative in 0.0_f64..800.0,
        pressure in 850.0_f64..1050.0,
        humidity in 0.0_f64..100.0,
        pwv in 0.0_f64..90.0,
        aerial_age in 0_i64..40,
    ) {
        let weather = WeatherData { temperature: 24.0, pressure, humidity, timestamp: ts() };
        let rainfall = RainfallData { rate, cumulative, timestamp: ts() };
        let aerial = AerialSensorData {
            altitude: 1500.0,
            temperature: 12.0,
            pressure: pressure - 150.0,
            humidity,
            pwv,
            timestamp: ts() - chrono::Duration::minutes(aerial_age),
        };

        let config = FusionConfig::default();
        let result = fuse(Some(&weather), Some(&rainfall), Some(&aerial), ts(), &config);
        prop_assert!((0.0..=100.0).contains(&result.combined_probability));
        prop_assert!((0.0..=1.0).contains(&result.confidence));
    }
}

// =============================================================================
// Propagation
// =============================================================================
proptest! {
    #[test]
    fn wind_factor_never_grows_with_angle(a in 0.0_f64..=180.0, b in 0.0_f64..=180.0) {
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(wind_factor(near) >= wind_factor(far));
    }

    #[test]
    fn decay_is_bounded_and_strictly_decreasing(km in 0.0_f64..1000.0, step in 0.01_f64..100.0) {
        let config = PropagationConfig::default();
        let here = distance_decay(km, &config);
        let further = distance_decay(km + step, &config);
        prop_assert!(here > 0.0 && here <= 1.0);
        prop_assert!(further < here);
    }

    #[test]
    fn cascade_never_revisits_or_amplifies(
        cells in lattice_strategy(),
        source_index in 0usize..12,
        probability in 1.0_f64..=100.0,
        speed in 0.5_f64..40.0,
        direction in 0.0_f64..360.0,
        max_hops in 0usize..6,
    ) {
        let sectors = sectors_for(&cells);
        let ids: Vec<_> = sectors.keys().cloned().collect();
        let source = sectors[&ids[source_index % ids.len()]].with_probability(probability);

        let config = PropagationConfig { max_hops, ..PropagationConfig::default() };
        let result = cascade(&source, &sectors, &wind(speed, direction), ts(), &config);

        prop_assert!(!result.affected_sectors.contains(&source.id));
        prop_assert!(result.affected_sectors.len() < sectors.len());
        let reachable = reachable_within(&sectors, &source.id, max_hops);
        prop_assert!(
            result.affected_sectors.is_subset(&reachable),
            "cascade reached {:?} beyond {} hops ({:?})",
            result.affected_sectors, max_hops, reachable
        );
        prop_assert_eq!(result.events.len(), result.affected_sectors.len());
        for event in &result.events {
            prop_assert!(event.propagated_probability < probability);
            prop_assert!(event.propagated_probability >= config.min_probability);
            prop_assert!(event.scheduled_time > ts());
        }
    }

    #[test]
    fn applying_events_never_lowers_risk(
        cells in lattice_strategy(),
        base in 0.0_f64..60.0,
        probability in 70.0_f64..=100.0,
        direction in 0.0_f64..360.0,
    ) {
        let sectors: SectorMap = sectors_for(&cells)
            .into_iter()
            .map(|(id, s)| (id, s.with_probability(base)))
            .collect();
        let source = sectors.values().next().unwrap().with_probability(probability);

        let config = PropagationConfig::default();
        let result = cascade(&source, &sectors, &wind(12.0, direction), ts(), &config);
        let merged = apply_events(&sectors, &result.events);

        prop_assert_eq!(merged.len(), sectors.len());
        for (id, before) in &sectors {
            prop_assert!(merged[id].current_probability >= before.current_probability);
        }
    }
}
