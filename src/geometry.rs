//! Planar partition of sensor nodes into forecast sectors.
//!
//! Each node seeds one Voronoi cell, computed by clipping the bounding
//! rectangle against the perpendicular bisector to every other seed. Cells
//! are `geo` polygons in an equirectangular plane (`x = longitude`,
//! `y = latitude`), which is accurate enough at the scale of a regional
//! sensor mesh and keeps the tessellation deterministic.
//!
//! Adjacency is decided once, here: two sectors are neighbours iff one of
//! their cells has an edge of non-zero length lying on their common
//! bisector. The relation is recorded for the unordered pair, so it is
//! symmetric by construction.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use geo::{Area, Centroid, Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ForecastError, ForecastResult};
use crate::fusion::alert_level;
use crate::models::{Coordinates, PredictionSource, Sector, SectorId, SectorMap, SensorNode};

/// Distance (degrees) under which a point is considered on a bisector.
const ON_LINE_EPS: f64 = 1e-9;

/// Minimum length (degrees) of an edge shared by two neighbours.
const MIN_SHARED_EDGE: f64 = 1e-7;

/// Minimum cell area (square degrees) before a cell counts as collapsed.
const MIN_CELL_AREA: f64 = 1e-12;

// ---

/// Axis-aligned rectangle that clips the tessellation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingRegion {
    // ---
    pub min_latitude: f64,
    pub min_longitude: f64,
    pub max_latitude: f64,
    pub max_longitude: f64,
}

impl BoundingRegion {
    /// Build and validate a region.
    pub fn new(
        min_latitude: f64,
        min_longitude: f64,
        max_latitude: f64,
        max_longitude: f64,
    ) -> ForecastResult<Self> {
        let region = Self {
            min_latitude,
            min_longitude,
            max_latitude,
            max_longitude,
        };
        region.validate()?;
        Ok(region)
    }

    /// The whole globe in equirectangular projection.
    pub fn world() -> Self {
        Self {
            min_latitude: -90.0,
            min_longitude: -180.0,
            max_latitude: 90.0,
            max_longitude: 180.0,
        }
    }

    pub fn validate(&self) -> ForecastResult<()> {
        // ---
        let lower = Coordinates::new(self.min_latitude, self.min_longitude);
        let upper = Coordinates::new(self.max_latitude, self.max_longitude);
        if !lower.is_valid() || !upper.is_valid() {
            return Err(ForecastError::InvalidBounds {
                reason: format!("corners {lower:?} / {upper:?} are not valid coordinates"),
            });
        }
        if self.min_latitude >= self.max_latitude || self.min_longitude >= self.max_longitude {
            return Err(ForecastError::InvalidBounds {
                reason: "minimum corner must be strictly below the maximum corner".to_string(),
            });
        }
        Ok(())
    }

    pub fn contains(&self, point: &Coordinates) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&point.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude)
    }

    pub fn center(&self) -> Coordinates {
        Coordinates::new(
            (self.min_latitude + self.max_latitude) / 2.0,
            (self.min_longitude + self.max_longitude) / 2.0,
        )
    }

    /// Counter-clockwise ring of corners.
    pub fn corners(&self) -> Vec<Coordinates> {
        vec![
            Coordinates::new(self.min_latitude, self.min_longitude),
            Coordinates::new(self.min_latitude, self.max_longitude),
            Coordinates::new(self.max_latitude, self.max_longitude),
            Coordinates::new(self.max_latitude, self.min_longitude),
        ]
    }
}

/// Sector id owned by a node.
pub fn sector_id_for(node_id: &str) -> SectorId {
    format!("sector-{node_id}")
}

impl Sector {
    /// The sector's cell as a planar polygon (`x = longitude`, `y = latitude`).
    pub fn polygon(&self) -> Polygon<f64> {
        let ring: Vec<Coord<f64>> = self.boundary.iter().map(coord_of).collect();
        Polygon::new(LineString::from(ring), vec![])
    }
}

fn coord_of(c: &Coordinates) -> Coord<f64> {
    Coord {
        x: c.longitude,
        y: c.latitude,
    }
}

fn coordinates_of(c: &Coord<f64>) -> Coordinates {
    Coordinates::new(c.y, c.x)
}

/// Perpendicular bisector between `own` and `other`, oriented so that the
/// signed distance is negative on `own`'s side.
#[derive(Debug, Clone, Copy)]
struct Bisector {
    normal: Coord<f64>,
    offset: f64,
}

impl Bisector {
    fn between(own: Coord<f64>, other: Coord<f64>) -> Self {
        // ---
        let delta = other - own;
        let len = delta.x.hypot(delta.y);
        let normal = delta / len;
        let mid = (own + other) / 2.0;
        Self {
            normal,
            offset: normal.x * mid.x + normal.y * mid.y,
        }
    }

    fn signed_distance(&self, p: Coord<f64>) -> f64 {
        self.normal.x * p.x + self.normal.y * p.y - self.offset
    }
}

/// One seed's clipped cell.
struct Cell {
    seed: usize,
    polygon: Polygon<f64>,
}

/// Partition `nodes` into one sector per node, clipped to `bounds`.
///
/// Nodes with invalid coordinates are skipped, and so are nodes outside
/// `bounds` whose cell does not reach into it. Fails with
/// [`ForecastError::DegenerateInput`] when no node owns any area, when two
/// nodes share an id or coordinates, or when the cell of a node inside
/// `bounds` collapses to zero area.
pub fn partition(
    nodes: &[SensorNode],
    bounds: &BoundingRegion,
    now: DateTime<Utc>,
) -> ForecastResult<SectorMap> {
    // ---
    bounds.validate()?;

    let mut seeds: Vec<&SensorNode> = nodes
        .iter()
        .filter(|node| {
            let valid = node.coordinates.is_valid();
            if !valid {
                debug!(
                    "Skipping node {} with invalid coordinates {:?}",
                    node.id, node.coordinates
                );
            }
            valid
        })
        .collect();

    if seeds.is_empty() {
        return Err(ForecastError::degenerate("no node with valid coordinates"));
    }

    // Stable order makes every downstream step independent of input order.
    seeds.sort_by(|a, b| a.id.cmp(&b.id));
    check_distinct(&seeds)?;

    let points: Vec<Coord<f64>> = seeds.iter().map(|n| coord_of(&n.coordinates)).collect();
    let frame: Vec<Coord<f64>> = bounds.corners().iter().map(coord_of).collect();

    let mut cells: Vec<Cell> = Vec::with_capacity(points.len());
    for (i, own) in points.iter().enumerate() {
        let mut ring = frame.clone();
        for (j, other) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            ring = clip(&ring, &Bisector::between(*own, *other));
            if ring.len() < 3 {
                break;
            }
        }

        let polygon = Polygon::new(LineString::from(ring), vec![]);
        if polygon.exterior().0.len() > 3 && polygon.unsigned_area() > MIN_CELL_AREA {
            cells.push(Cell { seed: i, polygon });
            continue;
        }
        let node = seeds[i];
        if bounds.contains(&node.coordinates) {
            return Err(ForecastError::degenerate(format!(
                "cell of node {} collapsed to zero area",
                node.id
            )));
        }
        warn!(
            "Skipping node {} at {:?}: its cell does not reach into the bounding region",
            node.id, node.coordinates
        );
    }

    if cells.is_empty() {
        return Err(ForecastError::degenerate("no node owns any area inside the bounds"));
    }

    let mut neighbors: Vec<BTreeSet<SectorId>> = vec![BTreeSet::new(); cells.len()];
    for a in 0..cells.len() {
        for b in (a + 1)..cells.len() {
            let (i, j) = (cells[a].seed, cells[b].seed);
            let shared = has_edge_on(&cells[a].polygon, &Bisector::between(points[i], points[j]))
                || has_edge_on(&cells[b].polygon, &Bisector::between(points[j], points[i]));
            if shared {
                neighbors[a].insert(sector_id_for(&seeds[j].id));
                neighbors[b].insert(sector_id_for(&seeds[i].id));
            }
        }
    }

    let mut sectors = SectorMap::new();
    for (cell, adjacent) in cells.into_iter().zip(neighbors) {
        let node = seeds[cell.seed];
        let centroid = cell
            .polygon
            .centroid()
            .map(|p| Coordinates::new(p.y(), p.x()))
            .ok_or_else(|| {
                ForecastError::degenerate(format!("cell of node {} has no centroid", node.id))
            })?;
        let area = cell.polygon.unsigned_area();
        // Polygon rings are closed; the boundary does not repeat the first vertex.
        let ring = &cell.polygon.exterior().0;
        let boundary = ring[..ring.len() - 1].iter().map(coordinates_of).collect();
        let sector = new_sector(node, centroid, boundary, area, adjacent, now);
        sectors.insert(sector.id.clone(), sector);
    }

    debug!(
        "Partitioned {} nodes into {} sectors",
        nodes.len(),
        sectors.len()
    );
    Ok(sectors)
}

fn check_distinct(seeds: &[&SensorNode]) -> ForecastResult<()> {
    // ---
    // seeds are sorted by id, so duplicate ids are adjacent
    for pair in seeds.windows(2) {
        if pair[0].id == pair[1].id {
            return Err(ForecastError::degenerate(format!(
                "duplicate node id {}",
                pair[0].id
            )));
        }
    }

    let mut by_position: Vec<&SensorNode> = seeds.to_vec();
    by_position.sort_by(|a, b| {
        a.coordinates
            .latitude
            .total_cmp(&b.coordinates.latitude)
            .then(a.coordinates.longitude.total_cmp(&b.coordinates.longitude))
            .then(a.id.cmp(&b.id))
    });
    for pair in by_position.windows(2) {
        if pair[0].coordinates == pair[1].coordinates {
            warn!(
                "Nodes {} and {} share coordinates {:?}",
                pair[0].id, pair[1].id, pair[0].coordinates
            );
            return Err(ForecastError::degenerate(format!(
                "nodes {} and {} share coordinates",
                pair[0].id, pair[1].id
            )));
        }
    }
    Ok(())
}

fn new_sector(
    node: &SensorNode,
    centroid: Coordinates,
    boundary: Vec<Coordinates>,
    area: f64,
    neighbors: BTreeSet<SectorId>,
    now: DateTime<Utc>,
) -> Sector {
    // ---
    let name = if node.name.trim().is_empty() {
        node.id.clone()
    } else {
        node.name.clone()
    };
    Sector {
        id: sector_id_for(&node.id),
        node_id: node.id.clone(),
        name,
        centroid,
        boundary,
        area,
        neighbors,
        current_probability: 0.0,
        confidence: 0.0,
        prediction_source: PredictionSource::Ground,
        alert_level: alert_level(0.0),
        cloudburst_detected: false,
        cloudburst_confidence: 0.0,
        aerial_deployed: false,
        last_updated: now,
    }
}

/// Sutherland–Hodgman clip of a convex ring against one half-plane.
fn clip(ring: &[Coord<f64>], line: &Bisector) -> Vec<Coord<f64>> {
    // ---
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(ring.len() + 1);
    for (idx, &current) in ring.iter().enumerate() {
        let next = ring[(idx + 1) % ring.len()];
        let dc = line.signed_distance(current);
        let dn = line.signed_distance(next);

        if dc <= ON_LINE_EPS {
            push_distinct(&mut out, current);
        }
        let crosses = (dc < -ON_LINE_EPS && dn > ON_LINE_EPS)
            || (dc > ON_LINE_EPS && dn < -ON_LINE_EPS);
        if crosses {
            let t = dc / (dc - dn);
            push_distinct(&mut out, current + (next - current) * t);
        }
    }
    if out.len() > 1 && distance(out[0], out[out.len() - 1]) <= ON_LINE_EPS {
        out.pop();
    }
    out
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn push_distinct(out: &mut Vec<Coord<f64>>, p: Coord<f64>) {
    if out.last().map_or(true, |last| distance(*last, p) > ON_LINE_EPS) {
        out.push(p);
    }
}

fn has_edge_on(cell: &Polygon<f64>, line: &Bisector) -> bool {
    // ---
    cell.exterior().lines().any(|edge| {
        distance(edge.start, edge.end) > MIN_SHARED_EDGE
            && line.signed_distance(edge.start).abs() <= MIN_SHARED_EDGE
            && line.signed_distance(edge.end).abs() <= MIN_SHARED_EDGE
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{NodeKind, NodeStatus};
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 9, 30, 0).unwrap()
    }

    fn node(id: &str, latitude: f64, longitude: f64) -> SensorNode {
        SensorNode {
            id: id.to_string(),
            name: format!("Station {id}"),
            coordinates: Coordinates::new(latitude, longitude),
            kind: NodeKind::Sensor,
            status: NodeStatus::Online,
        }
    }

    fn square() -> BoundingRegion {
        BoundingRegion::new(0.0, 0.0, 10.0, 10.0).unwrap()
    }

    fn ids(sector: &Sector) -> Vec<&str> {
        sector.neighbors.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_single_node_covers_bounds() {
        // ---
        let sectors = partition(&[node("a", 3.0, 4.0)], &square(), ts()).unwrap();
        assert_eq!(sectors.len(), 1);

        let only = &sectors["sector-a"];
        assert!(only.neighbors.is_empty());
        assert_eq!(only.boundary, square().corners());
        assert!((only.centroid.latitude - 5.0).abs() < 1e-9);
        assert!((only.centroid.longitude - 5.0).abs() < 1e-9);
        assert!((only.area - 100.0).abs() < 1e-9);
        assert!((only.polygon().unsigned_area() - only.area).abs() < 1e-9);
        assert_eq!(only.node_id, "a");
    }

    #[test]
    fn test_two_nodes_split_along_bisector() {
        // ---
        let nodes = [node("a", 5.0, 2.0), node("b", 5.0, 8.0)];
        let sectors = partition(&nodes, &square(), ts()).unwrap();
        let a = &sectors["sector-a"];
        let b = &sectors["sector-b"];

        assert_eq!(ids(a), vec!["sector-b"]);
        assert_eq!(ids(b), vec!["sector-a"]);
        assert!((a.area - 50.0).abs() < 1e-9);
        assert!((b.area - 50.0).abs() < 1e-9);
        assert!((a.centroid.longitude - 2.5).abs() < 1e-9);
        assert!((b.centroid.longitude - 7.5).abs() < 1e-9);
        assert!((a.centroid.latitude - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_row_of_three_only_links_consecutive_cells() {
        // ---
        let nodes = [node("a", 5.0, 1.0), node("b", 5.0, 5.0), node("c", 5.0, 9.0)];
        let sectors = partition(&nodes, &square(), ts()).unwrap();

        assert_eq!(ids(&sectors["sector-a"]), vec!["sector-b"]);
        assert_eq!(ids(&sectors["sector-b"]), vec!["sector-a", "sector-c"]);
        assert_eq!(ids(&sectors["sector-c"]), vec!["sector-b"]);
    }

    #[test]
    fn test_grid_corners_touching_at_a_point_are_not_neighbors() {
        // ---
        let mut nodes = Vec::new();
        for (r, lat) in [2.0, 5.0, 8.0].iter().enumerate() {
            for (c, lon) in [2.0, 5.0, 8.0].iter().enumerate() {
                nodes.push(node(&format!("{r}{c}"), *lat, *lon));
            }
        }
        let sectors = partition(&nodes, &square(), ts()).unwrap();

        let center = &sectors["sector-11"];
        assert_eq!(
            ids(center),
            vec!["sector-01", "sector-10", "sector-12", "sector-21"]
        );
        assert!((center.area - 9.0).abs() < 1e-9);

        let corner = &sectors["sector-00"];
        assert_eq!(ids(corner), vec!["sector-01", "sector-10"]);
    }

    #[test]
    fn test_neighbor_relation_is_symmetric() {
        // ---
        let nodes = [
            node("a", 1.3, 2.2),
            node("b", 7.9, 3.1),
            node("c", 4.4, 8.8),
            node("d", 5.0, 5.0),
            node("e", 9.1, 9.4),
            node("f", 0.7, 7.6),
        ];
        let sectors = partition(&nodes, &square(), ts()).unwrap();
        for (id, sector) in &sectors {
            for other in &sector.neighbors {
                assert!(sectors[other].neighbors.contains(id), "{id} -> {other} not mirrored");
            }
            assert!(!sector.neighbors.contains(id));
        }
    }

    #[test]
    fn test_partition_is_independent_of_input_order() {
        // ---
        let nodes = vec![node("a", 1.0, 1.0), node("b", 6.0, 2.0), node("c", 3.0, 8.0)];
        let mut reversed = nodes.clone();
        reversed.reverse();

        let first = partition(&nodes, &square(), ts()).unwrap();
        let second = partition(&reversed, &square(), ts()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_degenerate_inputs_are_rejected() {
        // ---
        let err = partition(&[], &square(), ts()).unwrap_err();
        assert!(matches!(err, ForecastError::DegenerateInput { .. }));

        let coincident = [node("a", 5.0, 5.0), node("b", 5.0, 5.0)];
        let err = partition(&coincident, &square(), ts()).unwrap_err();
        assert!(matches!(err, ForecastError::DegenerateInput { .. }));

        let duplicate_id = [node("a", 1.0, 1.0), node("a", 8.0, 8.0)];
        let err = partition(&duplicate_id, &square(), ts()).unwrap_err();
        assert!(matches!(err, ForecastError::DegenerateInput { .. }));
    }

    #[test]
    fn test_node_just_outside_bounds_owns_its_clipped_cell() {
        // ---
        let nodes = [node("a", 5.0, 5.0), node("b", 10.5, 5.0)];
        let sectors = partition(&nodes, &square(), ts()).unwrap();

        let b = &sectors["sector-b"];
        assert!((b.area - 22.5).abs() < 1e-9);
        assert!((b.centroid.latitude - 8.875).abs() < 1e-9);
        assert_eq!(ids(b), vec!["sector-a"]);
        assert_eq!(ids(&sectors["sector-a"]), vec!["sector-b"]);
        assert!((sectors["sector-a"].area - 77.5).abs() < 1e-9);
    }

    #[test]
    fn test_outside_node_without_area_is_skipped() {
        // ---
        // b's bisector with a runs along the box edge: zero-width strip
        let on_edge = [node("a", 5.0, 5.0), node("b", 5.0, 15.0)];
        let sectors = partition(&on_edge, &square(), ts()).unwrap();
        assert_eq!(sectors.keys().collect::<Vec<_>>(), vec!["sector-a"]);
        assert!(sectors["sector-a"].neighbors.is_empty());
        assert!((sectors["sector-a"].area - 100.0).abs() < 1e-9);

        let far = [node("a", 5.0, 5.0), node("b", 50.0, 5.0)];
        let sectors = partition(&far, &square(), ts()).unwrap();
        assert_eq!(sectors.keys().collect::<Vec<_>>(), vec!["sector-a"]);
    }

    #[test]
    fn test_adding_a_distant_node_keeps_unaffected_topology() {
        // ---
        let cluster = vec![
            node("a", 1.0, 1.0),
            node("b", 1.0, 3.0),
            node("c", 3.0, 1.0),
            node("d", 3.0, 3.0),
        ];
        let before = partition(&cluster, &square(), ts()).unwrap();

        let mut grown = cluster.clone();
        grown.push(node("e", 9.5, 9.5));
        let after = partition(&grown, &square(), ts()).unwrap();

        for id in ["sector-a", "sector-b", "sector-c"] {
            assert_eq!(before[id].neighbors, after[id].neighbors, "{id} neighbours changed");
            assert_eq!(before[id].boundary, after[id].boundary, "{id} cell changed");
        }
        assert_eq!(ids(&before["sector-d"]), vec!["sector-b", "sector-c"]);
        assert_eq!(ids(&after["sector-d"]), vec!["sector-b", "sector-c", "sector-e"]);
        assert_eq!(ids(&after["sector-e"]), vec!["sector-d"]);
    }

    #[test]
    fn test_invalid_coordinates_are_skipped() {
        // ---
        let nodes = [node("bad", f64::NAN, 2.0), node("good", 4.0, 4.0)];
        let sectors = partition(&nodes, &square(), ts()).unwrap();
        assert_eq!(sectors.keys().collect::<Vec<_>>(), vec!["sector-good"]);

        let err = partition(&[node("bad", 95.0, 0.0)], &square(), ts()).unwrap_err();
        assert!(matches!(err, ForecastError::DegenerateInput { .. }));
    }

    #[test]
    fn test_invalid_bounds() {
        // ---
        assert!(BoundingRegion::new(10.0, 0.0, 0.0, 10.0).is_err());
        assert!(BoundingRegion::new(0.0, 0.0, 91.0, 10.0).is_err());
        let bad = BoundingRegion {
            min_latitude: 0.0,
            min_longitude: 0.0,
            max_latitude: 0.0,
            max_longitude: 1.0,
        };
        assert!(matches!(
            partition(&[node("a", 0.0, 0.5)], &bad, ts()),
            Err(ForecastError::InvalidBounds { .. })
        ));
    }
}
