//! Downwind risk propagation between adjacent sectors.
//!
//! A single hop scales the source probability by how well the wind lines up
//! with the bearing to the neighbour and by how far apart the two centroids
//! are, and schedules the transfer for when the air mass arrives. The
//! cascade repeats this breadth-first over the sector graph within a hop
//! budget. Nothing here holds a clock: callers pass `now` and later apply the
//! events that have become due.

use std::collections::{BTreeSet, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::geodesy::angle_difference;
use crate::models::{PropagationEvent, Sector, SectorId, SectorMap, WindData};

/// Wind factor for a neighbour lying within 45° of the wind direction.
pub const DOWNWIND_FACTOR: f64 = 0.8;
/// Wind factor for 45°–90°.
pub const CROSSWIND_FAVORABLE_FACTOR: f64 = 0.5;
/// Wind factor for 90°–135°.
pub const CROSSWIND_FACTOR: f64 = 0.3;
/// Wind factor beyond 135°.
pub const UPWIND_FACTOR: f64 = 0.1;

// ---

/// Tunables for propagation.
#[derive(Debug, Clone)]
pub struct PropagationConfig {
    // ---
    /// Events below this probability (percent) are discarded.
    pub min_probability: f64,
    /// Decay coefficient per kilometre in `1 / (1 + km * k)`.
    pub decay_per_km: f64,
    /// Converts m/s into km per minute (`60 / 1000`).
    pub speed_factor: f64,
    /// Half-angle of the downwind cone, degrees.
    pub downwind_threshold: f64,
    /// Hop budget of a cascade.
    pub max_hops: usize,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            min_probability: 1.0,
            decay_per_km: 0.2,
            speed_factor: 0.06,
            downwind_threshold: 45.0,
            max_hops: 4,
        }
    }
}

/// Events and touched sectors of one cascade run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeResult {
    // ---
    pub events: Vec<PropagationEvent>,
    /// Targets reached, never including the cascade source.
    pub affected_sectors: BTreeSet<SectorId>,
}

/// Four-tier step function of the angle between wind and bearing.
/// Boundaries belong to the lower (more favourable) tier.
pub fn wind_factor(angle_diff: f64) -> f64 {
    // ---
    if angle_diff <= 45.0 {
        DOWNWIND_FACTOR
    } else if angle_diff <= 90.0 {
        CROSSWIND_FAVORABLE_FACTOR
    } else if angle_diff <= 135.0 {
        CROSSWIND_FACTOR
    } else {
        UPWIND_FACTOR
    }
}

/// `1 / (1 + km * k)`, in `(0, 1]` for non-negative distances.
pub fn distance_decay(distance_km: f64, config: &PropagationConfig) -> f64 {
    1.0 / (1.0 + distance_km.max(0.0) * config.decay_per_km)
}

/// Travel time of the air mass in minutes; infinite without wind.
pub fn delay_minutes(distance_km: f64, wind_speed: f64, config: &PropagationConfig) -> f64 {
    if wind_speed > 0.0 {
        distance_km / (wind_speed * config.speed_factor)
    } else {
        f64::INFINITY
    }
}

/// Project `source`'s risk onto one neighbour.
///
/// Returns `None` when the result falls under the minimum probability or the
/// delay is not finite (no wind).
pub fn propagate_to_neighbor(
    source: &Sector,
    target: &Sector,
    wind: &WindData,
    now: DateTime<Utc>,
    config: &PropagationConfig,
) -> Option<PropagationEvent> {
    // ---
    let bearing = source.centroid.bearing_to(&target.centroid);
    let factor = wind_factor(angle_difference(wind.direction, bearing));
    let distance_km = source.centroid.distance_km(&target.centroid);
    let decay = distance_decay(distance_km, config);
    let delay = delay_minutes(distance_km, wind.speed, config);
    let probability = source.current_probability * factor * decay;

    if !delay.is_finite() || delay <= 0.0 {
        trace!(
            "No transfer {} -> {}: delay {} min",
            source.id,
            target.id,
            delay
        );
        return None;
    }
    if probability < config.min_probability {
        trace!(
            "No transfer {} -> {}: {:.3}% under threshold",
            source.id,
            target.id,
            probability
        );
        return None;
    }

    let scheduled = Duration::try_milliseconds((delay * 60_000.0).round() as i64)
        .and_then(|offset| now.checked_add_signed(offset));
    let Some(scheduled_time) = scheduled else {
        trace!(
            "No transfer {} -> {}: delay {} min overflows the clock",
            source.id,
            target.id,
            delay
        );
        return None;
    };

    Some(PropagationEvent {
        source_sector_id: source.id.clone(),
        target_sector_id: target.id.clone(),
        propagated_probability: probability,
        wind_factor: factor,
        distance_decay: decay,
        distance_km,
        delay_minutes: delay,
        scheduled_time,
    })
}

/// [`propagate_to_neighbor`] for every neighbour of `source` present in
/// `all_sectors`, in neighbour id order.
pub fn propagate_from_sector(
    source: &Sector,
    all_sectors: &SectorMap,
    wind: &WindData,
    now: DateTime<Utc>,
    config: &PropagationConfig,
) -> Vec<PropagationEvent> {
    // ---
    source
        .neighbors
        .iter()
        .filter_map(|id| match all_sectors.get(id) {
            Some(target) => propagate_to_neighbor(source, target, wind, now, config),
            None => {
                warn!(
                    "Sector {} lists neighbour {} missing from the snapshot",
                    source.id, id
                );
                None
            }
        })
        .collect()
}

/// Breadth-first multi-hop propagation from `source`.
///
/// Each sector is reached at most once; the first path dequeued wins even
/// if a later path would carry a higher probability. Each hop is scheduled
/// from the arrival time of the hop before it.
pub fn cascade(
    source: &Sector,
    all_sectors: &SectorMap,
    wind: &WindData,
    now: DateTime<Utc>,
    config: &PropagationConfig,
) -> CascadeResult {
    // ---
    let mut result = CascadeResult::default();

    let mut visited: HashSet<SectorId> = HashSet::new();
    visited.insert(source.id.clone());

    let mut queue: VecDeque<(SectorId, usize, f64, DateTime<Utc>)> = VecDeque::new();
    queue.push_back((source.id.clone(), 0, source.current_probability, now));

    while let Some((sector_id, hop, probability, departs)) = queue.pop_front() {
        if hop >= config.max_hops {
            continue;
        }

        let current = if sector_id == source.id {
            source
        } else {
            match all_sectors.get(&sector_id) {
                Some(sector) => sector,
                None => continue,
            }
        };

        let carrier = Sector {
            current_probability: probability,
            ..current.clone()
        };

        for event in propagate_from_sector(&carrier, all_sectors, wind, departs, config) {
            if !visited.insert(event.target_sector_id.clone()) {
                continue;
            }
            result
                .affected_sectors
                .insert(event.target_sector_id.clone());
            queue.push_back((
                event.target_sector_id.clone(),
                hop + 1,
                event.propagated_probability,
                event.scheduled_time,
            ));
            result.events.push(event);
        }
    }

    debug!(
        "Cascade from {} produced {} events over {} sectors",
        source.id,
        result.events.len(),
        result.affected_sectors.len()
    );
    result
}

/// Merge events into a new sector map.
///
/// A target's probability becomes `max(existing, propagated)`; propagation
/// never lowers risk. `last_updated` moves to the event's scheduled time
/// only when the probability actually rises. Events for unknown sectors are
/// ignored.
pub fn apply_events(sectors: &SectorMap, events: &[PropagationEvent]) -> SectorMap {
    // ---
    let mut updated = sectors.clone();
    for event in events {
        let Some(target) = updated.get(&event.target_sector_id) else {
            warn!(
                "Dropping event for unknown sector {}",
                event.target_sector_id
            );
            continue;
        };
        if event.propagated_probability <= target.current_probability {
            continue;
        }
        let raised = Sector {
            last_updated: event.scheduled_time,
            ..target.with_probability(event.propagated_probability)
        };
        updated.insert(raised.id.clone(), raised);
    }
    updated
}

/// Events whose scheduled time is at or before `now`.
pub fn due_events(events: &[PropagationEvent], now: DateTime<Utc>) -> Vec<PropagationEvent> {
    events
        .iter()
        .filter(|e| e.scheduled_time <= now)
        .cloned()
        .collect()
}

/// Events still in the future.
pub fn pending_events(events: &[PropagationEvent], now: DateTime<Utc>) -> Vec<PropagationEvent> {
    events
        .iter()
        .filter(|e| e.scheduled_time > now)
        .cloned()
        .collect()
}

/// [`due_events`] and [`pending_events`] in one pass, as `(due, pending)`.
pub fn partition_due(
    events: Vec<PropagationEvent>,
    now: DateTime<Utc>,
) -> (Vec<PropagationEvent>, Vec<PropagationEvent>) {
    events.into_iter().partition(|e| e.scheduled_time <= now)
}

/// Sectors whose bearing from `source` lies inside the downwind cone.
/// Sorted nearest first.
pub fn downwind_sectors(
    source: &Sector,
    all_sectors: &SectorMap,
    wind: &WindData,
    config: &PropagationConfig,
) -> Vec<SectorId> {
    // ---
    let mut hits: Vec<(f64, &SectorId)> = all_sectors
        .iter()
        .filter(|(id, _)| **id != source.id)
        .filter(|(_, sector)| {
            let bearing = source.centroid.bearing_to(&sector.centroid);
            angle_difference(wind.direction, bearing) <= config.downwind_threshold
        })
        .map(|(id, sector)| (source.centroid.distance_km(&sector.centroid), id))
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    hits.into_iter().map(|(_, id)| id.clone()).collect()
}

/// Earliest scheduled arrival at `target_id` among `events`.
pub fn estimate_arrival(events: &[PropagationEvent], target_id: &str) -> Option<DateTime<Utc>> {
    events
        .iter()
        .filter(|e| e.target_sector_id == target_id)
        .map(|e| e.scheduled_time)
        .min()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::fusion::alert_level;
    use crate::models::{AlertLevel, Coordinates, PredictionSource};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 9, 30, 0).unwrap()
    }

    fn sector(id: &str, centroid: Coordinates, probability: f64, neighbors: &[&str]) -> Sector {
        Sector {
            id: id.to_string(),
            node_id: id.to_string(),
            name: id.to_uppercase(),
            centroid,
            boundary: vec![],
            area: 1.0,
            neighbors: neighbors.iter().map(|n| n.to_string()).collect(),
            current_probability: probability,
            confidence: 0.7,
            prediction_source: PredictionSource::Ground,
            alert_level: alert_level(probability),
            cloudburst_detected: false,
            cloudburst_confidence: 0.0,
            aerial_deployed: false,
            last_updated: now(),
        }
    }

    fn wind(direction: f64, speed: f64) -> WindData {
        WindData {
            speed,
            direction,
            timestamp: now(),
        }
    }

    fn origin() -> Coordinates {
        Coordinates::new(30.32, 78.03)
    }

    fn map(sectors: Vec<Sector>) -> SectorMap {
        sectors.into_iter().map(|s| (s.id.clone(), s)).collect()
    }

    /// `ids[i]` sits `5 km * i` east of the origin, linked to its neighbours.
    fn chain(ids: &[&str], probability: f64) -> SectorMap {
        let mut sectors = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            let mut links = Vec::new();
            if i > 0 {
                links.push(ids[i - 1]);
            }
            if i + 1 < ids.len() {
                links.push(ids[i + 1]);
            }
            let centroid = origin().destination(90.0, 5.0 * i as f64);
            let p = if i == 0 { probability } else { 0.0 };
            sectors.push(sector(id, centroid, p, &links));
        }
        map(sectors)
    }

    #[test]
    fn test_wind_factor_tiers() {
        // ---
        assert_eq!(wind_factor(0.0), 0.8);
        assert_eq!(wind_factor(45.0), 0.8);
        assert_eq!(wind_factor(45.1), 0.5);
        assert_eq!(wind_factor(90.0), 0.5);
        assert_eq!(wind_factor(135.0), 0.3);
        assert_eq!(wind_factor(135.1), 0.1);
        assert_eq!(wind_factor(180.0), 0.1);
    }

    #[test]
    fn test_distance_decay_and_delay() {
        // ---
        let config = PropagationConfig::default();
        assert_eq!(distance_decay(0.0, &config), 1.0);
        assert_eq!(distance_decay(5.0, &config), 0.5);
        assert!(distance_decay(10.0, &config) < distance_decay(5.0, &config));
        assert!((delay_minutes(5.0, 10.0, &config) - 8.333_333).abs() < 1e-5);
        assert!(delay_minutes(5.0, 0.0, &config).is_infinite());
    }

    #[test]
    fn test_downwind_neighbor_event() {
        // ---
        let source = sector("a", origin(), 80.0, &["b"]);
        let target = sector("b", origin().destination(10.0, 5.0), 0.0, &["a"]);
        let config = PropagationConfig::default();

        let event = propagate_to_neighbor(&source, &target, &wind(0.0, 10.0), now(), &config)
            .expect("downwind neighbour must receive risk");

        assert_eq!(event.source_sector_id, "a");
        assert_eq!(event.target_sector_id, "b");
        assert_eq!(event.wind_factor, 0.8);
        assert!((event.distance_decay - 0.5).abs() < 1e-6);
        assert!((event.propagated_probability - 32.0).abs() < 1e-4);
        assert!((event.delay_minutes - 8.333_333).abs() < 1e-4);
        // 8 min 20 s
        assert_eq!(event.scheduled_time, now() + Duration::seconds(500));
    }

    #[test]
    fn test_calm_wind_produces_no_event() {
        // ---
        let source = sector("a", origin(), 80.0, &["b"]);
        let target = sector("b", origin().destination(10.0, 5.0), 0.0, &["a"]);
        let event = propagate_to_neighbor(
            &source,
            &target,
            &wind(0.0, 0.0),
            now(),
            &PropagationConfig::default(),
        );
        assert!(event.is_none());
    }

    #[test]
    fn test_sub_threshold_probability_is_discarded() {
        // ---
        // 1.25 * 0.8 * 0.5 = 0.5
        let source = sector("a", origin(), 1.25, &["b"]);
        let target = sector("b", origin().destination(10.0, 5.0), 0.0, &["a"]);
        let event = propagate_to_neighbor(
            &source,
            &target,
            &wind(0.0, 10.0),
            now(),
            &PropagationConfig::default(),
        );
        assert!(event.is_none());
    }

    #[test]
    fn test_fan_out_skips_unknown_neighbors() {
        // ---
        let a = sector("a", origin(), 80.0, &["b", "ghost"]);
        let b = sector("b", origin().destination(90.0, 5.0), 0.0, &["a"]);
        let sectors = map(vec![a.clone(), b]);

        let events = propagate_from_sector(
            &a,
            &sectors,
            &wind(90.0, 10.0),
            now(),
            &PropagationConfig::default(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target_sector_id, "b");
    }

    #[test]
    fn test_cascade_respects_hop_budget() {
        // ---
        let sectors = chain(&["a", "b", "c", "d", "e", "f"], 80.0);
        let config = PropagationConfig::default();
        let result = cascade(&sectors["a"], &sectors, &wind(90.0, 10.0), now(), &config);

        let affected: Vec<&str> = result.affected_sectors.iter().map(String::as_str).collect();
        assert_eq!(affected, vec!["b", "c", "d", "e"]);
        assert_eq!(result.events.len(), 4);
        assert!(!result.affected_sectors.contains("a"));

        // 80 -> 32 -> 12.8 -> 5.12 -> 2.048
        let probs: Vec<f64> = result.events.iter().map(|e| e.propagated_probability).collect();
        for (got, want) in probs.iter().zip([32.0, 12.8, 5.12, 2.048]) {
            assert!((got - want).abs() < 1e-3, "got {got}, want {want}");
        }

        // Each hop departs when the previous one arrives.
        assert!(result.events.windows(2).all(|w| w[1].scheduled_time > w[0].scheduled_time));

        let short = PropagationConfig {
            max_hops: 2,
            ..PropagationConfig::default()
        };
        let result = cascade(&sectors["a"], &sectors, &wind(90.0, 10.0), now(), &short);
        assert_eq!(result.affected_sectors.len(), 2);
    }

    #[test]
    fn test_cascade_stops_below_threshold() {
        // ---
        // 5 -> 2 -> 0.8 (dropped)
        let sectors = chain(&["a", "b", "c", "d"], 5.0);
        let result = cascade(
            &sectors["a"],
            &sectors,
            &wind(90.0, 10.0),
            now(),
            &PropagationConfig::default(),
        );
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].target_sector_id, "b");
    }

    #[test]
    fn test_cascade_first_arrival_wins() {
        // ---
        // a -> {b, c} -> d; b is dequeued before c
        let a = sector("a", origin(), 90.0, &["b", "c"]);
        let b = sector("b", origin().destination(45.0, 5.0), 0.0, &["a", "d"]);
        let c = sector("c", origin().destination(135.0, 5.0), 0.0, &["a", "d"]);
        let d = sector("d", origin().destination(90.0, 7.0), 0.0, &["b", "c"]);
        let sectors = map(vec![a, b, c, d]);

        let result = cascade(
            &sectors["a"],
            &sectors,
            &wind(90.0, 10.0),
            now(),
            &PropagationConfig::default(),
        );

        let into_d: Vec<&PropagationEvent> = result
            .events
            .iter()
            .filter(|e| e.target_sector_id == "d")
            .collect();
        assert_eq!(into_d.len(), 1);
        assert_eq!(into_d[0].source_sector_id, "b");
        assert_eq!(result.affected_sectors.len(), 3);
    }

    #[test]
    fn test_cascade_without_wind_is_empty() {
        // ---
        let sectors = chain(&["a", "b", "c"], 90.0);
        let result = cascade(
            &sectors["a"],
            &sectors,
            &wind(90.0, 0.0),
            now(),
            &PropagationConfig::default(),
        );
        assert!(result.events.is_empty());
        assert!(result.affected_sectors.is_empty());
    }

    #[test]
    fn test_apply_events_is_a_monotone_merge() {
        // ---
        let sectors = map(vec![
            sector("a", origin(), 10.0, &["b"]),
            sector("b", origin().destination(90.0, 5.0), 70.0, &["a"]),
        ]);
        let later = now() + Duration::minutes(9);
        let event = |target: &str, p: f64| PropagationEvent {
            source_sector_id: "x".to_string(),
            target_sector_id: target.to_string(),
            propagated_probability: p,
            wind_factor: 0.8,
            distance_decay: 0.5,
            distance_km: 5.0,
            delay_minutes: 9.0,
            scheduled_time: later,
        };

        let updated = apply_events(
            &sectors,
            &[event("a", 65.0), event("b", 40.0), event("missing", 99.0)],
        );

        assert_eq!(updated["a"].current_probability, 65.0);
        assert_eq!(updated["a"].alert_level, AlertLevel::High);
        assert_eq!(updated["a"].last_updated, later);

        assert_eq!(updated["b"].current_probability, 70.0);
        assert_eq!(updated["b"].last_updated, now());

        assert!(!updated.contains_key("missing"));
        // Input snapshot untouched
        assert_eq!(sectors["a"].current_probability, 10.0);
    }

    #[test]
    fn test_due_and_pending_split() {
        // ---
        let sectors = chain(&["a", "b", "c"], 80.0);
        let result = cascade(
            &sectors["a"],
            &sectors,
            &wind(90.0, 10.0),
            now(),
            &PropagationConfig::default(),
        );
        let first = result.events[0].scheduled_time;

        let due = due_events(&result.events, first);
        let pending = pending_events(&result.events, first);
        assert_eq!(due.len(), 1);
        assert_eq!(pending.len(), 1);
        assert_eq!(due[0].target_sector_id, "b");

        let (due, pending) = partition_due(result.events.clone(), first);
        assert_eq!((due.len(), pending.len()), (1, 1));

        assert_eq!(estimate_arrival(&result.events, "c"), Some(pending[0].scheduled_time));
        assert_eq!(estimate_arrival(&result.events, "zzz"), None);
    }

    #[test]
    fn test_downwind_sector_lookup() {
        // ---
        let sectors = map(vec![
            sector("src", origin(), 80.0, &[]),
            sector("east-near", origin().destination(80.0, 4.0), 0.0, &[]),
            sector("east-far", origin().destination(100.0, 12.0), 0.0, &[]),
            sector("north", origin().destination(0.0, 3.0), 0.0, &[]),
            sector("west", origin().destination(270.0, 3.0), 0.0, &[]),
        ]);
        let hits = downwind_sectors(
            &sectors["src"],
            &sectors,
            &wind(90.0, 8.0),
            &PropagationConfig::default(),
        );
        assert_eq!(hits, vec!["east-near".to_string(), "east-far".to_string()]);
    }
}
