//! Per-tick sequencing of fusion, cascade and event application.
//!
//! [`Forecaster`] is the only stateful piece of the library: it remembers
//! the readings each sector was last fused from and which propagation events
//! are not yet due. Sector state itself stays with the caller; each tick takes a
//! snapshot and returns a new map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::fusion::{detect_cloudburst, fuse_readings, FusionConfig};
use crate::models::{
    AlertHistoryItem, AlertLevel, ProbabilityPoint, PropagationEvent, Sector, SectorId, SectorMap,
    SectorReadings, WindData,
};
use crate::propagation::{apply_events, cascade, partition_due, PropagationConfig};

// ---

/// Engine tunables for one forecast deployment.
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    // ---
    pub fusion: FusionConfig,
    pub propagation: PropagationConfig,
    /// Fused probability (percent) at which a sector seeds a cascade.
    pub trigger_probability: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            propagation: PropagationConfig::default(),
            trigger_probability: 70.0,
        }
    }
}

/// Plain records for the event stream collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForecastNotification {
    ProbabilityUpdate {
        #[serde(rename = "sectorId")]
        sector_id: SectorId,
        probability: f64,
        previous: f64,
        #[serde(rename = "alertLevel")]
        alert_level: AlertLevel,
        timestamp: DateTime<Utc>,
    },
    WindUpdate {
        wind: WindData,
    },
    AlertTriggered {
        alert: AlertHistoryItem,
    },
}

/// Everything one tick produced.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    // ---
    pub sectors: SectorMap,
    /// Events newly scheduled by this tick's cascades.
    pub scheduled: Vec<PropagationEvent>,
    /// Events merged into `sectors` this tick.
    pub applied: Vec<PropagationEvent>,
    /// Pending events dropped because their target no longer exists.
    pub expired: usize,
    pub alerts: Vec<AlertHistoryItem>,
    pub history: Vec<(SectorId, ProbabilityPoint)>,
    pub notifications: Vec<ForecastNotification>,
}

/// Stateful driver around the pure engines.
#[derive(Debug, Clone, Default)]
pub struct Forecaster {
    // ---
    config: ForecastConfig,
    pending: Vec<PropagationEvent>,
    fused_inputs: BTreeMap<SectorId, SectorReadings>,
    last_wind: Option<WindData>,
}

impl Forecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Events scheduled but not yet applied.
    pub fn pending(&self) -> &[PropagationEvent] {
        &self.pending
    }

    /// Run one forecast tick over a frozen snapshot.
    pub fn tick(
        &mut self,
        snapshot: &SectorMap,
        readings: &BTreeMap<SectorId, SectorReadings>,
        wind: Option<&WindData>,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        // ---
        let mut outcome = TickOutcome::default();

        // Step 1: fuse sectors whose readings differ from the last fusion.
        // A reading that disappears (payload unassigned) counts as a change.
        let mut fused = snapshot.clone();
        let mut refreshed: Vec<SectorId> = Vec::new();
        for (id, sector) in snapshot {
            let Some(sector_readings) = readings.get(id) else {
                continue;
            };
            let previous = self.fused_inputs.get(id);
            if previous == Some(sector_readings) {
                continue;
            }
            if previous.is_none() && sector_readings.latest_timestamp().is_none() {
                continue;
            }
            fused.insert(id.clone(), self.fuse_sector(sector, sector_readings, now));
            self.fused_inputs.insert(id.clone(), sector_readings.clone());
            refreshed.push(id.clone());
        }

        // Step 2: cascade from freshly fused sectors that cross the trigger.
        if let Some(wind) = wind {
            for id in &refreshed {
                let source = &fused[id];
                if !self.is_trigger(source) {
                    continue;
                }
                let result = cascade(source, &fused, wind, now, &self.config.propagation);
                info!(
                    "Sector {} at {:.1}% seeded {} propagation events",
                    id,
                    source.current_probability,
                    result.events.len()
                );
                outcome.scheduled.extend(result.events);
            }
        }
        self.pending.extend(outcome.scheduled.iter().cloned());

        // Step 3: expire orphaned events and apply the due ones.
        let before = self.pending.len();
        self.pending
            .retain(|e| fused.contains_key(&e.target_sector_id));
        outcome.expired = before - self.pending.len();

        let (due, pending) = partition_due(std::mem::take(&mut self.pending), now);
        self.pending = pending;
        let sectors = apply_events(&fused, &due);
        outcome.applied = due;

        // Step 4: deltas for the alerting and persistence collaborators.
        self.collect_deltas(snapshot, &sectors, now, &mut outcome);
        if let Some(wind) = wind {
            if self.last_wind.as_ref() != Some(wind) {
                outcome
                    .notifications
                    .push(ForecastNotification::WindUpdate { wind: wind.clone() });
                self.last_wind = Some(wind.clone());
            }
        }

        debug!(
            "Tick at {}: {} fused, {} scheduled, {} applied, {} pending, {} expired",
            now,
            refreshed.len(),
            outcome.scheduled.len(),
            outcome.applied.len(),
            self.pending.len(),
            outcome.expired
        );

        outcome.sectors = sectors;
        outcome
    }

    /// Replacement for `sector` reflecting a fresh fusion run.
    fn fuse_sector(
        &self,
        sector: &Sector,
        readings: &SectorReadings,
        now: DateTime<Utc>,
    ) -> Sector {
        // ---
        let result = fuse_readings(readings, now, &self.config.fusion);
        let detection = detect_cloudburst(readings.rainfall.as_ref());
        Sector {
            confidence: result.confidence,
            prediction_source: result.source,
            cloudburst_detected: detection.detected,
            cloudburst_confidence: detection.confidence,
            aerial_deployed: readings.aerial.is_some(),
            last_updated: now,
            ..sector.with_probability(result.combined_probability)
        }
    }

    fn is_trigger(&self, sector: &Sector) -> bool {
        sector.cloudburst_detected || sector.current_probability >= self.config.trigger_probability
    }

    fn collect_deltas(
        &self,
        before: &SectorMap,
        after: &SectorMap,
        now: DateTime<Utc>,
        outcome: &mut TickOutcome,
    ) {
        // ---
        for (id, sector) in after {
            let (previous, previous_level) = before
                .get(id)
                .map_or((0.0, AlertLevel::Low), |s| (s.current_probability, s.alert_level));

            if sector.current_probability != previous {
                outcome.history.push((
                    id.clone(),
                    ProbabilityPoint {
                        probability: sector.current_probability,
                        timestamp: now,
                    },
                ));
                outcome
                    .notifications
                    .push(ForecastNotification::ProbabilityUpdate {
                        sector_id: id.clone(),
                        probability: sector.current_probability,
                        previous,
                        alert_level: sector.alert_level,
                        timestamp: now,
                    });
            }

            if sector.alert_level.is_alerting() && sector.alert_level > previous_level {
                let alert = AlertHistoryItem::raise(sector, now);
                info!(
                    "Alert {:?} raised for sector {} at {:.1}%",
                    alert.severity, id, sector.current_probability
                );
                outcome
                    .notifications
                    .push(ForecastNotification::AlertTriggered {
                        alert: alert.clone(),
                    });
                outcome.alerts.push(alert);
            }
        }
    }
}

/// Carry risk state from `previous` into a freshly partitioned map for every
/// sector id present in both. Geometry (boundary, centroid, neighbours)
/// always comes from `fresh`.
pub fn carry_over_risk(previous: &SectorMap, fresh: SectorMap) -> SectorMap {
    // ---
    fresh
        .into_iter()
        .map(|(id, sector)| {
            let merged = match previous.get(&id) {
                Some(old) => Sector {
                    current_probability: old.current_probability,
                    confidence: old.confidence,
                    prediction_source: old.prediction_source,
                    alert_level: old.alert_level,
                    cloudburst_detected: old.cloudburst_detected,
                    cloudburst_confidence: old.cloudburst_confidence,
                    aerial_deployed: old.aerial_deployed,
                    last_updated: old.last_updated,
                    ..sector
                },
                None => sector,
            };
            (id, merged)
        })
        .collect()
}
