//! Sector/region store boundary and the partial-update builder.
//!
//! The engine never owns state; the service keeps one [`InMemoryStore`]
//! behind a lock and hands frozen snapshots (`list_sectors`) to the engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fusion::{fuse_readings, AerialFactors, FusionConfig, GroundFactors};
use crate::models::{
    clamp_confidence, AlertHistoryItem, PredictionSource, ProbabilityPoint, RainfallData, Sector,
    SectorId, SectorMap, SectorReadings, SensorNode, WeatherData, WindData,
};

/// History points kept per sector.
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

// ---

/// Read/write surface the forecast loop needs from a region store.
pub trait SectorStore {
    fn get_sector(&self, id: &str) -> Option<Sector>;
    fn get_node(&self, id: &str) -> Option<SensorNode>;
    fn get_wind(&self) -> Option<WindData>;
    fn list_sectors(&self) -> SectorMap;
    fn append_probability_history(&mut self, sector_id: &str, point: ProbabilityPoint);
}

/// Partial update of a sector, as accepted by the update API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorUpdate {
    // ---
    pub probability: Option<f64>,
    pub confidence: Option<f64>,
    pub prediction_source: Option<PredictionSource>,
    pub cloudburst_detected: Option<bool>,
    pub cloudburst_confidence: Option<f64>,
    pub aerial_deployed: Option<bool>,
}

impl SectorUpdate {
    pub fn is_empty(&self) -> bool {
        *self == SectorUpdate::default()
    }

    /// Full replacement record: `sector` with every present field applied.
    /// A probability override may lower risk, unlike propagation.
    pub fn apply(&self, sector: &Sector, now: DateTime<Utc>) -> Sector {
        // ---
        if self.is_empty() {
            return sector.clone();
        }
        let base = match self.probability {
            Some(p) => sector.with_probability(p),
            None => sector.clone(),
        };
        Sector {
            confidence: self
                .confidence
                .map_or(base.confidence, clamp_confidence),
            prediction_source: self.prediction_source.unwrap_or(base.prediction_source),
            cloudburst_detected: self.cloudburst_detected.unwrap_or(base.cloudburst_detected),
            cloudburst_confidence: self
                .cloudburst_confidence
                .map_or(base.cloudburst_confidence, clamp_confidence),
            aerial_deployed: self.aerial_deployed.unwrap_or(base.aerial_deployed),
            last_updated: now,
            ..base
        }
    }
}

/// Sector detail response of the read API.
#[derive(Debug, Clone, Serialize)]
pub struct SectorDetail {
    // ---
    pub sector: Sector,
    pub weather: Option<WeatherData>,
    pub rainfall: Option<RainfallData>,
    pub wind: Option<WindData>,
    pub history: Vec<ProbabilityPoint>,
    pub timestamp: DateTime<Utc>,
}

/// Prediction breakdown response of the read API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionBreakdown {
    // ---
    pub sector_id: SectorId,
    pub ground_factors: GroundFactors,
    pub aerial_factors: Option<AerialFactors>,
    pub combined_probability: f64,
    pub confidence: f64,
    pub source: PredictionSource,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot store held by the service.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    // ---
    nodes: BTreeMap<String, SensorNode>,
    sectors: SectorMap,
    readings: BTreeMap<SectorId, SectorReadings>,
    wind: Option<WindData>,
    history: BTreeMap<SectorId, Vec<ProbabilityPoint>>,
    alerts: Vec<AlertHistoryItem>,
    history_limit: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl InMemoryStore {
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            nodes: BTreeMap::new(),
            sectors: SectorMap::new(),
            readings: BTreeMap::new(),
            wind: None,
            history: BTreeMap::new(),
            alerts: Vec::new(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn nodes(&self) -> Vec<SensorNode> {
        self.nodes.values().cloned().collect()
    }

    pub fn set_nodes(&mut self, nodes: Vec<SensorNode>) {
        self.nodes = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
    }

    /// Swap in a new sector map. History and readings of sectors that no
    /// longer exist are dropped.
    pub fn replace_sectors(&mut self, sectors: SectorMap) {
        // ---
        self.history.retain(|id, _| sectors.contains_key(id));
        self.readings.retain(|id, _| sectors.contains_key(id));
        self.sectors = sectors;
    }

    pub fn set_wind(&mut self, wind: Option<WindData>) {
        self.wind = wind;
    }

    pub fn readings(&self, sector_id: &str) -> SectorReadings {
        self.readings.get(sector_id).cloned().unwrap_or_default()
    }

    pub fn all_readings(&self) -> BTreeMap<SectorId, SectorReadings> {
        self.readings.clone()
    }

    pub fn set_readings(&mut self, sector_id: &str, readings: SectorReadings) {
        self.readings.insert(sector_id.to_string(), readings);
    }

    pub fn history(&self, sector_id: &str) -> &[ProbabilityPoint] {
        self.history.get(sector_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn alerts(&self) -> &[AlertHistoryItem] {
        &self.alerts
    }

    pub fn alert(&self, id: Uuid) -> Option<&AlertHistoryItem> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn record_alert(&mut self, alert: AlertHistoryItem) {
        // Transitions arrive as new records with the same id.
        match self.alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(existing) => *existing = alert,
            None => self.alerts.push(alert),
        }
    }

    /// Apply an update API request. Returns the new sector, or `None` when
    /// the id is unknown. Probability changes append a history point.
    pub fn update_sector(
        &mut self,
        id: &str,
        update: &SectorUpdate,
        now: DateTime<Utc>,
    ) -> Option<Sector> {
        // ---
        let current = self.sectors.get(id)?;
        let updated = update.apply(current, now);
        if update.probability.is_some() {
            self.append_probability_history(
                id,
                ProbabilityPoint {
                    probability: updated.current_probability,
                    timestamp: now,
                },
            );
        }
        self.sectors.insert(id.to_string(), updated.clone());
        Some(updated)
    }

    pub fn sector_detail(&self, id: &str, now: DateTime<Utc>) -> Option<SectorDetail> {
        // ---
        let sector = self.sectors.get(id)?.clone();
        let readings = self.readings(id);
        Some(SectorDetail {
            sector,
            weather: readings.weather,
            rainfall: readings.rainfall,
            wind: self.wind.clone(),
            history: self.history(id).to_vec(),
            timestamp: now,
        })
    }

    pub fn prediction_breakdown(
        &self,
        id: &str,
        now: DateTime<Utc>,
        config: &FusionConfig,
    ) -> Option<PredictionBreakdown> {
        // ---
        if !self.sectors.contains_key(id) {
            return None;
        }
        let fused = fuse_readings(&self.readings(id), now, config);
        Some(PredictionBreakdown {
            sector_id: id.to_string(),
            ground_factors: fused.ground_factors,
            aerial_factors: fused.aerial_factors,
            combined_probability: fused.combined_probability,
            confidence: fused.confidence,
            source: fused.source,
            timestamp: now,
        })
    }
}

impl SectorStore for InMemoryStore {
    fn get_sector(&self, id: &str) -> Option<Sector> {
        self.sectors.get(id).cloned()
    }

    fn get_node(&self, id: &str) -> Option<SensorNode> {
        self.nodes.get(id).cloned()
    }

    fn get_wind(&self) -> Option<WindData> {
        self.wind.clone()
    }

    fn list_sectors(&self) -> SectorMap {
        self.sectors.clone()
    }

    fn append_probability_history(&mut self, sector_id: &str, point: ProbabilityPoint) {
        // ---
        let points = self.history.entry(sector_id.to_string()).or_default();
        points.push(point);
        if points.len() > self.history_limit {
            let excess = points.len() - self.history_limit;
            points.drain(..excess);
        }
    }
}
