//! Typed records shared by the engine and its collaborators.
//!
//! Every record is validated once at the boundary where it enters the
//! crate (see `ingest` in the service binary); inside the engine the fields
//! below are trusted as stated.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ForecastError, ForecastResult};
use crate::fusion::alert_level;

// ---

/// Identifier of a [`Sector`].
pub type SectorId = String;

/// Sector snapshot keyed by id. Ordered so every traversal is deterministic.
pub type SectorMap = BTreeMap<SectorId, Sector>;

/// A point on Earth in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    // ---
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Both components finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn validate(&self) -> ForecastResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ForecastError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Sensor,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

/// A physical sensor or gateway that owns one forecast sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorNode {
    // ---
    pub id: String,
    pub name: String,
    pub coordinates: Coordinates,
    pub kind: NodeKind,
    pub status: NodeStatus,
}

/// Which sensor families contributed to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionSource {
    #[serde(rename = "ground")]
    Ground,
    #[serde(rename = "aerial")]
    Aerial,
    #[serde(rename = "ground+aerial")]
    GroundAerial,
}

/// Step classification of a probability; see [`alert_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Low => "low",
            AlertLevel::Moderate => "moderate",
            AlertLevel::High => "high",
            AlertLevel::Critical => "critical",
        }
    }

    /// Levels that raise an operator alert when newly reached.
    pub fn is_alerting(self) -> bool {
        self >= AlertLevel::High
    }
}

/// A spatial region of forecast responsibility owned by one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sector {
    // ---
    pub id: SectorId,
    pub node_id: String,
    pub name: String,
    pub centroid: Coordinates,
    /// Closed ring is implied; the first vertex is not repeated.
    pub boundary: Vec<Coordinates>,
    /// Planar polygon area in square degrees.
    pub area: f64,
    pub neighbors: BTreeSet<SectorId>,
    /// Percent, `[0, 100]`.
    pub current_probability: f64,
    /// `[0, 1]`.
    pub confidence: f64,
    pub prediction_source: PredictionSource,
    pub alert_level: AlertLevel,
    pub cloudburst_detected: bool,
    pub cloudburst_confidence: f64,
    pub aerial_deployed: bool,
    pub last_updated: DateTime<Utc>,
}

impl Sector {
    /// Copy of this sector carrying `probability` (clamped) and the matching
    /// alert level. `last_updated` is left untouched; callers decide whether
    /// the change counts as an update.
    pub fn with_probability(&self, probability: f64) -> Sector {
        // ---
        let probability = clamp_probability(probability);
        Sector {
            current_probability: probability,
            alert_level: alert_level(probability),
            ..self.clone()
        }
    }
}

/// Ground atmospheric reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherData {
    // ---
    /// Degrees Celsius.
    pub temperature: f64,
    /// Hectopascals.
    pub pressure: f64,
    /// Relative humidity percent.
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Ground precipitation reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RainfallData {
    // ---
    /// mm/h, never negative.
    pub rate: f64,
    /// mm accumulated over the current event.
    pub cumulative: f64,
    pub timestamp: DateTime<Utc>,
}

/// Airborne payload reading; only present while a payload is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AerialSensorData {
    // ---
    /// Metres above sea level.
    pub altitude: f64,
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
    /// Precipitable water vapour, mm.
    pub pwv: f64,
    pub timestamp: DateTime<Utc>,
}

/// Wind vector. `direction` is compared directly against the bearing to a
/// downwind sector, i.e. it names where the air mass is heading.
/// This is the opposite of the meteorological "blowing from" bearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindData {
    // ---
    /// m/s, never negative.
    pub speed: f64,
    /// Degrees `[0, 360]`.
    pub direction: f64,
    pub timestamp: DateTime<Utc>,
}

/// Latest readings known for one sector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorReadings {
    // ---
    pub weather: Option<WeatherData>,
    pub rainfall: Option<RainfallData>,
    pub aerial: Option<AerialSensorData>,
}

impl SectorReadings {
    /// Newest timestamp across the present readings.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        [
            self.weather.as_ref().map(|w| w.timestamp),
            self.rainfall.as_ref().map(|r| r.timestamp),
            self.aerial.as_ref().map(|a| a.timestamp),
        ]
        .into_iter()
        .flatten()
        .max()
    }
}

/// One projected transfer of risk from a sector to a neighbour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationEvent {
    // ---
    pub source_sector_id: SectorId,
    pub target_sector_id: SectorId,
    pub propagated_probability: f64,
    pub wind_factor: f64,
    pub distance_decay: f64,
    pub distance_km: f64,
    pub delay_minutes: f64,
    pub scheduled_time: DateTime<Utc>,
}

/// A point in a sector's probability history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityPoint {
    pub probability: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Dismissed,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Dismissed => "dismissed",
        }
    }
}

/// Immutable record of a raised alert. Transitions produce new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertHistoryItem {
    // ---
    pub id: Uuid,
    pub sector_id: SectorId,
    pub sector_name: String,
    pub severity: AlertLevel,
    pub status: AlertStatus,
    pub probability: f64,
    pub timestamp: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertHistoryItem {
    /// New active alert for `sector`, classified by its current probability.
    pub fn raise(sector: &Sector, now: DateTime<Utc>) -> Self {
        // ---
        Self {
            id: Uuid::new_v4(),
            sector_id: sector.id.clone(),
            sector_name: sector.name.clone(),
            severity: alert_level(sector.current_probability),
            status: AlertStatus::Active,
            probability: sector.current_probability,
            timestamp: now,
            acknowledged_by: None,
            resolved_at: None,
        }
    }

    pub fn acknowledge(&self, by: &str, now: DateTime<Utc>) -> ForecastResult<Self> {
        self.transition(AlertStatus::Acknowledged, by, now)
    }

    pub fn dismiss(&self, by: &str, now: DateTime<Utc>) -> ForecastResult<Self> {
        self.transition(AlertStatus::Dismissed, by, now)
    }

    // Only active alerts may move, and only once.
    fn transition(&self, to: AlertStatus, by: &str, now: DateTime<Utc>) -> ForecastResult<Self> {
        // ---
        if self.status != AlertStatus::Active || to == AlertStatus::Active {
            return Err(ForecastError::InvalidAlertTransition {
                from: self.status,
                to,
            });
        }
        Ok(Self {
            status: to,
            acknowledged_by: Some(by.to_string()),
            resolved_at: Some(now),
            ..self.clone()
        })
    }
}

/// Clamp a probability into `[0, 100]`; NaN becomes 0.
pub fn clamp_probability(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Clamp a confidence into `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
