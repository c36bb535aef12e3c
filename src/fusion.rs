//! Multi-source risk fusion.
//!
//! Ground readings (rainfall, weather) and an optional aerial payload reading
//! are reduced to one cloudburst probability with a confidence and a
//! provenance tag. Missing readings are not errors: they contribute nothing
//! to the score and cost a third of the confidence each.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{
    clamp_confidence, clamp_probability, AerialSensorData, AlertLevel, PredictionSource,
    RainfallData, SectorReadings, WeatherData,
};

/// Sea-level standard pressure, hPa.
pub const STANDARD_PRESSURE_HPA: f64 = 1013.25;

/// Rain rate (mm/h) at which a cloudburst is declared.
pub const CLOUDBURST_RAIN_RATE: f64 = 100.0;

/// Lower bounds of the alert levels, in percent.
pub const MODERATE_THRESHOLD: f64 = 30.0;
pub const HIGH_THRESHOLD: f64 = 60.0;
pub const CRITICAL_THRESHOLD: f64 = 80.0;

// Ground sub-score weights; they sum to 1.
const W_RAIN_RATE: f64 = 0.35;
const W_RAIN_CUMULATIVE: f64 = 0.25;
const W_PRESSURE_DROP: f64 = 0.20;
const W_HUMIDITY: f64 = 0.20;

// Aerial sub-score weights; they sum to 1.
const W_AERIAL_PRESSURE: f64 = 0.30;
const W_AERIAL_HUMIDITY: f64 = 0.30;
const W_AERIAL_PWV: f64 = 0.40;

// Saturation points of each factor.
const RAIN_CUMULATIVE_SATURATION_MM: f64 = 150.0;
const PRESSURE_DROP_SATURATION_HPA: f64 = 30.0;
const GROUND_HUMIDITY_ONSET: f64 = 60.0;
const AERIAL_HUMIDITY_ONSET: f64 = 70.0;
const AERIAL_PRESSURE_SATURATION_HPA: f64 = 20.0;
const PWV_ONSET_MM: f64 = 20.0;
const PWV_SATURATION_MM: f64 = 60.0;

/// Number of independent inputs confidence is spread over.
const INPUT_COUNT: f64 = 3.0;

// ---

/// Tunables for [`fuse`].
#[derive(Debug, Clone)]
pub struct FusionConfig {
    // ---
    /// Aerial readings older than this are ignored.
    pub aerial_staleness: Duration,
    /// Share of the blended probability given to the aerial sub-score.
    pub aerial_weight: f64,
    /// Fraction of the aerial confidence credit left at exactly the
    /// staleness bound. Credit falls linearly from 1 at age zero to this
    /// value, and to 0 past the bound.
    pub stale_credit_floor: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            aerial_staleness: Duration::minutes(15),
            aerial_weight: 0.6,
            stale_credit_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundFactors {
    // ---
    pub rainfall_rate: f64,
    pub rainfall_cumulative: f64,
    pub pressure_drop: f64,
    pub humidity: f64,
    /// Weighted sub-score, percent.
    pub score: f64,
    pub weather_present: bool,
    pub rainfall_present: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AerialFactors {
    // ---
    pub pressure_anomaly: f64,
    pub humidity: f64,
    pub pwv: f64,
    /// Weighted sub-score, percent.
    pub score: f64,
    pub age_minutes: f64,
    pub fresh: bool,
}

/// Full breakdown of one fusion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionResult {
    // ---
    pub ground_factors: GroundFactors,
    pub aerial_factors: Option<AerialFactors>,
    pub combined_probability: f64,
    pub confidence: f64,
    pub source: PredictionSource,
}

impl FusionResult {
    pub fn alert_level(&self) -> AlertLevel {
        alert_level(self.combined_probability)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudburstDetection {
    pub detected: bool,
    pub confidence: f64,
}

/// Alert classification of a probability.
///
/// This is the only place the thresholds are applied; every other module
/// derives alert levels through it.
pub fn alert_level(probability: f64) -> AlertLevel {
    // ---
    let p = clamp_probability(probability);
    if p >= CRITICAL_THRESHOLD {
        AlertLevel::Critical
    } else if p >= HIGH_THRESHOLD {
        AlertLevel::High
    } else if p >= MODERATE_THRESHOLD {
        AlertLevel::Moderate
    } else {
        AlertLevel::Low
    }
}

/// Fuse the available readings into one probability.
pub fn fuse(
    weather: Option<&WeatherData>,
    rainfall: Option<&RainfallData>,
    aerial: Option<&AerialSensorData>,
    now: DateTime<Utc>,
    config: &FusionConfig,
) -> FusionResult {
    // ---
    let ground = ground_factors(weather, rainfall);
    let aerial = aerial.map(|a| aerial_factors(a, now, config));

    let fresh_aerial = aerial.as_ref().filter(|a| a.fresh);
    let has_ground = ground.weather_present || ground.rainfall_present;

    let (combined, source) = match fresh_aerial {
        Some(a) if has_ground => {
            let w = config.aerial_weight.clamp(0.0, 1.0);
            (
                (1.0 - w) * ground.score + w * a.score,
                PredictionSource::GroundAerial,
            )
        }
        Some(a) => (a.score, PredictionSource::Aerial),
        None => (ground.score, PredictionSource::Ground),
    };

    let aerial_credit = aerial
        .as_ref()
        .map_or(0.0, |a| aerial_credit(a.age_minutes, config));
    let present = f64::from(u8::from(ground.weather_present))
        + f64::from(u8::from(ground.rainfall_present))
        + aerial_credit;

    tracing::trace!(
        ground = ground.score,
        aerial = ?aerial.as_ref().map(|a| a.score),
        combined,
        "fused readings"
    );

    FusionResult {
        ground_factors: ground,
        aerial_factors: aerial,
        combined_probability: clamp_probability(combined),
        confidence: clamp_confidence(present / INPUT_COUNT),
        source,
    }
}

/// [`fuse`] over a sector's latest readings.
pub fn fuse_readings(
    readings: &SectorReadings,
    now: DateTime<Utc>,
    config: &FusionConfig,
) -> FusionResult {
    fuse(
        readings.weather.as_ref(),
        readings.rainfall.as_ref(),
        readings.aerial.as_ref(),
        now,
        config,
    )
}

/// Cloudburst declaration from the ground rain gauge.
///
/// Confidence is 0.5 right at the threshold and saturates at twice the
/// threshold rate.
pub fn detect_cloudburst(rainfall: Option<&RainfallData>) -> CloudburstDetection {
    // ---
    match rainfall {
        Some(r) if r.rate >= CLOUDBURST_RAIN_RATE => CloudburstDetection {
            detected: true,
            confidence: clamp_confidence(
                0.5 + 0.5 * (r.rate - CLOUDBURST_RAIN_RATE) / CLOUDBURST_RAIN_RATE,
            ),
        },
        _ => CloudburstDetection {
            detected: false,
            confidence: 0.0,
        },
    }
}

fn ground_factors(weather: Option<&WeatherData>, rainfall: Option<&RainfallData>) -> GroundFactors {
    // ---
    let mut factors = GroundFactors::default();

    if let Some(r) = rainfall {
        factors.rainfall_present = true;
        factors.rainfall_rate = unit(r.rate.max(0.0) / CLOUDBURST_RAIN_RATE);
        factors.rainfall_cumulative = unit(r.cumulative / RAIN_CUMULATIVE_SATURATION_MM);
    }
    if let Some(w) = weather {
        factors.weather_present = true;
        factors.pressure_drop =
            unit((STANDARD_PRESSURE_HPA - w.pressure) / PRESSURE_DROP_SATURATION_HPA);
        factors.humidity =
            unit((w.humidity - GROUND_HUMIDITY_ONSET) / (100.0 - GROUND_HUMIDITY_ONSET));
    }

    factors.score = 100.0
        * (W_RAIN_RATE * factors.rainfall_rate
            + W_RAIN_CUMULATIVE * factors.rainfall_cumulative
            + W_PRESSURE_DROP * factors.pressure_drop
            + W_HUMIDITY * factors.humidity);
    factors
}

fn aerial_factors(
    reading: &AerialSensorData,
    now: DateTime<Utc>,
    config: &FusionConfig,
) -> AerialFactors {
    // ---
    let expected = expected_pressure_at(reading.altitude);
    let pressure_anomaly = unit((expected - reading.pressure) / AERIAL_PRESSURE_SATURATION_HPA);
    let humidity =
        unit((reading.humidity - AERIAL_HUMIDITY_ONSET) / (100.0 - AERIAL_HUMIDITY_ONSET));
    let pwv = unit((reading.pwv - PWV_ONSET_MM) / (PWV_SATURATION_MM - PWV_ONSET_MM));

    // Readings stamped in the future count as brand new.
    let age_minutes = ((now - reading.timestamp).num_milliseconds().max(0) as f64) / 60_000.0;
    let bound_minutes = config.aerial_staleness.num_milliseconds() as f64 / 60_000.0;

    AerialFactors {
        pressure_anomaly,
        humidity,
        pwv,
        score: 100.0
            * (W_AERIAL_PRESSURE * pressure_anomaly
                + W_AERIAL_HUMIDITY * humidity
                + W_AERIAL_PWV * pwv),
        age_minutes,
        fresh: age_minutes <= bound_minutes,
    }
}

fn aerial_credit(age_minutes: f64, config: &FusionConfig) -> f64 {
    // ---
    let bound = config.aerial_staleness.num_milliseconds() as f64 / 60_000.0;
    if bound <= 0.0 {
        return if age_minutes <= 0.0 { 1.0 } else { 0.0 };
    }
    if age_minutes > bound {
        return 0.0;
    }
    let floor = config.stale_credit_floor.clamp(0.0, 1.0);
    1.0 - (1.0 - floor) * (age_minutes / bound)
}

/// International barometric formula, hPa at `altitude_m`.
fn expected_pressure_at(altitude_m: f64) -> f64 {
    STANDARD_PRESSURE_HPA * (1.0 - 2.25577e-5 * altitude_m.max(0.0)).max(0.0).powf(5.25588)
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
