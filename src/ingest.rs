//! Upstream sensor snapshot ingestion.
//!
//! The upstream API pages loosely structured station records. They are
//! decoded into raw structs here and validated into the engine's typed
//! records; anything that fails validation is logged and dropped so the
//! engine only ever sees well-formed data.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use cloudburst_forecast::geodesy::normalize_degrees;
use cloudburst_forecast::{
    AerialSensorData, Coordinates, NodeKind, NodeStatus, RainfallData, SectorReadings,
    SensorNode, WeatherData, WindData,
};

// ---

/// Raw station record from the upstream API.
#[derive(Debug, Deserialize)]
pub struct RawStation {
    // ---
    pub node_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub weather: Option<RawWeather>,
    #[serde(default)]
    pub rainfall: Option<RawRainfall>,
    #[serde(default)]
    pub aerial: Option<RawAerial>,
}

#[derive(Debug, Deserialize)]
pub struct RawWeather {
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RawRainfall {
    pub rate_mm_h: f64,
    pub cumulative_mm: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RawAerial {
    pub altitude_m: f64,
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    pub humidity: f64,
    pub pwv_mm: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RawWind {
    pub speed_ms: f64,
    pub direction_deg: f64,
    pub timestamp: DateTime<Utc>,
}

/// One validated upstream snapshot.
#[derive(Debug, Default)]
pub struct Snapshot {
    // ---
    pub nodes: Vec<SensorNode>,
    /// Latest readings keyed by node id.
    pub readings: BTreeMap<String, SectorReadings>,
    pub wind: Option<WindData>,
}

impl RawStation {
    /// Validate into a node plus its readings. `None` when the station
    /// cannot own a sector (bad coordinates or empty id).
    pub fn into_typed(self) -> Option<(SensorNode, SectorReadings)> {
        // ---
        let coordinates = Coordinates::new(self.latitude, self.longitude);
        if self.node_id.trim().is_empty() || !coordinates.is_valid() {
            tracing::warn!(
                "Dropping station '{}' with invalid identity or coordinates {:?}",
                self.node_id,
                coordinates
            );
            return None;
        }

        let kind = match self.kind.as_deref() {
            Some("gateway") => NodeKind::Gateway,
            _ => NodeKind::Sensor,
        };
        let status = match self.status.as_deref() {
            Some("offline") => NodeStatus::Offline,
            _ => NodeStatus::Online,
        };

        let weather = self.weather.and_then(|w| {
            let valid = w.pressure_hpa.is_finite()
                && w.pressure_hpa > 0.0
                && w.humidity.is_finite()
                && w.temperature_c.is_finite();
            valid.then(|| WeatherData {
                temperature: w.temperature_c,
                pressure: w.pressure_hpa,
                humidity: w.humidity,
                timestamp: w.timestamp,
            })
        });

        let rainfall = self.rainfall.and_then(|r| {
            let valid =
                r.rate_mm_h.is_finite() && r.rate_mm_h >= 0.0 && r.cumulative_mm.is_finite();
            if !valid {
                tracing::debug!("Dropping rainfall reading for {}: {:?}", self.node_id, r);
            }
            valid.then(|| RainfallData {
                rate: r.rate_mm_h,
                cumulative: r.cumulative_mm.max(0.0),
                timestamp: r.timestamp,
            })
        });

        let aerial = self.aerial.and_then(|a| {
            let valid = [a.altitude_m, a.temperature_c, a.pressure_hpa, a.humidity, a.pwv_mm]
                .iter()
                .all(|v| v.is_finite());
            valid.then(|| AerialSensorData {
                altitude: a.altitude_m,
                temperature: a.temperature_c,
                pressure: a.pressure_hpa,
                humidity: a.humidity,
                pwv: a.pwv_mm,
                timestamp: a.timestamp,
            })
        });

        let node = SensorNode {
            name: self.name.unwrap_or_else(|| self.node_id.clone()),
            id: self.node_id,
            coordinates,
            kind,
            status,
        };
        Some((
            node,
            SectorReadings {
                weather,
                rainfall,
                aerial,
            },
        ))
    }
}

impl RawWind {
    pub fn into_typed(self) -> Option<WindData> {
        // ---
        if !self.speed_ms.is_finite() || self.speed_ms < 0.0 || !self.direction_deg.is_finite() {
            tracing::warn!("Dropping invalid wind reading {:?}", self);
            return None;
        }
        Some(WindData {
            speed: self.speed_ms,
            direction: normalize_degrees(self.direction_deg),
            timestamp: self.timestamp,
        })
    }
}

/// Fetch a paginated station snapshot from the upstream API.
pub async fn fetch_snapshot(
    client: &reqwest::Client,
    base_url: &str,
    max_pages: u32,
) -> Result<Snapshot> {
    // ---
    let mut snapshot = Snapshot::default();
    let mut cursor: Option<String> = None;
    let mut page_count = 0;

    loop {
        if page_count >= max_pages {
            tracing::debug!(
                "Hit page limit of {}, stopping pagination. Fetched {} stations so far.",
                max_pages,
                snapshot.nodes.len()
            );
            break;
        }
        page_count += 1;

        let url = if let Some(ref cursor) = cursor {
            format!("{}?cursor={}", base_url, cursor)
        } else {
            base_url.to_string()
        };

        tracing::debug!("Fetching page {} from: {}", page_count, url);

        let response: serde_json::Value = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        absorb_page(&mut snapshot, &response, page_count);

        cursor = response
            .get("next_cursor")
            .and_then(|c| c.as_str())
            .map(String::from);

        tracing::debug!("Page {} next_cursor: {:?}", page_count, cursor);

        if cursor.is_none() {
            break;
        }
    }

    tracing::info!(
        "Fetched {} stations from {} pages (wind: {})",
        snapshot.nodes.len(),
        page_count,
        if snapshot.wind.is_some() { "yes" } else { "no" }
    );
    Ok(snapshot)
}

/// Merge one response page into `snapshot`.
fn absorb_page(snapshot: &mut Snapshot, response: &serde_json::Value, page: u32) {
    // ---
    if let Some(items) = response.get("results").and_then(|d| d.as_array()) {
        for (i, item) in items.iter().enumerate() {
            match serde_json::from_value::<RawStation>(item.clone()) {
                Ok(raw) => {
                    if let Some((node, readings)) = raw.into_typed() {
                        snapshot.readings.insert(node.id.clone(), readings);
                        snapshot.nodes.push(node);
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        "Failed to parse item {} on page {}: {} - Raw item: {}",
                        i,
                        page,
                        e,
                        item
                    );
                }
            }
        }
    } else {
        tracing::debug!(
            "Page {} response missing 'results' field or not an array",
            page
        );
    }

    // The newest wind sample across pages wins.
    if let Some(raw) = response.get("wind") {
        match serde_json::from_value::<RawWind>(raw.clone()) {
            Ok(raw) => {
                if let Some(wind) = raw.into_typed() {
                    let newer = snapshot
                        .wind
                        .as_ref()
                        .map_or(true, |w| wind.timestamp > w.timestamp);
                    if newer {
                        snapshot.wind = Some(wind);
                    }
                }
            }
            Err(e) => tracing::debug!("Failed to parse wind on page {}: {}", page, e),
        }
    }
}
