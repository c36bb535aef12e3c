//! Configuration loader for the `cloudburst-forecast` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Engine tunables are folded into a
//! [`ForecastConfig`] here so the tick loop never reads the environment.
//!
use std::env;

use anyhow::{anyhow, Result};
use chrono::Duration;

use cloudburst_forecast::{BoundingRegion, ForecastConfig, FusionConfig, PropagationConfig};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional float environment variable with a default value.
macro_rules! parse_env_f64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<f64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Upstream sensor snapshot API base URL.
    pub api_url: String,

    /// Maximum number of API pages to fetch (safety limit).
    pub api_max_pages: u32,

    /// HTTP listen port.
    pub listen_port: u16,

    /// Seconds between forecast ticks.
    pub tick_interval_secs: u32,

    /// Region clipped by the sector partition.
    pub bounds: BoundingRegion,

    /// Cascade hop budget.
    pub max_hops: u32,

    /// Probability (percent) that seeds a cascade.
    pub trigger_probability: f64,

    /// Age after which aerial readings are ignored.
    pub aerial_stale_minutes: u32,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
/// - `SENSOR_API_URL` – upstream sensor snapshot API base URL
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `API_MAX_PAGES` – max API pages to fetch (default: 100)
/// - `LISTEN_PORT` – HTTP port (default: 8080)
/// - `TICK_INTERVAL_SECS` – forecast tick period (default: 60)
/// - `FORECAST_BOUNDS` – `min_lat,min_lon,max_lat,max_lon` (default: whole globe)
/// - `MAX_HOPS` – cascade hop budget (default: 4)
/// - `TRIGGER_PROBABILITY` – cascade trigger in percent (default: 70)
/// - `AERIAL_STALE_MINUTES` – aerial staleness bound (default: 15)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let api_url = require_env!("SENSOR_API_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let api_max_pages = parse_env_u32!("API_MAX_PAGES", 100);
    let listen_port = u16::try_from(parse_env_u32!("LISTEN_PORT", 8080))
        .map_err(|e| anyhow!("Invalid LISTEN_PORT: {}", e))?;
    let tick_interval_secs = parse_env_u32!("TICK_INTERVAL_SECS", 60).max(1);
    let max_hops = parse_env_u32!("MAX_HOPS", 4);
    let trigger_probability = parse_env_f64!("TRIGGER_PROBABILITY", 70.0);
    let aerial_stale_minutes = parse_env_u32!("AERIAL_STALE_MINUTES", 15);

    let bounds = match env::var("FORECAST_BOUNDS") {
        Ok(raw) => parse_bounds(&raw)?,
        Err(_) => BoundingRegion::world(),
    };

    Ok(Config {
        db_url,
        api_url,
        db_pool_max,
        api_max_pages,
        listen_port,
        tick_interval_secs,
        bounds,
        max_hops,
        trigger_probability,
        aerial_stale_minutes,
    })
}

/// Parse `min_lat,min_lon,max_lat,max_lon`.
pub fn parse_bounds(raw: &str) -> Result<BoundingRegion> {
    // ---
    let parts = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Invalid FORECAST_BOUNDS '{}': {}", raw, e))?;

    match parts.as_slice() {
        [min_lat, min_lon, max_lat, max_lon] => {
            BoundingRegion::new(*min_lat, *min_lon, *max_lat, *max_lon)
                .map_err(|e| anyhow!("Invalid FORECAST_BOUNDS '{}': {}", raw, e))
        }
        _ => Err(anyhow!(
            "Invalid FORECAST_BOUNDS '{}': expected 4 comma-separated numbers",
            raw
        )),
    }
}

impl Config {
    /// Engine tunables derived from this configuration.
    pub fn forecast_config(&self) -> ForecastConfig {
        // ---
        ForecastConfig {
            fusion: FusionConfig {
                aerial_staleness: Duration::minutes(i64::from(self.aerial_stale_minutes)),
                ..FusionConfig::default()
            },
            propagation: PropagationConfig {
                max_hops: self.max_hops as usize,
                ..PropagationConfig::default()
            },
            trigger_probability: self.trigger_probability,
        }
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL         : {}", self.masked_db_url());
        tracing::info!("  SENSOR_API_URL       : {}", self.api_url);
        tracing::info!("  DB_POOL_MAX          : {}", self.db_pool_max);
        tracing::info!("  API_MAX_PAGES        : {}", self.api_max_pages);
        tracing::info!("  LISTEN_PORT          : {}", self.listen_port);
        tracing::info!("  TICK_INTERVAL_SECS   : {}", self.tick_interval_secs);
        tracing::info!("  FORECAST_BOUNDS      : {:?}", self.bounds);
        tracing::info!("  MAX_HOPS             : {}", self.max_hops);
        tracing::info!("  TRIGGER_PROBABILITY  : {}", self.trigger_probability);
        tracing::info!("  AERIAL_STALE_MINUTES : {}", self.aerial_stale_minutes);
    }

    /// Database URL with the password replaced by `****`.
    pub fn masked_db_url(&self) -> String {
        // ---
        if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                return format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                );
            }
        }
        self.db_url.clone()
    }
}
