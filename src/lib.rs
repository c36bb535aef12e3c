//! Spatial cloudburst-risk forecast engine.
//!
//! The library is the pure, synchronous core used by the `cloudburst-forecast`
//! service:
//! - `geometry` partitions sensor nodes into sectors with adjacency
//! - `fusion` turns ground and aerial readings into a probability
//! - `propagation` moves that risk downwind across the sector graph
//! - `orchestrator` sequences the three per forecast tick
//! - `store` is the boundary to whoever owns sector state
//!
//! No function here blocks, spawns or mutates its inputs; "updated state" is
//! always returned as a new map.

pub mod error;
pub mod fusion;
pub mod geodesy;
pub mod geometry;
pub mod models;
pub mod orchestrator;
pub mod propagation;
pub mod store;

pub use error::{ForecastError, ForecastResult};
pub use fusion::{alert_level, fuse, FusionConfig, FusionResult};
pub use geometry::{partition, BoundingRegion};
pub use models::{
    AerialSensorData, AlertHistoryItem, AlertLevel, AlertStatus, Coordinates, NodeKind,
    NodeStatus, PredictionSource, ProbabilityPoint, PropagationEvent, RainfallData, Sector,
    SectorId, SectorMap, SectorReadings, SensorNode, WeatherData, WindData,
};
pub use orchestrator::{ForecastConfig, ForecastNotification, Forecaster, TickOutcome};
pub use propagation::{CascadeResult, PropagationConfig};
pub use store::{InMemoryStore, SectorStore, SectorUpdate};
