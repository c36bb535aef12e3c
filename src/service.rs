//! Forecast tick loop.
//!
//! Each tick pulls a fresh upstream snapshot, repartitions when the node set
//! changed, runs the engine over a frozen copy of the store and writes the
//! results back. Persistence happens after the store lock is released.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use cloudburst_forecast::geometry::sector_id_for;
use cloudburst_forecast::orchestrator::carry_over_risk;
use cloudburst_forecast::{partition, Forecaster, SectorStore, SensorNode};

use crate::{history, ingest, AppState};

// ---

/// Run forever, one tick per configured interval. Tick failures are logged
/// and the loop carries on with the next tick.
pub async fn run_forecast_loop(state: AppState) {
    // ---
    let client = reqwest::Client::new();
    let mut forecaster = Forecaster::new(state.config.forecast_config());

    let period = Duration::from_secs(u64::from(state.config.tick_interval_secs));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Forecast loop started, tick every {:?}", period);

    loop {
        interval.tick().await;
        if let Err(e) = run_tick(&state, &client, &mut forecaster).await {
            error!("Forecast tick failed: {:#}", e);
        }
    }
}

async fn run_tick(
    state: &AppState,
    client: &reqwest::Client,
    forecaster: &mut Forecaster,
) -> Result<()> {
    // ---
    let snapshot =
        ingest::fetch_snapshot(client, &state.config.api_url, state.config.api_max_pages).await?;
    let now = Utc::now();

    let outcome = {
        let mut store = state.store.write().await;

        if node_set_changed(&store.nodes(), &snapshot.nodes) {
            // A degenerate node set keeps the previous partition in place.
            let fresh = partition(&snapshot.nodes, &state.config.bounds, now)?;
            info!(
                "Repartitioned {} nodes into {} sectors",
                snapshot.nodes.len(),
                fresh.len()
            );
            let merged = carry_over_risk(&store.list_sectors(), fresh);
            store.replace_sectors(merged);
            store.set_nodes(snapshot.nodes.clone());
        }

        let sectors = store.list_sectors();
        for (node_id, readings) in snapshot.readings {
            let sector_id = sector_id_for(&node_id);
            if sectors.contains_key(&sector_id) {
                store.set_readings(&sector_id, readings);
            } else {
                warn!("Readings for node {} have no sector, skipping", node_id);
            }
        }
        store.set_wind(snapshot.wind.clone());

        let readings = store.all_readings();
        let outcome = forecaster.tick(&sectors, &readings, snapshot.wind.as_ref(), now);

        store.replace_sectors(outcome.sectors.clone());
        for (sector_id, point) in &outcome.history {
            store.append_probability_history(sector_id, point.clone());
        }
        for alert in &outcome.alerts {
            store.record_alert(alert.clone());
        }
        outcome
    };

    if let Err(e) = history::append_probability_points(&state.pool, &outcome.history).await {
        error!("Failed to persist probability history: {:#}", e);
    }
    for alert in &outcome.alerts {
        if let Err(e) = history::upsert_alert(&state.pool, alert).await {
            error!("Failed to persist alert {}: {:#}", alert.id, e);
        }
    }

    // Push transport lives elsewhere; the records are emitted as log lines.
    for notification in &outcome.notifications {
        let record = serde_json::to_string(notification)?;
        debug!(notification = %record, "forecast notification");
    }

    info!(
        "Tick complete: {} scheduled, {} applied, {} pending, {} alerts",
        outcome.scheduled.len(),
        outcome.applied.len(),
        forecaster.pending().len(),
        outcome.alerts.len()
    );
    Ok(())
}

/// True when ids or positions differ between the two node lists.
fn node_set_changed(current: &[SensorNode], incoming: &[SensorNode]) -> bool {
    // ---
    let key = |nodes: &[SensorNode]| {
        let mut keyed: Vec<(String, f64, f64)> = nodes
            .iter()
            .map(|n| (n.id.clone(), n.coordinates.latitude, n.coordinates.longitude))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed
    };
    key(current) != key(incoming)
}
