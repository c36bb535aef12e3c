//! Sector read and update endpoints.
//!
//! - `GET   /sectors`                 all sectors of the current partition
//! - `GET   /sectors/{id}`            sector detail with readings and history
//! - `GET   /sectors/{id}/prediction` fusion breakdown for the latest readings
//! - `PATCH /sectors/{id}`            operator partial update

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info};

use cloudburst_forecast::{ProbabilityPoint, SectorStore, SectorUpdate};

use crate::{history, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/sectors", get(list_sectors))
        .route("/sectors/{id}", get(sector_detail).patch(update_sector))
        .route("/sectors/{id}/prediction", get(prediction))
}

async fn list_sectors(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    let store = state.store.read().await;
    let sectors: Vec<_> = store.list_sectors().into_values().collect();
    debug!("GET /sectors - returning {} sectors", sectors.len());
    (StatusCode::OK, Json(sectors)).into_response()
}

async fn sector_detail(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    let store = state.store.read().await;
    match store.sector_detail(&id, Utc::now()) {
        Some(detail) => (StatusCode::OK, Json(detail)).into_response(),
        None => not_found(&id),
    }
}

async fn prediction(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    let fusion = state.config.forecast_config().fusion;
    let store = state.store.read().await;
    match store.prediction_breakdown(&id, Utc::now(), &fusion) {
        Some(breakdown) => (StatusCode::OK, Json(breakdown)).into_response(),
        None => not_found(&id),
    }
}

async fn update_sector(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(update): Json<SectorUpdate>,
) -> impl IntoResponse {
    // ---
    info!("PATCH /sectors/{} - {:?}", id, update);
    let now = Utc::now();

    let updated = {
        let mut store = state.store.write().await;
        store.update_sector(&id, &update, now)
    };
    let Some(sector) = updated else {
        return not_found(&id);
    };

    if update.probability.is_some() {
        let point = ProbabilityPoint {
            probability: sector.current_probability,
            timestamp: now,
        };
        let points = [(id.clone(), point)];
        if let Err(e) = history::append_probability_points(&state.pool, &points).await {
            error!("Failed to persist history point for {}: {}", id, e);
        }
    }

    (StatusCode::OK, Json(sector)).into_response()
}

fn not_found(id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("sector '{}' not found", id) })),
    )
        .into_response()
}
