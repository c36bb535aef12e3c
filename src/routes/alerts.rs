//! Alert history endpoints.
//!
//! Alerts are raised by the forecast loop; operators can only move an
//! active alert to acknowledged or dismissed, once.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use cloudburst_forecast::AlertStatus;

use crate::{history, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/alerts", get(list_alerts))
        .route("/alerts/{id}/acknowledge", post(acknowledge))
        .route("/alerts/{id}/dismiss", post(dismiss))
}

/// Body of a transition request.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    by: String,
}

async fn list_alerts(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    let store = state.store.read().await;
    (StatusCode::OK, Json(store.alerts().to_vec())).into_response()
}

async fn acknowledge(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<TransitionRequest>,
) -> impl IntoResponse {
    transition(state, id, AlertStatus::Acknowledged, &request.by).await
}

async fn dismiss(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<TransitionRequest>,
) -> impl IntoResponse {
    transition(state, id, AlertStatus::Dismissed, &request.by).await
}

async fn transition(
    state: AppState,
    id: Uuid,
    to: AlertStatus,
    by: &str,
) -> axum::response::Response {
    // ---
    info!("Alert {} -> {:?} by {}", id, to, by);

    let result = {
        let mut store = state.store.write().await;
        let Some(current) = store.alert(id).cloned() else {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("alert '{}' not found", id) })),
            )
                .into_response();
        };
        let next = match to {
            AlertStatus::Dismissed => current.dismiss(by, Utc::now()),
            _ => current.acknowledge(by, Utc::now()),
        };
        if let Ok(updated) = &next {
            store.record_alert(updated.clone());
        }
        next
    };

    match result {
        Ok(updated) => {
            if let Err(e) = history::upsert_alert(&state.pool, &updated).await {
                error!("Failed to persist alert {}: {}", id, e);
            }
            (StatusCode::OK, Json(updated)).into_response()
        }
        Err(e) => {
            warn!("Rejected alert transition for {}: {}", id, e);
            (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
