use axum::Router;

use crate::AppState;

mod alerts;
mod health;
mod sectors;

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(sectors::router())
        .merge(alerts::router())
        .merge(health::router())
        .with_state(state)
}
