//! Liveness endpoint.

use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::health::Health, state::SharedState};

/// Report process liveness along with the current session phase.
pub async fn health_handler(State(state): State<SharedState>) -> Json<Health> {
    let phase = state.with_session(|s| s.phase()).await;
    Json(Health {
        status: "ok",
        phase,
        connections: state.registry().len(),
    })
}

/// Configure the health endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/healthz", get(health_handler))
}
