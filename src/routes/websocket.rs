//! WebSocket upgrade endpoint, one connection per logical role.

use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{services::websocket_service, state::SharedState, state::registry::Role};

/// Upgrade the HTTP connection into a role-bound WebSocket session.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Path(role): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(role) = Role::parse(&role) else {
        return (StatusCode::NOT_FOUND, "unknown role").into_response();
    };
    ws.on_upgrade(move |socket| websocket_service::handle_socket(state, role, socket))
        .into_response()
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws/{role}", get(ws_handler))
}
