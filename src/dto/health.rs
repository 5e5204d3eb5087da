//! Health check payload.

use serde::Serialize;

use crate::state::session::Phase;

/// Liveness response including the current session phase.
#[derive(Debug, Serialize)]
pub struct Health {
    /// Always `"ok"` when the process is serving.
    pub status: &'static str,
    /// Current session phase.
    pub phase: Phase,
    /// Number of connected clients.
    pub connections: usize,
}
