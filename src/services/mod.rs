//! Service layer: dispatching, turn processing, and connection plumbing.

/// Inbound message decoding and routing.
pub mod dispatcher;
/// Session event broadcasting.
pub mod fanout;
/// Transcript screening filters.
pub mod filters;
/// Serialized audio-to-turn pipeline.
pub mod turn_pipeline;
/// WebSocket connection lifecycle.
pub mod websocket_service;
