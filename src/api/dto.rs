//! Data Transfer Objects
//!
//! Response types for the HTTP endpoints.

use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy or full
    pub status: String,
    /// Relay profile: full or minimal
    pub profile: String,
    /// Currently registered WebSocket connections
    pub connections: usize,
    /// Configured connection limit
    pub max_connections: usize,
    /// Messages available for replay
    pub history_len: usize,
    /// Messages discarded by the history limit
    pub history_dropped: u64,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
