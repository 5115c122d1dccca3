//! # Sketchboard
//!
//! A real-time WebSocket fan-out relay for shared whiteboard sessions.
//!
//! ## Features
//!
//! - **Fan-out**: every message a client sends is relayed to all other clients
//! - **Attribution**: messages are stamped with the sender's server-side identity
//! - **Late join**: new participants get the session's history replayed in order
//! - **Eviction**: a client whose writes fail is dropped without stalling anyone else
//!
//! ## Modules
//!
//! - [`websocket`]: Session registry, history buffer, and broadcast engine
//! - [`api`]: HTTP server with Axum (WebSocket upgrade, health, static files)
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sketchboard::{serve, AppState, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let state = AppState::from_config(config.server.clone(), &config.session);
//!
//!     // Runs until Ctrl+C / SIGTERM
//!     serve(state, &config.server).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod websocket;

// Re-export top-level types for convenience
pub use api::{build_router, serve, AppState, ServerError, ServerResult};

pub use websocket::{
    enrich, handle_socket, websocket_handler, ClientMessage, ConnectionHub, ConnectionId,
    EnrichError, Frame, HistoryBuffer, HubConfig, HubError, Identity, Profile, ServerMessage,
    SessionRegistry,
};

pub use config::{
    generate_default_config, Config, ConfigError, LoggingConfig, ServerConfig, SessionConfig,
};
