//! WebSocket Message Types
//!
//! Defines the control messages exchanged between whiteboard clients and
//! the relay, plus the [`Frame`] type queued for each connection's writer.
//!
//! Steady-state drawing and chat messages are free-form JSON objects and are
//! never modelled here; only the join handshake and server notices are typed.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Messages a client may send before it has joined
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join the session under a display name
    Join {
        /// Name shown to other participants
        username: String,
    },
}

/// Messages originated by the server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Join accepted; carries the id assigned to this client
    Joined {
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Number of participants currently connected
    UserCount { count: usize },
}

impl ServerMessage {
    /// Serialize to the JSON text sent on the wire
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize straight into a queueable frame
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        self.to_json().map(Frame::text)
    }
}

/// A single outbound WebSocket frame.
///
/// Payloads are reference counted so one broadcast can be queued to many
/// peers without copying the body per recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Arc<str>),
    Binary(Arc<[u8]>),
}

impl Frame {
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Frame::Text(text.into())
    }

    pub fn binary(bytes: impl Into<Arc<[u8]>>) -> Self {
        Frame::Binary(bytes.into())
    }

    /// Text payload, if this is a text frame
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text.to_string()),
            Frame::Binary(bytes) => Message::Binary(bytes.to_vec()),
        }
    }
}
