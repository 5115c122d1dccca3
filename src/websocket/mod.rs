//! WebSocket Fan-out Relay
//!
//! Relays whiteboard traffic between every client connected to `/ws`.
//!
//! ## Architecture
//!
//! - **SessionRegistry**: live connections and the identity each one joined with
//! - **HistoryBuffer**: every enriched message so far, replayed to late joiners
//! - **Enricher**: stamps client messages with `senderId` / `senderDisplayName`
//!   and gives `draw` messages a fresh `strokeId`
//! - **ConnectionHub**: holds registry and history behind one lock and fans
//!   messages out, evicting peers whose writes fail
//! - **Handler**: WebSocket upgrade plus the per-connection reader and writer
//!
//! ## Protocol
//!
//! ```text
//! client -> {"type":"join","username":"alice"}
//! server -> {"type":"joined","userId":"<uuid>"}
//! server -> ...history replay...
//! server -> {"type":"userCount","count":1}          (to everyone)
//! client -> {"type":"draw","fromX":1,"fromY":2,"toX":3,"toY":4}
//! others <- {...,"senderId":"<uuid>","senderDisplayName":"alice","strokeId":"<uuid>"}
//! ```
//!
//! In the minimal profile the handshake is skipped and frames are relayed
//! byte-for-byte.

mod enricher;
mod handler;
mod history;
mod hub;
mod messages;
mod registry;

pub use enricher::{enrich, EnrichError, DRAW_TYPE};
pub use handler::{handle_socket, websocket_handler};
pub use history::HistoryBuffer;
pub use hub::{ConnectionHub, HubConfig, HubError, Profile};
pub use messages::{ClientMessage, Frame, ServerMessage};
pub use registry::{
    outbound_channel, ConnectionId, DeliveryFailure, Identity, Inbox, Outbox, Peer,
    SessionRegistry,
};
