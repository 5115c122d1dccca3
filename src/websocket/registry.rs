//! Session Registry
//!
//! Tracks which connections are live and who they belong to. The registry is
//! not synchronized on its own; the [`ConnectionHub`](super::ConnectionHub)
//! only touches it while holding its state lock.

use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::messages::Frame;

/// Opaque handle for one accepted WebSocket connection.
///
/// Allocated by the hub at accept time and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Server-assigned identity of a joined participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// UUID v4, unique per join
    pub id: String,
    /// Name the client asked for in its join message
    pub display_name: String,
}

impl Identity {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: display_name.into(),
        }
    }
}

/// Why a frame could not be queued for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The peer's outbound queue is full; it is not keeping up
    Backlogged,
    /// The peer's writer has already stopped
    Disconnected,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Backlogged => f.write_str("outbound queue full"),
            DeliveryFailure::Disconnected => f.write_str("writer closed"),
        }
    }
}

/// Hub side of a connection's outbound path: the frame queue and the signal
/// that tells the writer to stop.
#[derive(Debug)]
pub struct Outbox {
    frames: mpsc::Sender<Frame>,
    close: oneshot::Sender<()>,
}

/// Writer side of a connection's outbound path
#[derive(Debug)]
pub struct Inbox {
    frames: mpsc::Receiver<Frame>,
    /// `None` once the close signal has been observed
    close: Option<oneshot::Receiver<()>>,
}

/// Create the outbound path for one connection, queueing at most `capacity` frames
pub fn outbound_channel(capacity: usize) -> (Outbox, Inbox) {
    let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
    let (close_tx, close_rx) = oneshot::channel();
    (
        Outbox {
            frames: frames_tx,
            close: close_tx,
        },
        Inbox {
            frames: frames_rx,
            close: Some(close_rx),
        },
    )
}

impl Inbox {
    /// Next queued frame.
    ///
    /// Returns `None` as soon as the peer is closed or dropped by the hub,
    /// even if frames are still queued.
    pub async fn recv(&mut self) -> Option<Frame> {
        let close = self.close.as_mut()?;
        tokio::select! {
            biased;
            _ = close => {}
            frame = self.frames.recv() => return frame,
        }
        self.close = None;
        None
    }

    /// Whether the hub has closed this peer
    pub fn close_requested(&mut self) -> bool {
        let Some(close) = self.close.as_mut() else {
            return true;
        };
        match close.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => false,
            _ => {
                self.close = None;
                true
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Result<Frame, mpsc::error::TryRecvError> {
        self.frames.try_recv()
    }
}

/// A registered connection: its identity (if it joined) and its outbox.
///
/// Dropping or closing a `Peer` stops the connection's writer without
/// flushing what is still queued.
#[derive(Debug)]
pub struct Peer {
    identity: Option<Identity>,
    outbox: Outbox,
}

impl Peer {
    pub fn new(identity: Option<Identity>, outbox: Outbox) -> Self {
        Self { identity, outbox }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Queue a frame without waiting
    pub fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryFailure> {
        self.outbox.frames.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryFailure::Backlogged,
            TrySendError::Closed(_) => DeliveryFailure::Disconnected,
        })
    }

    /// Tell the writer to close the socket now
    pub fn close(self) {
        // The writer may already be gone
        let _ = self.outbox.close.send(());
    }
}

/// Live connections keyed by [`ConnectionId`]
#[derive(Debug, Default)]
pub struct SessionRegistry {
    peers: HashMap<ConnectionId, Peer>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. The join protocol guarantees `id` is not present yet.
    pub fn register(&mut self, id: ConnectionId, peer: Peer) {
        let previous = self.peers.insert(id, peer);
        debug_assert!(previous.is_none(), "{id} registered twice");
    }

    /// Remove a connection, returning its entry if it was still registered
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Visit every registered peer except `id`
    pub fn for_each_except(&self, id: ConnectionId, f: impl FnMut(ConnectionId, &Peer)) {
        self.visit(Some(id), f);
    }

    /// Visit every registered peer
    pub fn for_each(&self, f: impl FnMut(ConnectionId, &Peer)) {
        self.visit(None, f);
    }

    fn visit(&self, except: Option<ConnectionId>, mut f: impl FnMut(ConnectionId, &Peer)) {
        for (id, peer) in &self.peers {
            if Some(*id) != except {
                f(*id, peer);
            }
        }
    }
}
