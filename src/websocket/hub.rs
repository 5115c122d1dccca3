//! WebSocket Connection Hub
//!
//! Owns the session registry and the history buffer behind a single lock and
//! implements the broadcast engine on top of them.
//!
//! Every mutation and every fan-out runs with the lock held. Fan-out never
//! awaits a socket: frames are pushed into each peer's bounded queue with
//! `try_send`, and a peer whose queue is full or closed is evicted on the spot:
//! it leaves the registry and its writer is told to close the socket without
//! flushing the backlog.
//! Because broadcasts are serialized by the lock, every recipient observes
//! them in the same order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use super::enricher::{enrich, EnrichError};
use super::history::HistoryBuffer;
use super::messages::{Frame, ServerMessage};
use super::registry::{
    outbound_channel, ConnectionId, DeliveryFailure, Identity, Inbox, Outbox, Peer,
    SessionRegistry,
};

/// Which relay behaviour the hub runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Join handshake, identities, enrichment, history replay, user counts
    #[default]
    Full,
    /// Raw pass-through fan-out with no session state
    Minimal,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Full => "full",
            Profile::Minimal => "minimal",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Profile::Full),
            "minimal" => Ok(Profile::Minimal),
            other => Err(format!("unknown profile '{other}' (expected 'full' or 'minimal')")),
        }
    }
}

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub profile: Profile,
    /// Maximum number of concurrently registered connections
    pub max_connections: usize,
    /// Frames that may wait in one peer's queue before it counts as a failed write
    pub outbound_buffer: usize,
    /// Upper bound on a single socket write
    pub write_timeout: Duration,
    /// Ring capacity for the history buffer (`None` = unbounded)
    pub history_limit: Option<usize>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Full,
            max_connections: 1000,
            outbound_buffer: 1024,
            write_timeout: Duration::from_secs(5),
            history_limit: None,
        }
    }
}

/// Errors that can occur in the connection hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Invalid join: {0}")]
    InvalidJoin(String),

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Malformed message: {0}")]
    Malformed(#[from] EnrichError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Registry and history, always locked together
struct RelayState {
    registry: SessionRegistry,
    history: HistoryBuffer,
    /// Whether membership changes are announced with `userCount`
    announce_membership: bool,
}

impl RelayState {
    /// Queue `frame` for every peer except `except`, evicting failures.
    ///
    /// Returns the number of peers the frame was queued for and the number
    /// of peers evicted.
    fn deliver(&mut self, except: Option<ConnectionId>, frame: &Frame) -> (usize, usize) {
        let mut delivered = 0;
        let mut failed: Vec<(ConnectionId, DeliveryFailure)> = Vec::new();

        let mut offer = |id: ConnectionId, peer: &Peer| match peer.try_deliver(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(reason) => failed.push((id, reason)),
        };
        match except {
            Some(sender) => self.registry.for_each_except(sender, &mut offer),
            None => self.registry.for_each(&mut offer),
        }

        let mut evicted = 0;
        for (id, reason) in failed {
            if let Some(peer) = self.registry.unregister(id) {
                tracing::warn!(
                    connection_id = %id,
                    user_id = peer.identity().map(|i| i.id.as_str()).unwrap_or("-"),
                    reason = %reason,
                    "Evicting peer after failed write"
                );
                peer.close();
                evicted += 1;
            }
        }

        (delivered, evicted)
    }

    /// Broadcast and follow up with a user count if anyone was evicted
    fn fan_out(&mut self, except: Option<ConnectionId>, frame: &Frame) -> usize {
        let (delivered, evicted) = self.deliver(except, frame);
        if evicted > 0 && self.announce_membership {
            self.announce_user_count();
        }
        delivered
    }

    /// Send the current count to everyone, repeating while evictions change it
    fn announce_user_count(&mut self) {
        loop {
            let count = self.registry.count();
            let frame = match (ServerMessage::UserCount { count }).to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize user count");
                    return;
                }
            };

            let (_, evicted) = self.deliver(None, &frame);
            tracing::debug!(count, "Announced user count");
            if evicted == 0 {
                return;
            }
        }
    }
}

/// Shared relay state plus the broadcast engine
pub struct ConnectionHub {
    state: Mutex<RelayState>,
    next_id: AtomicU64,
    config: HubConfig,
}

impl ConnectionHub {
    /// Create a new connection hub
    pub fn new(config: HubConfig) -> Self {
        Self {
            state: Mutex::new(RelayState {
                registry: SessionRegistry::new(),
                history: HistoryBuffer::with_limit(config.history_limit),
                announce_membership: config.profile == Profile::Full,
            }),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Allocate the handle for a freshly accepted connection
    pub fn allocate_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create the bounded outbound path for one connection
    pub fn channel(&self) -> (Outbox, Inbox) {
        outbound_channel(self.config.outbound_buffer)
    }

    /// Register a joined participant.
    ///
    /// Registration, the history snapshot, and the user count announcement
    /// happen under one lock acquisition. The returned snapshot must be
    /// written to the client before anything from its queue; together they
    /// contain every message exactly once.
    pub async fn join(
        &self,
        id: ConnectionId,
        identity: Identity,
        outbox: Outbox,
    ) -> Result<Vec<Arc<str>>, HubError> {
        let mut state = self.state.lock().await;
        if state.registry.count() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        tracing::info!(
            connection_id = %id,
            user_id = %identity.id,
            username = %identity.display_name,
            "Participant joined"
        );
        state.registry.register(id, Peer::new(Some(identity), outbox));
        let replay = state.history.snapshot();
        if state.announce_membership {
            state.announce_user_count();
        }

        Ok(replay)
    }

    /// Register an anonymous pass-through connection
    pub async fn attach(&self, id: ConnectionId, outbox: Outbox) -> Result<(), HubError> {
        let mut state = self.state.lock().await;
        if state.registry.count() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        state.registry.register(id, Peer::new(None, outbox));
        tracing::info!(connection_id = %id, "Connection attached");
        Ok(())
    }

    /// Unregister a connection. Safe to call after it was already evicted.
    ///
    /// Returns whether the connection was still registered.
    pub async fn leave(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(peer) = state.registry.unregister(id) else {
            return false;
        };

        match peer.identity() {
            Some(identity) => tracing::info!(
                connection_id = %id,
                user_id = %identity.id,
                username = %identity.display_name,
                "Participant left"
            ),
            None => tracing::info!(connection_id = %id, "Connection detached"),
        }
        peer.close();

        if state.announce_membership {
            state.announce_user_count();
        }
        true
    }

    /// Enrich a client message, record it, and fan it out to everyone else.
    ///
    /// Returns the number of peers it was queued for.
    pub async fn publish(
        &self,
        sender: ConnectionId,
        identity: &Identity,
        raw: &str,
    ) -> Result<usize, HubError> {
        let entry: Arc<str> = enrich(raw, identity)?.into();

        let mut state = self.state.lock().await;
        if !state.registry.contains(sender) {
            return Err(HubError::ConnectionNotFound);
        }

        state.history.append(Arc::clone(&entry));
        let delivered = state.fan_out(Some(sender), &Frame::Text(entry));
        tracing::trace!(connection_id = %sender, recipients = delivered, "Broadcast message");
        Ok(delivered)
    }

    /// Pass a frame through unchanged, without recording it
    pub async fn relay(&self, sender: ConnectionId, frame: Frame) -> Result<usize, HubError> {
        let mut state = self.state.lock().await;
        if !state.registry.contains(sender) {
            return Err(HubError::ConnectionNotFound);
        }

        let delivered = state.fan_out(Some(sender), &frame);
        tracing::trace!(connection_id = %sender, recipients = delivered, "Relayed frame");
        Ok(delivered)
    }

    /// Deliver a frame to every registered connection except `sender`
    pub async fn broadcast(&self, sender: ConnectionId, frame: Frame) -> usize {
        self.state.lock().await.fan_out(Some(sender), &frame)
    }

    /// Send `{"type":"userCount"}` to every registered connection
    pub async fn broadcast_user_count(&self) {
        self.state.lock().await.announce_user_count();
    }

    /// Get the current connection count
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.registry.count()
    }

    pub async fn history_len(&self) -> usize {
        self.state.lock().await.history.len()
    }

    /// Messages discarded by the history ring limit
    pub async fn history_dropped(&self) -> u64 {
        self.state.lock().await.history.dropped()
    }

    pub async fn is_registered(&self, id: ConnectionId) -> bool {
        self.state.lock().await.registry.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn full_hub() -> ConnectionHub {
        ConnectionHub::new(HubConfig::default())
    }

    fn drain(rx: &mut Inbox) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let text = frame.as_text().expect("text frame").to_string();
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    async fn join(
        hub: &ConnectionHub,
        name: &str,
    ) -> (ConnectionId, Identity, Vec<Arc<str>>, Inbox) {
        let id = hub.allocate_id();
        let identity = Identity::new(name);
        let (tx, rx) = hub.channel();
        let replay = hub.join(id, identity.clone(), tx).await.unwrap();
        (id, identity, replay, rx)
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.profile, Profile::Full);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.outbound_buffer, 1024);
        assert!(config.history_limit.is_none());
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!("full".parse::<Profile>().unwrap(), Profile::Full);
        assert_eq!("Minimal".parse::<Profile>().unwrap(), Profile::Minimal);
        assert!("partial".parse::<Profile>().is_err());
        assert_eq!(Profile::Minimal.to_string(), "minimal");
    }

    #[test]
    fn test_allocated_ids_are_unique() {
        let hub = full_hub();
        let a = hub.allocate_id();
        let b = hub.allocate_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_join_announces_user_count() {
        let hub = full_hub();

        let (_, _, replay, mut alice_rx) = join(&hub, "alice").await;
        assert!(replay.is_empty());
        assert_eq!(drain(&mut alice_rx), vec![serde_json::json!({"type": "userCount", "count": 1})]);

        let (_, _, _, mut bob_rx) = join(&hub, "bob").await;
        let expected = serde_json::json!({"type": "userCount", "count": 2});
        assert_eq!(drain(&mut alice_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut bob_rx), vec![expected]);
        assert_eq!(hub.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let hub = full_hub();
        let (alice, _, _, _alice_rx) = join(&hub, "alice").await;
        let (_, _, _, mut bob_rx) = join(&hub, "bob").await;
        drain(&mut bob_rx);

        assert!(hub.leave(alice).await);
        assert!(!hub.leave(alice).await);
        assert_eq!(hub.connection_count().await, 1);
        assert_eq!(drain(&mut bob_rx), vec![serde_json::json!({"type": "userCount", "count": 1})]);
    }

    #[tokio::test]
    async fn test_publish_excludes_sender_and_enriches() {
        let hub = full_hub();
        let (alice, alice_id, _, mut alice_rx) = join(&hub, "alice").await;
        let (_, _, _, mut bob_rx) = join(&hub, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let delivered = hub
            .publish(alice, &alice_id, r#"{"type":"chat","text":"hi"}"#)
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        assert!(drain(&mut alice_rx).is_empty());
        let received = drain(&mut bob_rx);
        assert_eq!(
            received,
            vec![serde_json::json!({
                "type": "chat",
                "text": "hi",
                "senderId": alice_id.id,
                "senderDisplayName": "alice"
            })]
        );
        assert_eq!(hub.history_len().await, 1);
    }

    #[tokio::test]
    async fn test_draw_stroke_id_shared_by_all_recipients() {
        let hub = full_hub();
        let (alice, alice_id, _, _alice_rx) = join(&hub, "alice").await;
        let (_, _, _, mut bob_rx) = join(&hub, "bob").await;
        let (_, _, _, mut carol_rx) = join(&hub, "carol").await;
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        let draw = r#"{"type":"draw","fromX":0,"fromY":0,"toX":5,"toY":5}"#;
        hub.publish(alice, &alice_id, draw).await.unwrap();
        hub.publish(alice, &alice_id, draw).await.unwrap();

        let bob = drain(&mut bob_rx);
        let carol = drain(&mut carol_rx);
        assert_eq!(bob.len(), 2);
        assert_eq!(bob, carol);

        let first = bob[0]["strokeId"].as_str().unwrap();
        let second = bob[1]["strokeId"].as_str().unwrap();
        assert!(!first.is_empty());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_late_joiner_replay_in_order() {
        let hub = full_hub();
        let (alice, alice_id, _, _alice_rx) = join(&hub, "alice").await;

        for n in 0..5 {
            let raw = format!(r#"{{"type":"chat","n":{n}}}"#);
            hub.publish(alice, &alice_id, &raw).await.unwrap();
        }

        let (_, _, replay, mut late_rx) = join(&hub, "late").await;
        let replayed: Vec<Value> = replay
            .iter()
            .map(|entry| serde_json::from_str(entry).unwrap())
            .collect();
        let order: Vec<i64> = replayed.iter().map(|v| v["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);

        // Nothing from before the join is queued live
        assert_eq!(drain(&mut late_rx), vec![serde_json::json!({"type": "userCount", "count": 2})]);

        hub.publish(alice, &alice_id, r#"{"type":"chat","n":5}"#).await.unwrap();
        let live = drain(&mut late_rx);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0]["n"], 5);
    }

    #[tokio::test]
    async fn test_per_sender_order_preserved() {
        let hub = full_hub();
        let (alice, alice_id, _, _alice_rx) = join(&hub, "alice").await;
        let (bob, bob_id, _, mut bob_rx) = join(&hub, "bob").await;
        let (_, _, _, mut carol_rx) = join(&hub, "carol").await;
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        hub.publish(alice, &alice_id, r#"{"type":"chat","m":1}"#).await.unwrap();
        hub.publish(bob, &bob_id, r#"{"type":"chat","m":2}"#).await.unwrap();
        hub.publish(alice, &alice_id, r#"{"type":"chat","m":3}"#).await.unwrap();

        let carol: Vec<i64> = drain(&mut carol_rx)
            .iter()
            .map(|v| v["m"].as_i64().unwrap())
            .collect();
        assert_eq!(carol, vec![1, 2, 3]);

        let bob: Vec<i64> = drain(&mut bob_rx)
            .iter()
            .map(|v| v["m"].as_i64().unwrap())
            .collect();
        assert_eq!(bob, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_failed_write_evicts_only_that_peer() {
        let hub = full_hub();
        let (alice, alice_id, _, _alice_rx) = join(&hub, "alice").await;
        let (dead, _, _, dead_rx) = join(&hub, "dead").await;
        let (_, _, _, mut bob_rx) = join(&hub, "bob").await;
        drain(&mut bob_rx);

        drop(dead_rx);
        let delivered = hub
            .publish(alice, &alice_id, r#"{"type":"chat","text":"still here"}"#)
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        let received = drain(&mut bob_rx);
        assert_eq!(received[0]["text"], "still here");
        assert_eq!(received[1], serde_json::json!({"type": "userCount", "count": 2}));

        assert!(!hub.is_registered(dead).await);
        assert_eq!(hub.connection_count().await, 2);
        assert!(!hub.leave(dead).await);
    }

    #[tokio::test]
    async fn test_backlogged_peer_is_evicted() {
        let hub = ConnectionHub::new(HubConfig {
            outbound_buffer: 2,
            ..HubConfig::default()
        });
        let (alice, alice_id, _, mut alice_rx) = join(&hub, "alice").await;
        // The slow peer never drains; its userCount from joining already sits in the queue
        let (slow, _, _, mut slow_rx) = join(&hub, "slow").await;
        drain(&mut alice_rx);

        hub.publish(alice, &alice_id, r#"{"type":"chat","n":1}"#).await.unwrap();
        assert!(hub.is_registered(slow).await);
        assert!(!slow_rx.close_requested());

        hub.publish(alice, &alice_id, r#"{"type":"chat","n":2}"#).await.unwrap();
        assert!(!hub.is_registered(slow).await);
        assert_eq!(hub.connection_count().await, 1);

        // The writer stops at once instead of flushing the stale backlog
        assert!(slow_rx.close_requested());
        assert!(slow_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_leave_closes_writer() {
        let hub = full_hub();
        let (alice, _, _, mut alice_rx) = join(&hub, "alice").await;
        assert!(!alice_rx.close_requested());

        hub.leave(alice).await;
        assert!(alice_rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_join_during_publishes_sees_each_message_once() {
        const TOTAL: i64 = 300;

        let hub = Arc::new(full_hub());
        let (alice, alice_id, _, _alice_rx) = join(&hub, "alice").await;

        let publisher = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for n in 0..TOTAL {
                    let raw = format!(r#"{{"type":"chat","n":{n}}}"#);
                    hub.publish(alice, &alice_id, &raw).await.unwrap();
                    if n % 8 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        while hub.history_len().await < (TOTAL / 4) as usize {
            tokio::task::yield_now().await;
        }
        let (_, _, replay, mut late_rx) = join(&hub, "late").await;
        publisher.await.unwrap();

        let mut seen: Vec<i64> = replay
            .iter()
            .map(|entry| serde_json::from_str::<Value>(entry).unwrap()["n"].as_i64().unwrap())
            .collect();
        assert!(!seen.is_empty());
        seen.extend(
            drain(&mut late_rx)
                .iter()
                .filter(|v| v["type"] == "chat")
                .map(|v| v["n"].as_i64().unwrap()),
        );

        assert_eq!(seen, (0..TOTAL).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_publish_after_eviction_is_rejected() {
        let hub = full_hub();
        let (alice, alice_id, _, _alice_rx) = join(&hub, "alice").await;
        hub.leave(alice).await;

        let result = hub.publish(alice, &alice_id, r#"{"type":"chat"}"#).await;
        assert!(matches!(result, Err(HubError::ConnectionNotFound)));
        assert_eq!(hub.history_len().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_message_not_recorded() {
        let hub = full_hub();
        let (alice, alice_id, _, _alice_rx) = join(&hub, "alice").await;
        let (_, _, _, mut bob_rx) = join(&hub, "bob").await;
        drain(&mut bob_rx);

        let result = hub.publish(alice, &alice_id, "{not json").await;
        assert!(matches!(result, Err(HubError::Malformed(_))));
        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(hub.history_len().await, 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let hub = ConnectionHub::new(HubConfig {
            max_connections: 2,
            ..HubConfig::default()
        });
        let _a = join(&hub, "a").await;
        let _b = join(&hub, "b").await;

        let (tx, _rx) = hub.channel();
        let result = hub.join(hub.allocate_id(), Identity::new("c"), tx).await;
        assert!(matches!(result, Err(HubError::TooManyConnections(2))));
        assert_eq!(hub.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_but_sender() {
        let hub = full_hub();
        let (alice, _, _, mut alice_rx) = join(&hub, "alice").await;
        let (_, _, _, mut bob_rx) = join(&hub, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let delivered = hub.broadcast(alice, Frame::text(r#"{"type":"ping"}"#)).await;
        assert_eq!(delivered, 1);
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![serde_json::json!({"type": "ping"})]);
        assert_eq!(hub.history_len().await, 0);

        hub.broadcast_user_count().await;
        assert_eq!(drain(&mut alice_rx).len(), 1);
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_minimal_profile_relays_raw_frames() {
        let hub = ConnectionHub::new(HubConfig {
            profile: Profile::Minimal,
            ..HubConfig::default()
        });

        let a = hub.allocate_id();
        let b = hub.allocate_id();
        let (a_tx, mut a_rx) = hub.channel();
        let (b_tx, mut b_rx) = hub.channel();
        hub.attach(a, a_tx).await.unwrap();
        hub.attach(b, b_tx).await.unwrap();

        // No user count announcements in the minimal profile
        assert!(a_rx.try_recv().is_err());

        hub.relay(a, Frame::text("not even json")).await.unwrap();
        hub.relay(a, Frame::binary(vec![0u8, 159, 146, 150])).await.unwrap();

        assert_eq!(b_rx.try_recv().unwrap(), Frame::text("not even json"));
        assert_eq!(b_rx.try_recv().unwrap(), Frame::binary(vec![0u8, 159, 146, 150]));
        assert!(a_rx.try_recv().is_err());
        assert_eq!(hub.history_len().await, 0);

        assert!(hub.leave(a).await);
        assert!(b_rx.try_recv().is_err());
    }
}
