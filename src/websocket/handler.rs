//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and drives one connection through
//! `AwaitingJoin -> Active -> Closed`.
//!
//! Each connection runs two tasks: a reader that owns the receiving half of
//! the socket and feeds the hub, and a writer that owns the sending half and
//! drains the connection's outbound queue. The writer is the only task that
//! ever writes to the socket once the connection is admitted.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    Sink, SinkExt, StreamExt,
};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::hub::{ConnectionHub, HubError, Profile};
use super::messages::{ClientMessage, Frame, ServerMessage};
use super::registry::{ConnectionId, Identity, Inbox, Outbox};
use crate::api::AppState;

/// WebSocket upgrade handler
///
/// This is the entry point for WebSocket connections.
/// It upgrades the HTTP connection to WebSocket and starts message handling.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, hub))
}

/// What a connection gets once it is admitted to the hub
struct Admission {
    /// `None` for pass-through connections
    identity: Option<Identity>,
    /// Frames to write before anything from the outbound queue
    preamble: Vec<Frame>,
}

/// Handle an established WebSocket connection
pub async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionHub>) {
    let connection_id = hub.allocate_id();
    tracing::debug!(connection_id = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let (outbox, inbox) = hub.channel();

    let admitted = match hub.config().profile {
        Profile::Full => admit_participant(&hub, connection_id, &mut receiver, outbox).await,
        Profile::Minimal => hub.attach(connection_id, outbox).await.map(|()| Admission {
            identity: None,
            preamble: Vec::new(),
        }),
    };

    let Admission { identity, preamble } = match admitted {
        Ok(admission) => admission,
        Err(e) => {
            reject(&mut sender, connection_id, e).await;
            return;
        }
    };

    let write_timeout = hub.config().write_timeout;

    // Task to forward queued frames to the WebSocket
    let mut send_task = tokio::spawn(write_loop(
        sender,
        preamble,
        inbox,
        write_timeout,
        connection_id,
    ));

    let hub_for_recv = Arc::clone(&hub);

    // Task to receive frames from the WebSocket and hand them to the hub
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_ws_message(&hub_for_recv, connection_id, identity.as_ref(), msg)
                        .await
                    {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    // Cleanup: unregister from hub
    hub.leave(connection_id).await;
    tracing::debug!(connection_id = %connection_id, "WebSocket closed");
}

/// Run the join handshake and register the participant.
///
/// The `joined` acknowledgement leads the preamble, followed by the history
/// replay, so the client sees its id before any other frame.
async fn admit_participant(
    hub: &ConnectionHub,
    connection_id: ConnectionId,
    receiver: &mut SplitStream<WebSocket>,
    outbox: Outbox,
) -> Result<Admission, HubError> {
    let identity = await_join(receiver).await?;

    let joined = ServerMessage::Joined {
        user_id: identity.id.clone(),
    }
    .to_frame()?;

    let replay = hub.join(connection_id, identity.clone(), outbox).await?;

    let mut preamble = Vec::with_capacity(replay.len() + 1);
    preamble.push(joined);
    preamble.extend(replay.into_iter().map(Frame::Text));

    Ok(Admission {
        identity: Some(identity),
        preamble,
    })
}

/// Read the first message, which must be a valid join
async fn await_join(receiver: &mut SplitStream<WebSocket>) -> Result<Identity, HubError> {
    while let Some(result) = receiver.next().await {
        let message = result.map_err(|e| HubError::Disconnected(e.to_string()))?;
        match message {
            Message::Text(text) => return parse_join(&text),
            Message::Binary(_) => {
                return Err(HubError::InvalidJoin("binary frame".to_string()));
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        }
    }

    Err(HubError::Disconnected("closed before joining".to_string()))
}

/// Validate a join message and mint the participant's identity
pub(crate) fn parse_join(text: &str) -> Result<Identity, HubError> {
    let ClientMessage::Join { username } = serde_json::from_str::<ClientMessage>(text)
        .map_err(|e| HubError::InvalidJoin(e.to_string()))?;

    if username.is_empty() {
        return Err(HubError::InvalidJoin("empty username".to_string()));
    }

    Ok(Identity::new(username))
}

/// Close a connection that was never admitted
async fn reject(
    sender: &mut SplitSink<WebSocket, Message>,
    connection_id: ConnectionId,
    error: HubError,
) {
    let (code, reason) = match &error {
        HubError::Disconnected(_) => {
            tracing::debug!(
                connection_id = %connection_id,
                error = %error,
                "Connection ended before admission"
            );
            return;
        }
        HubError::InvalidJoin(_) => (close_code::POLICY, "invalid join"),
        HubError::TooManyConnections(_) => (close_code::AGAIN, "session full"),
        _ => (close_code::ERROR, "internal error"),
    };

    tracing::warn!(connection_id = %connection_id, error = %error, "Rejecting connection");

    let close = Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }));
    let _ = sender.send(close).await;
}

/// Drain the preamble and then the outbound queue into the socket.
///
/// Stops as soon as the hub closes or drops the peer, leaving anything still
/// queued unwritten, and closes the socket. A failed or timed-out write also
/// ends the loop; dropping the inbox makes later deliveries fail so the hub
/// evicts this peer.
async fn write_loop<S>(
    mut sender: S,
    preamble: Vec<Frame>,
    mut inbox: Inbox,
    write_timeout: Duration,
    connection_id: ConnectionId,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    for frame in preamble {
        if inbox.close_requested() {
            break;
        }
        if !write_frame(&mut sender, frame, write_timeout, connection_id).await {
            return;
        }
    }

    while let Some(frame) = inbox.recv().await {
        if !write_frame(&mut sender, frame, write_timeout, connection_id).await {
            return;
        }
    }

    tracing::debug!(connection_id = %connection_id, "Peer closed, closing socket");
    let _ = tokio::time::timeout(write_timeout, sender.close()).await;
}

async fn write_frame<S>(
    sender: &mut S,
    frame: Frame,
    write_timeout: Duration,
    connection_id: ConnectionId,
) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(write_timeout, sender.send(frame.into_message())).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(
                connection_id = %connection_id,
                error = %e,
                "WebSocket send failed, closing connection"
            );
            false
        }
        Err(_) => {
            tracing::warn!(
                connection_id = %connection_id,
                timeout_ms = write_timeout.as_millis() as u64,
                "WebSocket send timed out, closing connection"
            );
            false
        }
    }
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
async fn handle_ws_message(
    hub: &ConnectionHub,
    connection_id: ConnectionId,
    identity: Option<&Identity>,
    message: Message,
) -> bool {
    let result = match (message, identity) {
        (Message::Text(text), Some(identity)) => hub.publish(connection_id, identity, &text).await,
        (Message::Text(text), None) => hub.relay(connection_id, Frame::text(text)).await,
        (Message::Binary(bytes), None) => hub.relay(connection_id, Frame::binary(bytes)).await,
        (Message::Binary(bytes), Some(identity)) => {
            tracing::debug!(
                connection_id = %connection_id,
                user_id = %identity.id,
                len = bytes.len(),
                "Discarding binary frame"
            );
            return true;
        }
        // Axum answers pings automatically
        (Message::Ping(_), _) | (Message::Pong(_), _) => return true,
        (Message::Close(_), _) => {
            tracing::debug!(connection_id = %connection_id, "Client requested close");
            return false;
        }
    };

    match result {
        Ok(recipients) => {
            tracing::trace!(connection_id = %connection_id, recipients, "Message fanned out");
            true
        }
        Err(HubError::Malformed(e)) => {
            tracing::debug!(
                connection_id = %connection_id,
                user_id = identity.map(|i| i.id.as_str()).unwrap_or("-"),
                error = %e,
                "Discarding malformed message"
            );
            true
        }
        Err(HubError::ConnectionNotFound) => {
            tracing::debug!(connection_id = %connection_id, "Connection was evicted");
            false
        }
        Err(e) => {
            tracing::error!(connection_id = %connection_id, error = %e, "Failed to fan out message");
            true
        }
    }
}
