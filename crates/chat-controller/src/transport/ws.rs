//! Axum WebSocket server.
//!
//! One socket = one `ConnectionActor` = one authenticated user device.
//! The fronting auth layer attaches the user ID (`x-user-id` header or
//! `user_id` query parameter); the core trusts it and never verifies
//! credentials itself.
//!
//! # Frame flow
//!
//! Inbound text frames parse into [`ClientFrame`] and dispatch to the
//! actor system. All outbound traffic for a connection, fanout and
//! request replies alike, goes through the connection actor's bounded
//! queue, so a client observes its frames in a single total order.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use common::types::{ConnectionId, RoomId, UserId};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::actors::call::CallHandle;
use crate::actors::connection::{ConnectionActor, ConnectionHandle};
use crate::actors::controller::ControllerHandle;
use crate::actors::metrics::ActorMetrics;
use crate::actors::room::RoomHandle;
use crate::errors::ChatError;
use crate::mute::MuteRegistry;
use crate::registry::SessionRegistry;
use crate::search::SyncNotifier;
use crate::store::{MessageKind, MessageStore};
use crate::transport::{ClientFrame, HistoryEntry, ServerFrame};

/// Default and maximum history page sizes.
const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 200;

/// Shared state for the WebSocket server.
pub struct AppState {
    /// Room map owner.
    pub controller: ControllerHandle,
    /// Call signaling coordinator.
    pub calls: CallHandle,
    /// Live connection registry.
    pub registry: Arc<SessionRegistry>,
    /// Mute registry.
    pub mutes: Arc<MuteRegistry>,
    /// Durable message store (history, deletes).
    pub store: Arc<dyn MessageStore>,
    /// Search synchronizer notification handle.
    pub sync: SyncNotifier,
    /// Shared actor metrics.
    pub metrics: Arc<ActorMetrics>,
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
    /// Root token; each connection gets a child.
    pub cancel: CancellationToken,
}

/// Build the WebSocket router.
pub fn ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Extract the authenticated user from the fronting layer's header or
/// query parameter.
fn extract_user_id(headers: &HeaderMap, params: &HashMap<String, String>) -> Option<UserId> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .or_else(|| params.get("user_id").map(String::as_str))?;
    Uuid::parse_str(raw).ok().map(UserId)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(user_id) = extract_user_id(&headers, &params) else {
        return (StatusCode::BAD_REQUEST, "missing or invalid user id").into_response();
    };

    if state.cancel.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "draining").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

/// Drive one WebSocket connection.
#[instrument(skip_all, name = "chat.transport.ws", fields(user_id = %user_id))]
async fn handle_socket(socket: WebSocket, user_id: UserId, state: Arc<AppState>) {
    let connection_id = ConnectionId::new();
    let cancel = state.cancel.child_token();

    let (outlet_tx, mut outlet_rx) = mpsc::channel::<ServerFrame>(state.queue_capacity);
    let (handle, _actor_task) = ConnectionActor::spawn(
        connection_id,
        user_id,
        state.queue_capacity,
        outlet_tx,
        cancel.clone(),
        Arc::clone(&state.metrics),
    );

    state.registry.register(handle.clone());
    info!(
        target: "chat.transport",
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket connected"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drain the connection actor's outlet onto the socket
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_cancel.cancelled() => break,
                frame = outlet_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let Ok(text) = serde_json::to_string(&frame) else {
                        warn!(target: "chat.transport", "Failed to serialize server frame");
                        continue;
                    };
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
        // Best-effort close frame
        let _ = ws_tx.close().await;
    });

    // Rooms this connection subscribed to, for cleanup without a
    // controller round-trip at disconnect
    let mut session = Session {
        state: Arc::clone(&state),
        handle: handle.clone(),
        connection_id,
        user_id,
        rooms: HashMap::new(),
    };

    // Reader loop
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(
                    target: "chat.transport",
                    connection_id = %connection_id,
                    "Connection cancelled"
                );
                break;
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.handle_text(&text).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        session.reply(ServerFrame::error(&ChatError::Internal(
                            "binary frames not supported".to_string(),
                        )));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(
                            target: "chat.transport",
                            connection_id = %connection_id,
                            "Client closed socket"
                        );
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(
                            target: "chat.transport",
                            connection_id = %connection_id,
                            error = %e,
                            "Socket error"
                        );
                        break;
                    }
                }
            }
        }
    }

    // Teardown: cancel the actor, unsubscribe from rooms, deregister
    cancel.cancel();
    for (room_id, room) in session.rooms.drain() {
        if room.unsubscribe(connection_id).await.is_err() {
            debug!(
                target: "chat.transport",
                room_id = %room_id,
                "Room gone during disconnect cleanup"
            );
        }
    }
    state.registry.deregister(connection_id);
    let _ = writer.await;

    info!(
        target: "chat.transport",
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket disconnected"
    );
}

/// Per-socket dispatch state.
struct Session {
    state: Arc<AppState>,
    handle: ConnectionHandle,
    connection_id: ConnectionId,
    user_id: UserId,
    rooms: HashMap<RoomId, RoomHandle>,
}

impl Session {
    /// Queue a reply frame. Goes through the connection actor so replies
    /// and fanout frames share one ordered queue.
    fn reply(&self, frame: ServerFrame) {
        let _ = self.handle.try_deliver(frame);
    }

    /// Parse and dispatch one inbound text frame.
    async fn handle_text(&mut self, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(
                    target: "chat.transport",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Unparseable client frame"
                );
                self.reply(ServerFrame::error(&ChatError::Internal(
                    "unparseable frame".to_string(),
                )));
                return;
            }
        };

        match self.dispatch(frame).await {
            Ok(reply) => self.reply(reply),
            Err(err) => self.reply(ServerFrame::error(&err)),
        }
    }

    /// Route a client frame to the owning actor.
    async fn dispatch(&mut self, frame: ClientFrame) -> Result<ServerFrame, ChatError> {
        match frame {
            ClientFrame::Chat { room_id, body } => {
                let room = self.room(room_id).await?;
                let message_id = room
                    .publish(self.user_id, MessageKind::Text, body)
                    .await?;
                Ok(ServerFrame::ack_message(message_id))
            }

            ClientFrame::Subscribe { room_id } => {
                let room = self.room(room_id).await?;
                room.subscribe(self.handle.clone()).await?;
                self.rooms.insert(room_id, room);
                self.state.registry.track_room(self.connection_id, room_id);
                Ok(ServerFrame::ack())
            }

            ClientFrame::Unsubscribe { room_id } => {
                if let Some(room) = self.rooms.remove(&room_id) {
                    room.unsubscribe(self.connection_id).await?;
                }
                self.state
                    .registry
                    .untrack_room(self.connection_id, room_id);
                Ok(ServerFrame::ack())
            }

            ClientFrame::Mute { room_id } => {
                self.state.mutes.mute(self.user_id, room_id);
                Ok(ServerFrame::ack())
            }

            ClientFrame::Unmute { room_id } => {
                self.state.mutes.unmute(self.user_id, room_id);
                Ok(ServerFrame::ack())
            }

            ClientFrame::History { room_id, limit } => {
                let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
                let room = self.room(room_id).await?;
                let messages = room.history(limit).await?;
                Ok(ServerFrame::History {
                    room_id,
                    messages: messages.iter().map(HistoryEntry::from).collect(),
                })
            }

            ClientFrame::Delete { message_id } => {
                let deleted = self
                    .state
                    .store
                    .mark_deleted(message_id, self.user_id)
                    .await?;
                if !deleted {
                    return Err(ChatError::MessageNotFound(message_id.to_string()));
                }
                self.state.sync.notify_delete(message_id);
                Ok(ServerFrame::ack())
            }

            ClientFrame::Invite { callee_id, media } => {
                let call_id = self
                    .state
                    .calls
                    .invite(self.user_id, callee_id, media)
                    .await?;
                Ok(ServerFrame::ack_call(call_id))
            }

            ClientFrame::Accept { call_id } => {
                self.state.calls.accept(call_id, self.user_id).await?;
                Ok(ServerFrame::ack())
            }

            ClientFrame::Reject { call_id } => {
                self.state.calls.reject(call_id, self.user_id).await?;
                Ok(ServerFrame::ack())
            }

            ClientFrame::Hangup { call_id } => {
                self.state.calls.hangup(call_id, self.user_id).await?;
                Ok(ServerFrame::ack())
            }
        }
    }

    /// Resolve a room handle, caching subscribed rooms locally.
    async fn room(&mut self, room_id: RoomId) -> Result<RoomHandle, ChatError> {
        if let Some(room) = self.rooms.get(&room_id) {
            if !room.is_cancelled() {
                return Ok(room.clone());
            }
            self.rooms.remove(&room_id);
        }
        self.state.controller.get_or_create_room(room_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_user_id_from_header() {
        let user = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", user.to_string().parse().unwrap());

        let extracted = extract_user_id(&headers, &HashMap::new());
        assert_eq!(extracted, Some(UserId(user)));
    }

    #[test]
    fn test_extract_user_id_from_query() {
        let user = Uuid::new_v4();
        let params = HashMap::from([("user_id".to_string(), user.to_string())]);

        let extracted = extract_user_id(&HeaderMap::new(), &params);
        assert_eq!(extracted, Some(UserId(user)));
    }

    #[test]
    fn test_extract_user_id_header_wins() {
        let header_user = Uuid::new_v4();
        let query_user = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", header_user.to_string().parse().unwrap());
        let params = HashMap::from([("user_id".to_string(), query_user.to_string())]);

        let extracted = extract_user_id(&headers, &params);
        assert_eq!(extracted, Some(UserId(header_user)));
    }

    #[test]
    fn test_extract_user_id_rejects_garbage() {
        let params = HashMap::from([("user_id".to_string(), "not-a-uuid".to_string())]);
        assert_eq!(extract_user_id(&HeaderMap::new(), &params), None);
        assert_eq!(extract_user_id(&HeaderMap::new(), &HashMap::new()), None);
    }
}
