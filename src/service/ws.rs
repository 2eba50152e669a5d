use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::{ApiError, SharedState};
use super::auth::{authenticate, bearer_token};
use crate::models::{Task, TaskId, TaskStatus, UserId};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Wire messages ────────────────────────────────────────────────────

/// Change notifications pushed to every socket of the task's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeMessage {
    #[serde(rename = "task:created")]
    TaskCreated(Task),
    #[serde(rename = "task:updated")]
    TaskUpdated(Task),
    #[serde(rename = "task:deleted")]
    TaskDeleted(TaskId),
}

/// Messages a board may send upstream. Advisory only: the server never
/// mutates state because of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "task:moved")]
    TaskMoved { id: TaskId, status: TaskStatus },
}

/// A serialized message addressed to one owner's connections.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub owner_id: UserId,
    pub payload: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

// ── Handler ──────────────────────────────────────────────────────────

/// Authenticates with `Authorization: Bearer` or `?token=` (browsers cannot
/// set headers on a socket handshake), then upgrades.
pub async fn ws_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<WsAuthQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token.filter(|t| !t.is_empty()));
    let Some(token) = token else {
        return ApiError::Unauthorized("Missing bearer credential".into()).into_response();
    };
    let user = match authenticate(&state, &token).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    // Subscribe before the upgrade completes so nothing emitted in between is lost.
    let rx = state.ws_tx.subscribe();
    let owner_id = user.id;
    ws.on_upgrade(move |socket| handle_socket(socket, owner_id, rx))
}

async fn handle_socket(socket: WebSocket, owner_id: UserId, rx: broadcast::Receiver<Broadcast>) {
    tracing::info!(%owner_id, "realtime client connected");
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, owner_id).await;
    tracing::info!(%owner_id, "realtime client disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards the owner's broadcasts, reads client frames and pings
/// periodically. If no Pong arrives within [`PONG_TIMEOUT`] after a Ping
/// the connection is considered dead and the loop exits. A subscriber that
/// falls behind the broadcast channel is closed as well.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<Broadcast>,
    owner_id: UserId,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(%owner_id, "pong timeout, dropping connection");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        let Some(payload) = payload_for(owner_id, &msg) else {
                            continue;
                        };
                        if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    // Skipped events cannot be replayed; closing makes the
                    // client reconnect and re-list.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%owner_id, skipped, "realtime subscriber lagged, closing");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => log_client_message(owner_id, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// The payload to forward on a connection of `owner_id`, if the broadcast
/// is addressed to it.
fn payload_for(owner_id: UserId, msg: &Broadcast) -> Option<&str> {
    (msg.owner_id == owner_id).then_some(msg.payload.as_str())
}

fn log_client_message(owner_id: UserId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::TaskMoved { id, status }) => {
            tracing::debug!(%owner_id, task_id = %id, %status, "client reported task move");
        }
        Err(e) => {
            tracing::debug!(%owner_id, error = %e, "ignoring unrecognised client message");
        }
    }
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize `msg` and publish it to the connections of `owner_id`.
/// Returns silently when nobody is listening.
pub fn broadcast_message(tx: &broadcast::Sender<Broadcast>, owner_id: UserId, msg: &RealtimeMessage) {
    match serde_json::to_string(msg) {
        Ok(payload) => {
            let _ = tx.send(Broadcast { owner_id, payload });
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize realtime message");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            title: "Test".to_string(),
            description: Some("Desc".to_string()),
            status: TaskStatus::InProgress,
            owner_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_task_created_serialization() {
        let task = sample_task();
        let json = serde_json::to_value(RealtimeMessage::TaskCreated(task.clone())).unwrap();
        assert_eq!(json["event"], "task:created");
        assert_eq!(json["data"]["title"], "Test");
        assert_eq!(json["data"]["status"], "In Progress");
        assert_eq!(json["data"]["id"], task.id.to_string());
    }

    #[test]
    fn test_task_deleted_carries_bare_id() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(RealtimeMessage::TaskDeleted(id)).unwrap();
        assert_eq!(json, serde_json::json!({"event": "task:deleted", "data": id.to_string()}));
    }

    #[test]
    fn test_realtime_message_roundtrip_deserialization() {
        let task = sample_task();
        let json = serde_json::to_string(&RealtimeMessage::TaskUpdated(task.clone())).unwrap();
        let parsed: RealtimeMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, RealtimeMessage::TaskUpdated(task));
    }

    #[test]
    fn test_client_task_moved_parses() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"event":"task:moved","data":{{"id":"{}","status":"Done"}}}}"#, id);
        let parsed: ClientMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::TaskMoved {
                id,
                status: TaskStatus::Done
            }
        );
    }

    #[test]
    fn test_payload_filtered_by_owner() {
        let owner = Uuid::new_v4();
        let msg = Broadcast {
            owner_id: owner,
            payload: "{}".into(),
        };
        assert_eq!(payload_for(owner, &msg), Some("{}"));
        assert_eq!(payload_for(Uuid::new_v4(), &msg), None);
    }

    #[tokio::test]
    async fn test_broadcast_channel_delivers_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(16);
        let owner = Uuid::new_v4();
        let id = Uuid::new_v4();
        broadcast_message(&tx, owner, &RealtimeMessage::TaskDeleted(id));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.owner_id, owner);
        assert!(received.payload.contains("task:deleted"));
        assert!(received.payload.contains(&id.to_string()));
    }

    #[tokio::test]
    async fn test_broadcast_no_receivers_does_not_panic() {
        let (tx, _) = broadcast::channel::<Broadcast>(16);
        broadcast_message(&tx, Uuid::new_v4(), &RealtimeMessage::TaskDeleted(Uuid::new_v4()));
    }
}
