//! Auto-reconnecting subscriber for the realtime channel.
//!
//! Connects to `/ws` with the bearer credential, forwards decoded
//! `RealtimeMessage`s to the board runtime and relays advisory client
//! messages upstream. A dropped connection is retried after the initial
//! backoff, failed connects with exponential backoff; once `max_attempts`
//! consecutive attempts fail the subscriber reports `Lost` and exits.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::ReconnectSection;
use crate::service::ws::{ClientMessage, RealtimeMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the subscriber reports to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    Connected,
    /// The connection dropped; a reconnect is about to be attempted.
    Disconnected(String),
    Message(RealtimeMessage),
    /// Reconnection was abandoned.
    Lost(String),
}

/// Derive the socket URL from the service base URL.
pub fn ws_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/ws", base)
}

enum ConnectError {
    /// The server refused the credential; retrying cannot help.
    Rejected,
    Failed(String),
}

enum PumpEnd {
    Dropped(String),
    Shutdown,
}

pub struct RealtimeSubscriber {
    url: String,
    token: String,
    policy: ReconnectSection,
}

impl RealtimeSubscriber {
    pub fn new(server_url: &str, token: impl Into<String>, policy: ReconnectSection) -> Self {
        Self {
            url: ws_url(server_url),
            token: token.into(),
            policy,
        }
    }

    /// Run on a background task until `events` is dropped or reconnection
    /// is exhausted.
    pub fn spawn(
        self,
        events: mpsc::Sender<RealtimeEvent>,
        outbound: mpsc::Receiver<ClientMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(events, outbound))
    }

    pub async fn run(
        self,
        events: mpsc::Sender<RealtimeEvent>,
        outbound: mpsc::Receiver<ClientMessage>,
    ) {
        let mut outbound = Some(outbound);
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                _ = events.closed() => return,
                result = self.connect() => result,
            };

            match connected {
                Ok(socket) => {
                    attempt = 0;
                    tracing::info!(url = %self.url, "realtime channel connected");
                    if events.send(RealtimeEvent::Connected).await.is_err() {
                        return;
                    }
                    match pump(socket, &events, &mut outbound).await {
                        PumpEnd::Shutdown => return,
                        PumpEnd::Dropped(reason) => {
                            tracing::warn!(%reason, "realtime channel dropped");
                            if events.send(RealtimeEvent::Disconnected(reason)).await.is_err() {
                                return;
                            }
                            // A server that accepts and closes at once must not
                            // turn this into a busy loop.
                            tokio::select! {
                                _ = events.closed() => return,
                                _ = tokio::time::sleep(self.policy.backoff(1)) => {}
                            }
                        }
                    }
                }
                Err(ConnectError::Rejected) => {
                    tracing::warn!("realtime channel refused the credential");
                    let _ = events
                        .send(RealtimeEvent::Lost("credential rejected".into()))
                        .await;
                    return;
                }
                Err(ConnectError::Failed(reason)) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        tracing::warn!(attempt, %reason, "giving up on realtime channel");
                        let _ = events
                            .send(RealtimeEvent::Lost(format!(
                                "gave up after {} attempts: {}",
                                attempt, reason
                            )))
                            .await;
                        return;
                    }
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(attempt, ?delay, %reason, "realtime connect failed, retrying");
                    tokio::select! {
                        _ = events.closed() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect(&self) -> Result<Socket, ConnectError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Failed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ConnectError::Failed(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        match tokio_tungstenite::connect_async(request).await {
            Ok((socket, _)) => Ok(socket),
            Err(tungstenite::Error::Http(response))
                if response.status() == StatusCode::UNAUTHORIZED =>
            {
                Err(ConnectError::Rejected)
            }
            Err(e) => Err(ConnectError::Failed(e.to_string())),
        }
    }
}

async fn next_outbound(rx: &mut Option<mpsc::Receiver<ClientMessage>>) -> Option<ClientMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn pump(
    socket: Socket,
    events: &mpsc::Sender<RealtimeEvent>,
    outbound: &mut Option<mpsc::Receiver<ClientMessage>>,
) -> PumpEnd {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = events.closed() => {
                let _ = sink.send(Message::Close(None)).await;
                return PumpEnd::Shutdown;
            }

            out = next_outbound(outbound) => {
                let Some(msg) = out else {
                    *outbound = None;
                    continue;
                };
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if let Err(e) = sink.send(Message::text(json)).await {
                            return PumpEnd::Dropped(e.to_string());
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to serialize client message"),
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RealtimeMessage>(text.as_str()) {
                            Ok(msg) => {
                                if events.send(RealtimeEvent::Message(msg)).await.is_err() {
                                    return PumpEnd::Shutdown;
                                }
                            }
                            Err(e) => tracing::debug!(error = %e, "ignoring unrecognised realtime frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return PumpEnd::Dropped("closed by server".into());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpEnd::Dropped(e.to_string()),
                }
            }
        }
    }
}
