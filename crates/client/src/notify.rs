//! Realtime notification subscription
//!
//! Models the platform's push channel as a cancellable subscription with an
//! explicit lifecycle: `Connecting → Connected`, `Reconnecting` after a
//! dropped link (restarted with jittered backoff), `Closed` once cancelled.
//! Events arrive as a typed stream over an mpsc channel; frames the client
//! does not recognize surface as [`NotificationEvent::Raw`] instead of being
//! dropped.
//!
//! Transport is the SignalR-style JSON framing over a WebSocket: a handshake
//! record after connect, then `\u{1e}`-separated JSON records where type 1 is
//! an invocation and type 6 a ping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use palisade_common::resilience::{BackoffStrategy, Jitter};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ClientError;
use crate::session::Session;

const RECORD_SEPARATOR: char = '\u{1e}';

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle states of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Typed notification events
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    FriendRequest { sender_id: u64 },
    ChatMessage { conversation_id: u64 },
    PresenceChanged { user_id: u64 },
    /// Anything the client does not model yet
    Raw { target: String, payload: serde_json::Value },
}

/// Subscription transport settings
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// WebSocket endpoint of the realtime hub
    pub endpoint: String,
    /// Backoff between reconnect attempts
    pub reconnect_backoff: BackoffStrategy,
    /// Jitter applied to reconnect delays
    pub reconnect_jitter: Jitter,
    /// Event channel capacity
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://realtime.platform.example/notifications".to_string(),
            reconnect_backoff: BackoffStrategy::Exponential {
                initial: Duration::from_secs(1),
                base: 2.0,
                cap: Duration::from_secs(60),
            },
            reconnect_jitter: Jitter::Additive { max: Duration::from_millis(500) },
            channel_capacity: 64,
        }
    }
}

/// Handle for one running subscription
pub struct NotificationSubscription {
    state: Arc<RwLock<SubscriptionState>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl NotificationSubscription {
    /// Current lifecycle state
    pub fn state(&self) -> SubscriptionState {
        self.state.read().map(|s| *s).unwrap_or(SubscriptionState::Closed)
    }

    /// Cancel the subscription and wait for the read loop to wind down
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            if err.is_panic() {
                warn!("notification read loop panicked during shutdown");
            }
        }
    }
}

/// Open a subscription for the session's notifications
///
/// The returned receiver yields events until the subscription is closed; the
/// read loop reconnects on its own after a dropped link.
pub fn subscribe(
    session: &Session,
    config: NotificationConfig,
) -> (NotificationSubscription, mpsc::Receiver<NotificationEvent>) {
    let (events, receiver) = mpsc::channel(config.channel_capacity.max(1));
    let state = Arc::new(RwLock::new(SubscriptionState::Connecting));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run(
        session.clone(),
        config,
        Arc::clone(&state),
        events,
        cancel.clone(),
    ));

    (NotificationSubscription { state, cancel, task }, receiver)
}

async fn run(
    session: Session,
    config: NotificationConfig,
    state: Arc<RwLock<SubscriptionState>>,
    events: mpsc::Sender<NotificationEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let connection = tokio::select! {
            () = cancel.cancelled() => break,
            connection = connect(&session, &config) => connection,
        };

        match connection {
            Ok(mut ws) => {
                set_state(&state, SubscriptionState::Connected);
                info!("notification transport connected");
                attempt = 0;

                if read_loop(&mut ws, &events, &cancel).await == ReadOutcome::Cancelled {
                    break;
                }
                warn!("notification transport lost, reconnecting");
            }
            Err(err) => {
                warn!(error = %err, "notification connect failed");
            }
        }

        if cancel.is_cancelled() || events.is_closed() {
            break;
        }

        set_state(&state, SubscriptionState::Reconnecting);
        let delay = config
            .reconnect_jitter
            .apply(config.reconnect_backoff.delay_for(attempt.min(10)));
        attempt = attempt.saturating_add(1);

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    set_state(&state, SubscriptionState::Closed);
}

async fn connect(session: &Session, config: &NotificationConfig) -> Result<WsStream, ClientError> {
    let mut request = config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::Config(format!("invalid notification endpoint: {e}")))?;

    let cookie = http::HeaderValue::from_str(&session.cookie_header())
        .map_err(|e| ClientError::Config(format!("invalid session cookie: {e}")))?;
    request.headers_mut().insert(http::header::COOKIE, cookie);

    let (mut ws, _response) = connect_async(request)
        .await
        .map_err(|e| ClientError::Network(format!("websocket connect failed: {e}")))?;

    ws.send(Message::text(format!(
        "{{\"protocol\":\"json\",\"version\":1}}{RECORD_SEPARATOR}"
    )))
    .await
    .map_err(|e| ClientError::Network(format!("websocket handshake failed: {e}")))?;

    Ok(ws)
}

#[derive(Debug, PartialEq, Eq)]
enum ReadOutcome {
    Cancelled,
    Disconnected,
}

async fn read_loop(
    ws: &mut WsStream,
    events: &mpsc::Sender<NotificationEvent>,
    cancel: &CancellationToken,
) -> ReadOutcome {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return ReadOutcome::Cancelled,
            frame = ws.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                for record in text.as_str().split(RECORD_SEPARATOR).filter(|r| !r.is_empty()) {
                    match serde_json::from_str::<SignalRecord>(record) {
                        Ok(record) => match record.kind {
                            1 => {
                                if let Some(event) = record.into_event() {
                                    if events.send(event).await.is_err() {
                                        // Receiver dropped; nobody is listening
                                        return ReadOutcome::Cancelled;
                                    }
                                }
                            }
                            6 => {
                                let pong =
                                    format!("{{\"type\":6}}{RECORD_SEPARATOR}");
                                if ws.send(Message::text(pong)).await.is_err() {
                                    return ReadOutcome::Disconnected;
                                }
                            }
                            7 => return ReadOutcome::Disconnected,
                            _ => {}
                        },
                        Err(err) => {
                            debug!(error = %err, "unparseable notification record");
                        }
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return ReadOutcome::Disconnected,
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(error = %err, "notification read error");
                return ReadOutcome::Disconnected;
            }
        }
    }
}

fn set_state(state: &RwLock<SubscriptionState>, new_state: SubscriptionState) {
    if let Ok(mut guard) = state.write() {
        *guard = new_state;
    }
}

/// One `\u{1e}`-separated JSON record of the hub protocol
#[derive(Debug, Deserialize)]
struct SignalRecord {
    #[serde(rename = "type", default)]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<serde_json::Value>>,
}

impl SignalRecord {
    fn into_event(self) -> Option<NotificationEvent> {
        let target = self.target?;
        let arguments = self.arguments.unwrap_or_default();
        // Hubs sometimes double-encode the payload as a JSON string
        let payload = match arguments.first() {
            Some(serde_json::Value::String(s)) => {
                serde_json::from_str(s).unwrap_or(serde_json::Value::String(s.clone()))
            }
            Some(value) => value.clone(),
            None => serde_json::Value::Null,
        };

        let event = match target.as_str() {
            "FriendshipNotifications" => payload["EventArgs"]["UserId1"]
                .as_u64()
                .map(|sender_id| NotificationEvent::FriendRequest { sender_id }),
            "ChatNotifications" => payload["EventArgs"]["ConversationId"]
                .as_u64()
                .map(|conversation_id| NotificationEvent::ChatMessage { conversation_id }),
            "PresenceNotifications" => payload["EventArgs"]["UserId"]
                .as_u64()
                .map(|user_id| NotificationEvent::PresenceChanged { user_id }),
            _ => None,
        };

        Some(event.unwrap_or(NotificationEvent::Raw { target, payload }))
    }
}

/// Structured event tracker attached to outgoing operations so the platform
/// can de-duplicate deliveries
#[derive(Debug)]
pub struct EventTracker {
    prefix: String,
    sequence: AtomicU64,
}

impl EventTracker {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), sequence: AtomicU64::new(0) }
    }

    /// Produce the next tracker value: `{prefix}-{sequence}-{epoch_millis}`
    pub fn next(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        format!("{}-{}-{}", self.prefix, sequence, millis)
    }
}
