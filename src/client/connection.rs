// src/client/connection.rs — Client side of the real-time channel
//
// One explicitly owned ConnectionManager per process. Inbound messages reach
// typed per-type handlers (`on`/`off`) and an in-process broadcast of
// ClientEvents; connectivity is reported on a watch channel. Registration
// state is not remembered across reconnects: callers re-register on
// `ClientEvent::Reconnected`.

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::backoff::ReconnectPolicy;
use crate::infra::config::ClientConfig;
use crate::infra::errors::FieldwatchError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Reconnect attempts exhausted. Persists until `connect` is called again.
    Failed,
}

/// In-process notifications, separate from the wire-level handlers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Reconnected,
    Disconnected,
    Failed,
    Message { msg_type: String, payload: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub register_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            register_timeout: DEFAULT_REGISTER_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl From<&ClientConfig> for ConnectionOptions {
    fn from(c: &ClientConfig) -> Self {
        Self {
            register_timeout: c.register_timeout(),
            reconnect: ReconnectPolicy::from(c),
        }
    }
}

struct Shared {
    handlers: RwLock<HashMap<String, Vec<(HandlerId, Handler)>>>,
    next_handler: AtomicU64,
    /// Present only while a socket is open.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ClientEvent>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn dispatch(&self, text: &str) {
        let payload: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Ignoring non-JSON message: {e}");
                return;
            }
        };
        let Some(msg_type) = payload.get("type").and_then(Value::as_str).map(str::to_string)
        else {
            tracing::debug!("Ignoring message without a type");
            return;
        };

        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .get(&msg_type)
            .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(&payload);
        }
        self.emit(ClientEvent::Message { msg_type, payload });
    }
}

struct Active {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

pub struct ConnectionManager {
    options: ConnectionOptions,
    shared: Arc<Shared>,
    active: tokio::sync::Mutex<Option<Active>>,
}

impl ConnectionManager {
    pub fn new(options: ConnectionOptions) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(256);
        Self {
            options,
            shared: Arc::new(Shared {
                handlers: RwLock::new(HashMap::new()),
                next_handler: AtomicU64::new(1),
                outbound: Mutex::new(None),
                status,
                events,
            }),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Open the channel. A no-op while a channel is open or being recovered.
    pub async fn connect(&self, endpoint: &str) -> Result<(), FieldwatchError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if !current.task.is_finished() {
                return Ok(());
            }
        }

        let url = parse_endpoint(endpoint)?;
        self.shared.set_status(ConnectionStatus::Connecting);
        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                self.shared.set_status(ConnectionStatus::Disconnected);
                return Err(FieldwatchError::Transport(format!("connect {endpoint}: {e}")));
            }
        };
        tracing::info!(endpoint, "Connected");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(
            self.shared.clone(),
            endpoint.to_string(),
            self.options.reconnect,
            socket,
            shutdown_rx,
        ));
        *active = Some(Active {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Close the channel. Client-initiated, so no reconnect follows.
    pub async fn disconnect(&self) {
        let Some(active) = self.active.lock().await.take() else {
            return;
        };
        let _ = active.shutdown.send(true);
        let _ = active.task.await;
        tracing::info!("Disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.outbound.lock().is_some()
    }

    /// Fire-and-forget. Returns false when no channel is open.
    pub fn send(&self, msg_type: &str, payload: Value) -> bool {
        let mut message = match payload {
            Value::Object(map) => Value::Object(map),
            Value::Null => json!({}),
            other => json!({ "payload": other }),
        };
        message["type"] = Value::String(msg_type.to_string());

        let outbound = self.shared.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.send(message.to_string()).is_ok(),
            None => {
                tracing::debug!(msg_type, "Not connected, message dropped");
                false
            }
        }
    }

    /// Register a handler. Several handlers per type may coexist; all fire.
    pub fn on(&self, msg_type: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.shared.next_handler.fetch_add(1, Ordering::Relaxed));
        self.shared
            .handlers
            .write()
            .entry(msg_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler, or every handler for the type when `id` is `None`.
    pub fn off(&self, msg_type: &str, id: Option<HandlerId>) {
        let mut handlers = self.shared.handlers.write();
        match id {
            None => {
                handlers.remove(msg_type);
            }
            Some(id) => {
                if let Some(list) = handlers.get_mut(msg_type) {
                    list.retain(|(h, _)| *h != id);
                    if list.is_empty() {
                        handlers.remove(msg_type);
                    }
                }
            }
        }
    }

    pub fn handler_count(&self, msg_type: &str) -> usize {
        self.shared
            .handlers
            .read()
            .get(msg_type)
            .map_or(0, Vec::len)
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Register as a field unit. Returns the `registered` payload.
    pub async fn register_unit(&self, unit_id: &str) -> Result<Value, FieldwatchError> {
        self.register("register_unit", json!({ "unitId": unit_id }))
            .await
    }

    /// Register as a control-center operator. Returns the `registered` payload.
    pub async fn register_control_center(&self, operator_id: &str) -> Result<Value, FieldwatchError> {
        self.register("register_control_center", json!({ "operatorId": operator_id }))
            .await
    }

    async fn register(&self, msg_type: &str, payload: Value) -> Result<Value, FieldwatchError> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let id = self.on("registered", move |v| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(v.clone());
            }
        });

        let result = if !self.send(msg_type, payload) {
            Err(FieldwatchError::NotConnected)
        } else {
            match tokio::time::timeout(self.options.register_timeout, rx).await {
                Ok(Ok(registered)) => Ok(registered),
                _ => Err(FieldwatchError::RegistrationTimeout {
                    after_ms: self.options.register_timeout.as_millis() as u64,
                }),
            }
        };
        self.off("registered", Some(id));
        result
    }
}

/// Only ws:// and wss:// endpoints are accepted.
fn parse_endpoint(endpoint: &str) -> Result<Url, FieldwatchError> {
    let url = Url::parse(endpoint)
        .map_err(|e| FieldwatchError::Protocol(format!("invalid endpoint {endpoint}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(FieldwatchError::Protocol(format!(
            "endpoint scheme must be ws or wss, got {other}"
        ))),
    }
}

/// Owns the socket for its whole life, reconnecting after server-side closes.
async fn supervise(
    shared: Arc<Shared>,
    endpoint: String,
    policy: ReconnectPolicy,
    mut socket: Socket,
    mut shutdown: watch::Receiver<bool>,
) {
    shared.set_status(ConnectionStatus::Connected);
    shared.emit(ClientEvent::Connected);

    loop {
        let (tx, rx) = mpsc::unbounded_channel();
        *shared.outbound.lock() = Some(tx);
        let client_closed = pump(&shared, socket, rx, &mut shutdown).await;
        *shared.outbound.lock() = None;

        if client_closed {
            shared.set_status(ConnectionStatus::Disconnected);
            shared.emit(ClientEvent::Disconnected);
            return;
        }

        tracing::warn!(endpoint = %endpoint, "Connection lost");
        shared.set_status(ConnectionStatus::Disconnected);
        shared.emit(ClientEvent::Disconnected);

        match reconnect(&shared, &endpoint, &policy, &mut shutdown).await {
            Some(next) => {
                socket = next;
                shared.set_status(ConnectionStatus::Connected);
                shared.emit(ClientEvent::Reconnected);
            }
            None => return,
        }
    }
}

/// Returns a new socket, or `None` if shut down or out of attempts.
async fn reconnect(
    shared: &Shared,
    endpoint: &str,
    policy: &ReconnectPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Socket> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(delay) = policy.delay(attempt) else {
            tracing::warn!(endpoint, "Giving up after {} reconnect attempts", attempt - 1);
            shared.set_status(ConnectionStatus::Failed);
            shared.emit(ClientEvent::Failed);
            return None;
        };
        shared.set_status(ConnectionStatus::Reconnecting {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
        tracing::info!(endpoint, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                shared.set_status(ConnectionStatus::Disconnected);
                return None;
            }
        }

        match connect_async(endpoint).await {
            Ok((socket, _)) => {
                tracing::info!(endpoint, attempt, "Reconnected");
                return Some(socket);
            }
            Err(e) => tracing::warn!(endpoint, attempt, "Reconnect failed: {e}"),
        }
    }
}

/// Shuttle frames until the socket closes. True when the close was ours.
async fn pump(
    shared: &Shared,
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            Some(text) = outbound.recv() => {
                if let Err(e) = ws_tx.send(Message::text(text)).await {
                    tracing::debug!("Send failed: {e}");
                    return false;
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
                Some(Ok(Message::Close(_))) | None => return false,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Socket error: {e}");
                    return false;
                }
            },
            _ = shutdown.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_send_without_connection_returns_false() {
        let manager = ConnectionManager::new(ConnectionOptions::default());
        assert!(!manager.is_connected());
        assert!(!manager.send("ping", Value::Null));
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_register_without_connection() {
        let manager = ConnectionManager::new(ConnectionOptions::default());
        let err = manager.register_unit("engine-1").await.unwrap_err();
        assert!(matches!(err, FieldwatchError::NotConnected));
        assert_eq!(manager.handler_count("registered"), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        let manager = ConnectionManager::new(ConnectionOptions::default());
        let err = manager.connect("ws://127.0.0.1:1/ws").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_runs_full_schedule_then_fails() {
        let manager = ConnectionManager::new(ConnectionOptions::default());
        let mut events = manager.subscribe();
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let started = tokio::time::Instant::now();
        let socket = reconnect(
            &manager.shared,
            "ws://127.0.0.1:1/ws",
            &ReconnectPolicy::default(),
            &mut shutdown_rx,
        )
        .await;

        assert!(socket.is_none());
        // 2 + 4 + 8 + 16 + 30 seconds of virtual sleep, no sixth attempt.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(61));
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Failed);
        assert!(matches!(events.try_recv(), Ok(ClientEvent::Failed)));
    }

    #[test]
    fn test_rejects_non_websocket_endpoint() {
        let manager = ConnectionManager::new(ConnectionOptions::default());
        let err = tokio_test::block_on(manager.connect("http://localhost:9320/ws")).unwrap_err();
        assert!(matches!(err, FieldwatchError::Protocol(_)));
        let err = tokio_test::block_on(manager.connect("not a url")).unwrap_err();
        assert!(matches!(err, FieldwatchError::Protocol(_)));
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_handlers_all_fire_and_can_be_removed() {
        let manager = ConnectionManager::new(ConnectionOptions::default());
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = hits.clone();
        let first = manager.on("new_detection", move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = hits.clone();
        manager.on("new_detection", move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
        });

        manager
            .shared
            .dispatch(r#"{"type": "new_detection", "unitId": "u1"}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        manager.off("new_detection", Some(first));
        manager.shared.dispatch(r#"{"type": "new_detection"}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 21);

        manager.off("new_detection", None);
        manager.shared.dispatch(r#"{"type": "new_detection"}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 21);
        assert_eq!(manager.handler_count("new_detection"), 0);
    }

    #[tokio::test]
    async fn test_dispatch_publishes_client_event() {
        let manager = ConnectionManager::new(ConnectionOptions::default());
        let mut events = manager.subscribe();
        manager.shared.dispatch(r#"{"type": "pong"}"#);
        manager.shared.dispatch("garbage");
        match events.try_recv() {
            Ok(ClientEvent::Message { msg_type, .. }) => assert_eq!(msg_type, "pong"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }
}
