// tests/realtime_test.rs — Integration test: distribution server over real sockets

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use fieldwatch::api::{build_router, ApiState};
use fieldwatch::client::{ClientEvent, ConnectionManager, ConnectionOptions, ReconnectPolicy};
use fieldwatch::db::store::{DetectionRow, EventRow, UnitLocation};
use fieldwatch::db::DataSink;
use fieldwatch::infra::config::{Config, ServerConfig};
use fieldwatch::infra::errors::FieldwatchError;

const WAIT: Duration = Duration::from_secs(3);

/// Records every write so tests can wait on the side effects.
#[derive(Default)]
struct RecordingSink {
    inactive: Mutex<Vec<String>>,
    detections: Mutex<Vec<DetectionRow>>,
    events: Mutex<Vec<EventRow>>,
}

#[async_trait]
impl DataSink for RecordingSink {
    async fn upsert_unit_status(&self, _unit_id: String, _status: String) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_unit_location(&self, _location: UnitLocation) -> anyhow::Result<()> {
        Ok(())
    }

    async fn mark_unit_inactive(&self, unit_id: String) -> anyhow::Result<()> {
        self.inactive.lock().push(unit_id);
        Ok(())
    }

    async fn insert_detection(&self, row: DetectionRow) -> anyhow::Result<()> {
        self.detections.lock().push(row);
        Ok(())
    }

    async fn insert_event(&self, row: EventRow) -> anyhow::Result<()> {
        self.events.lock().push(row);
        Ok(())
    }
}

async fn spawn_server(sink: Arc<RecordingSink>) -> String {
    let state = ApiState::new(&Config::default(), None, sink).unwrap();
    let app = build_router(&ServerConfig::default(), state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Raw peer speaking the wire protocol directly.
struct Peer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Peer {
    async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.unwrap();
        Self { ws }
    }

    async fn send(&mut self, msg: Value) {
        self.ws.send(Message::text(msg.to_string())).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Skip messages until one of the given type arrives.
    async fn recv_type(&mut self, msg_type: &str) -> Value {
        loop {
            let msg = self.recv().await;
            if msg["type"] == msg_type {
                return msg;
            }
        }
    }

    async fn register_unit(url: &str, unit_id: &str) -> (Self, String) {
        let mut peer = Self::connect(url).await;
        peer.send(json!({"type": "register_unit", "unitId": unit_id})).await;
        let ack = peer.recv_type("registered").await;
        let session_id = ack["sessionId"].as_str().unwrap().to_string();
        (peer, session_id)
    }

    async fn register_control(url: &str, operator_id: &str) -> Self {
        let mut peer = Self::connect(url).await;
        peer.send(json!({"type": "register_control_center", "operatorId": operator_id}))
            .await;
        let ack = peer.recv_type("registered").await;
        assert_eq!(ack["role"], "control_center");
        peer
    }
}

#[tokio::test]
async fn test_detection_fans_out_to_control_centers_only() {
    let sink = Arc::new(RecordingSink::default());
    let url = spawn_server(sink.clone()).await;

    let mut cc1 = Peer::register_control(&url, "op-1").await;
    let mut cc2 = Peer::register_control(&url, "op-2").await;
    let (mut unit, session_id) = Peer::register_unit(&url, "engine-4").await;
    let (mut other_unit, _) = Peer::register_unit(&url, "ladder-1").await;

    let status = cc1.recv_type("unit_status_changed").await;
    assert_eq!(status["unitId"], "engine-4");
    assert_eq!(status["status"], "active");

    unit.send(json!({
        "type": "detection_created",
        "detection": {"id": "d-1", "type": "fire", "severity": "critical", "confidence": 0.9,
                      "description": "kitchen fire", "location": "kitchen"}
    }))
    .await;

    for cc in [&mut cc1, &mut cc2] {
        let msg = cc.recv_type("new_detection").await;
        assert_eq!(msg["unitId"], "engine-4");
        assert_eq!(msg["sessionId"], session_id.as_str());
        assert_eq!(msg["detection"]["type"], "fire");
    }

    // Units are not in the control-center audience.
    other_unit.send(json!({"type": "ping"})).await;
    assert_eq!(other_unit.recv().await["type"], "pong");

    wait_until(|| sink.detections.lock().len() == 1).await;
    assert_eq!(sink.detections.lock()[0].unit_id, "engine-4");
}

#[tokio::test]
async fn test_late_control_center_gets_no_replay() {
    let url = spawn_server(Arc::new(RecordingSink::default())).await;
    let mut early = Peer::register_control(&url, "op-1").await;
    let (mut unit, _) = Peer::register_unit(&url, "engine-4").await;

    unit.send(json!({"type": "location_update", "latitude": 51.5, "longitude": -0.12}))
        .await;
    let loc = early.recv_type("location_update").await;
    assert_eq!(loc["latitude"], 51.5);

    let mut late = Peer::register_control(&url, "op-2").await;
    late.send(json!({"type": "ping"})).await;
    assert_eq!(late.recv().await["type"], "pong");
}

#[tokio::test]
async fn test_command_relay_and_ack() {
    let sink = Arc::new(RecordingSink::default());
    let url = spawn_server(sink.clone()).await;
    let mut cc = Peer::register_control(&url, "op-1").await;
    let (mut unit, _) = Peer::register_unit(&url, "engine-4").await;

    cc.send(json!({"type": "send_command", "unitId": "engine-4", "command": "evacuate",
                   "payload": {"reason": "collapse"}}))
        .await;

    let received = unit.recv_type("command_received").await;
    assert_eq!(received["command"], "evacuate");
    assert_eq!(received["issuedBy"], "op-1");
    assert_eq!(received["payload"]["reason"], "collapse");

    let ack = cc.recv_type("command_ack").await;
    assert_eq!(ack["delivered"], true);

    // Unit drops: marked inactive, later commands are acknowledged undelivered.
    unit.ws.close(None).await.unwrap();
    wait_until(|| sink.inactive.lock().contains(&"engine-4".to_string())).await;

    cc.send(json!({"type": "send_command", "unitId": "engine-4", "command": "report"}))
        .await;
    let ack = cc.recv_type("command_ack").await;
    assert_eq!(ack["delivered"], false);
    assert_eq!(ack["command"], "report");

    wait_until(|| sink.events.lock().len() == 2).await;
    assert!(sink.events.lock().iter().all(|e| e.event_type == "command"));
}

#[tokio::test]
async fn test_unit_moving_connection_demotes_the_old_one() {
    let sink = Arc::new(RecordingSink::default());
    let url = spawn_server(sink.clone()).await;
    let mut cc = Peer::register_control(&url, "op-1").await;
    let (mut old, old_session) = Peer::register_unit(&url, "engine-1").await;
    let (mut new, new_session) = Peer::register_unit(&url, "engine-1").await;
    assert_ne!(old_session, new_session);

    let notice = old.recv_type("error").await;
    assert!(notice["message"].as_str().unwrap().contains("another connection"));

    // The old socket no longer speaks for the unit.
    old.send(json!({"type": "analyze_frame", "frame": "/9j/4AAQ"})).await;
    assert_eq!(old.recv().await["type"], "error");
    old.send(json!({
        "type": "detection_created",
        "detection": {"id": "d-old", "type": "smoke", "severity": "low", "confidence": 0.3,
                      "description": "haze", "location": "hall"}
    }))
    .await;
    assert_eq!(old.recv().await["type"], "error");

    // Peer detections are bounded before fan-out.
    new.send(json!({
        "type": "detection_created",
        "detection": {"id": "d-new", "type": "fire", "severity": "high", "confidence": 7.5,
                      "description": "flames", "location": "roof",
                      "bbox": {"x": 0.1, "y": 0.1, "width": 3.0, "height": 0.2}}
    }))
    .await;
    let msg = cc.recv_type("new_detection").await;
    assert_eq!(msg["detection"]["id"], "d-new");
    assert_eq!(msg["sessionId"], new_session.as_str());
    assert_eq!(msg["detection"]["confidence"], 1.0);
    assert!(msg["detection"].get("bbox").is_none());

    // The stale socket closing leaves the unit reachable.
    old.ws.close(None).await.unwrap();
    cc.send(json!({"type": "send_command", "unitId": "engine-1", "command": "report"}))
        .await;
    assert_eq!(new.recv_type("command_received").await["command"], "report");
    assert_eq!(cc.recv_type("command_ack").await["delivered"], true);
    assert!(!sink.inactive.lock().contains(&"engine-1".to_string()));
}

#[tokio::test]
async fn test_unregistered_and_malformed_messages_get_errors() {
    let url = spawn_server(Arc::new(RecordingSink::default())).await;
    let mut peer = Peer::connect(&url).await;

    peer.send(json!({"type": "location_update", "latitude": 1.0, "longitude": 2.0}))
        .await;
    let err = peer.recv().await;
    assert_eq!(err["type"], "error");

    peer.send(json!({"type": "no_such_message"})).await;
    assert_eq!(peer.recv().await["type"], "error");

    peer.send(json!({"type": "send_command", "unitId": "x", "command": "y"}))
        .await;
    assert_eq!(peer.recv().await["type"], "error");

    // Still connected.
    peer.send(json!({"type": "ping"})).await;
    assert_eq!(peer.recv().await["type"], "pong");
}

#[tokio::test]
async fn test_frame_without_provider_returns_degraded_result() {
    let url = spawn_server(Arc::new(RecordingSink::default())).await;
    let mut cc = Peer::register_control(&url, "op-1").await;
    let (mut unit, session_id) = Peer::register_unit(&url, "engine-4").await;

    unit.send(json!({"type": "analyze_frame", "frame": "/9j/4AAQ"})).await;
    let msg = unit.recv_type("analysis_result").await;
    assert_eq!(msg["result"]["mode"], "degraded");
    assert_eq!(msg["result"]["sessionId"], session_id.as_str());
    assert_eq!(msg["escalation"]["urgent"], false);

    // Nothing urgent reaches the operator.
    cc.send(json!({"type": "ping"})).await;
    let next = cc.recv().await;
    assert!(next["type"] == "pong" || next["type"] == "unit_status_changed");
}

#[tokio::test]
async fn test_connection_manager_end_to_end() {
    let url = spawn_server(Arc::new(RecordingSink::default())).await;

    let control = ConnectionManager::new(ConnectionOptions::default());
    control.connect(&url).await.unwrap();
    let ack = control.register_control_center("op-1").await.unwrap();
    assert_eq!(ack["role"], "control_center");

    let unit = ConnectionManager::new(ConnectionOptions::default());
    unit.connect(&url).await.unwrap();
    let ack = unit.register_unit("engine-9").await.unwrap();
    assert!(ack["sessionId"].is_string());

    let (tx, mut rx) = mpsc::unbounded_channel();
    unit.on("command_received", move |msg| {
        let _ = tx.send(msg["command"].as_str().unwrap_or_default().to_string());
    });

    assert!(control.send(
        "send_command",
        json!({"unitId": "engine-9", "command": "hold position"})
    ));
    let command = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(command, "hold position");

    unit.disconnect().await;
    assert!(!unit.is_connected());
    control.disconnect().await;
}

#[tokio::test]
async fn test_registration_timeout_against_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let manager = ConnectionManager::new(ConnectionOptions {
        register_timeout: Duration::from_millis(150),
        reconnect: ReconnectPolicy::default(),
    });
    manager.connect(&format!("ws://{addr}")).await.unwrap();

    let err = manager.register_unit("engine-1").await.unwrap_err();
    assert!(matches!(err, FieldwatchError::RegistrationTimeout { after_ms: 150 }));
    // Unregistered but still connected.
    assert!(manager.is_connected());
    assert_eq!(manager.handler_count("registered"), 0);
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // First connection is closed by the server, the second is kept.
        let (stream, _) = listener.accept().await.unwrap();
        let mut first = tokio_tungstenite::accept_async(stream).await.unwrap();
        first.close(None).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut second = tokio_tungstenite::accept_async(stream).await.unwrap();
        while second.next().await.is_some() {}
    });

    let manager = ConnectionManager::new(ConnectionOptions {
        register_timeout: Duration::from_millis(200),
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: 5,
        },
    });
    let mut events = manager.subscribe();
    manager.connect(&format!("ws://{addr}")).await.unwrap();

    let reconnected = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::Reconnected) => return true,
                Ok(ClientEvent::Failed) | Err(_) => return false,
                Ok(_) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(reconnected);
    assert!(manager.is_connected());
    manager.disconnect().await;
}
