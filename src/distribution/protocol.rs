// src/distribution/protocol.rs — Real-time channel wire messages
//
// Every frame is a JSON object with a snake_case "type" tag and camelCase
// fields, e.g. {"type": "register_unit", "unitId": "engine-4"}.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::AnalysisResult;
use crate::detection::Detection;
use crate::escalation::Escalation;

/// Messages peers send to the distribution server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    RegisterUnit {
        unit_id: String,
    },
    RegisterControlCenter {
        operator_id: String,
    },
    DetectionCreated {
        detection: Detection,
    },
    UrgentAlert {
        message: String,
        #[serde(default)]
        priority: Option<String>,
        #[serde(default)]
        detection: Option<Detection>,
    },
    LocationUpdate {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        accuracy: Option<f64>,
    },
    UnitStatusChange {
        status: String,
    },
    SendMessageToControl {
        message: String,
    },
    /// Base64 image, optionally as a data URL.
    AnalyzeFrame {
        frame: String,
        #[serde(default)]
        captured_at: Option<DateTime<Utc>>,
    },
    SendCommand {
        unit_id: String,
        command: String,
        #[serde(default)]
        payload: Value,
    },
    EndSession,
    Ping,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Unit,
    ControlCenter,
}

/// Messages the distribution server sends to peers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    Registered {
        role: Role,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    NewDetection {
        unit_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        detection: Detection,
    },
    UrgentAlert {
        alert_id: String,
        unit_id: String,
        message: String,
        priority: String,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detection: Option<Detection>,
    },
    LocationUpdate {
        unit_id: String,
        latitude: f64,
        longitude: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        accuracy: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    UnitStatusChanged {
        unit_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
    UnitMessageReceived {
        unit_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    CommandReceived {
        command: String,
        payload: Value,
        issued_by: String,
        timestamp: DateTime<Utc>,
    },
    AnalysisResult {
        result: AnalysisResult,
        escalation: Escalation,
    },
    CommandAck {
        unit_id: String,
        command: String,
        delivered: bool,
    },
    Pong,
    Error {
        message: String,
    },
}

impl OutboundMessage {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Registered { .. } => "registered",
            OutboundMessage::NewDetection { .. } => "new_detection",
            OutboundMessage::UrgentAlert { .. } => "urgent_alert",
            OutboundMessage::LocationUpdate { .. } => "location_update",
            OutboundMessage::UnitStatusChanged { .. } => "unit_status_changed",
            OutboundMessage::UnitMessageReceived { .. } => "unit_message_received",
            OutboundMessage::CommandReceived { .. } => "command_received",
            OutboundMessage::AnalysisResult { .. } => "analysis_result",
            OutboundMessage::CommandAck { .. } => "command_ack",
            OutboundMessage::Pong => "pong",
            OutboundMessage::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{HazardKind, Severity};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_registration() {
        let msg = InboundMessage::parse(r#"{"type": "register_unit", "unitId": "engine-4"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::RegisterUnit { unit_id } if unit_id == "engine-4"));

        let msg = InboundMessage::parse(r#"{"type": "register_control_center", "operatorId": "op-1"}"#)
            .unwrap();
        assert!(matches!(msg, InboundMessage::RegisterControlCenter { .. }));
    }

    #[test]
    fn test_parse_unit_events() {
        let msg = InboundMessage::parse(
            r#"{"type": "detection_created", "detection": {"id": "d1", "type": "smoke", "severity": "medium", "confidence": 0.6, "description": "grey smoke", "location": "roof"}}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::DetectionCreated { detection } => {
                assert_eq!(detection.kind, HazardKind::Smoke);
                assert_eq!(detection.severity, Severity::Medium);
            }
            other => panic!("unexpected {other:?}"),
        }

        let msg = InboundMessage::parse(r#"{"type": "location_update", "latitude": 51.5, "longitude": -0.12}"#)
            .unwrap();
        assert!(matches!(msg, InboundMessage::LocationUpdate { accuracy: None, .. }));

        assert!(matches!(
            InboundMessage::parse(r#"{"type": "ping"}"#).unwrap(),
            InboundMessage::Ping
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"type": "end_session"}"#).unwrap(),
            InboundMessage::EndSession
        ));
    }

    #[test]
    fn test_send_command_payload_defaults_to_null() {
        let msg = InboundMessage::parse(
            r#"{"type": "send_command", "unitId": "ladder-2", "command": "evacuate"}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::SendCommand { payload, .. } => assert!(payload.is_null()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(InboundMessage::parse(r#"{"type": "launch_rockets"}"#).is_err());
        assert!(InboundMessage::parse("not json").is_err());
    }

    #[test]
    fn test_outbound_shape() {
        let msg = OutboundMessage::CommandAck {
            unit_id: "ladder-2".into(),
            command: "evacuate".into(),
            delivered: false,
        };
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"type": "command_ack", "unitId": "ladder-2", "command": "evacuate", "delivered": false})
        );
        assert_eq!(msg.type_name(), "command_ack");
        assert_eq!(OutboundMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }
}
