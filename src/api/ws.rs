// src/api/ws.rs — Per-connection WebSocket handling
//
// Each socket gets a forward task draining its router queue and a read loop
// dispatching inbound messages. Dispatch never awaits: frame analysis and
// store writes run on their own tasks so one slow unit cannot hold up
// delivery to anyone else.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};

use super::frames::{submit_frame, FrameDisposition};
use super::ApiState;
use crate::analysis::Frame;
use crate::db::store::{DetectionRow, EventRow, UnitLocation};
use crate::distribution::{ConnectionId, InboundMessage, Membership, OutboundMessage, Role};
use crate::provider::FrameImage;

/// GET /ws — Upgrade to the real-time channel.
pub async fn ws_handler(State(state): State<ApiState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Connection-local state the read loop carries.
struct Peer {
    conn: ConnectionId,
    session_id: Option<String>,
}

async fn handle_socket(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let (conn, mut outbound) = state.router.connect();

    let forward_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(conn_id = conn, "Failed to encode {}: {e}", msg.type_name());
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut peer = Peer {
        conn,
        session_id: None,
    };

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match InboundMessage::parse(text.as_str()) {
                Ok(msg) => dispatch(&state, &mut peer, msg),
                Err(e) => {
                    tracing::debug!(
                        conn_id = conn,
                        text = %crate::util::clip(text.as_str(), 120),
                        "Malformed message: {e}"
                    );
                    reply(&state, conn, OutboundMessage::error(format!("malformed message: {e}")));
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = conn, "Socket error: {e}");
                break;
            }
        }
    }

    end_session(&state, &mut peer);
    state.router.disconnect(conn);
    forward_task.abort();
}

fn reply(state: &ApiState, conn: ConnectionId, msg: OutboundMessage) {
    state.router.send_to_connection(conn, msg);
}

fn end_session(state: &ApiState, peer: &mut Peer) {
    if let Some(session_id) = peer.session_id.take() {
        state.sessions.end(&session_id);
    }
}

fn dispatch(state: &ApiState, peer: &mut Peer, msg: InboundMessage) {
    let conn = peer.conn;
    match msg {
        InboundMessage::RegisterUnit { unit_id } => {
            end_session(state, peer);
            if !state.router.register_unit(conn, &unit_id) {
                return;
            }
            let slot = state.sessions.start(&unit_id);
            let session_id = slot.id();
            peer.session_id = Some(session_id.clone());

            reply(
                state,
                conn,
                OutboundMessage::Registered {
                    role: Role::Unit,
                    id: unit_id.clone(),
                    session_id: Some(session_id),
                },
            );
            state
                .router
                .broadcast_to_control_centers(OutboundMessage::UnitStatusChanged {
                    unit_id: unit_id.clone(),
                    status: "active".into(),
                    timestamp: Utc::now(),
                });
            state.router.persist("unit status", move |sink| async move {
                sink.upsert_unit_status(unit_id, "active".into()).await
            });
        }

        InboundMessage::RegisterControlCenter { operator_id } => {
            end_session(state, peer);
            if state.router.register_control_center(conn, &operator_id) {
                reply(
                    state,
                    conn,
                    OutboundMessage::Registered {
                        role: Role::ControlCenter,
                        id: operator_id,
                        session_id: None,
                    },
                );
            }
        }

        InboundMessage::SendCommand {
            unit_id,
            command,
            payload,
        } => {
            let Some(Membership::ControlCenter { operator_id }) = state.router.membership(conn)
            else {
                reply(state, conn, OutboundMessage::error("send_command requires register_control_center"));
                return;
            };
            let delivered = state.router.send_to_unit(
                &unit_id,
                OutboundMessage::CommandReceived {
                    command: command.clone(),
                    payload: payload.clone(),
                    issued_by: operator_id.clone(),
                    timestamp: Utc::now(),
                },
            );
            tracing::info!(unit_id = %unit_id, command = %command, delivered, "Command relayed");
            reply(
                state,
                conn,
                OutboundMessage::CommandAck {
                    unit_id: unit_id.clone(),
                    command: command.clone(),
                    delivered,
                },
            );
            let event = EventRow::new(Some(&unit_id), "command", command)
                .with_payload(&serde_json::json!({
                    "issuedBy": operator_id,
                    "payload": payload,
                    "delivered": delivered,
                }));
            state.router.persist("command", move |sink| async move {
                sink.insert_event(event).await
            });
        }

        InboundMessage::Ping => reply(state, conn, OutboundMessage::Pong),

        unit_msg => {
            let Some(unit_id) = state.router.unit_of(conn) else {
                reply(state, conn, OutboundMessage::error("register_unit first"));
                return;
            };
            dispatch_unit(state, peer, unit_id, unit_msg);
        }
    }
}

/// Messages only a registered unit may send.
fn dispatch_unit(state: &ApiState, peer: &mut Peer, unit_id: String, msg: InboundMessage) {
    let conn = peer.conn;
    let now = Utc::now();
    match msg {
        InboundMessage::DetectionCreated { detection } => {
            let detection = detection.normalized();
            state
                .router
                .broadcast_to_control_centers(OutboundMessage::NewDetection {
                    unit_id: unit_id.clone(),
                    session_id: peer.session_id.clone(),
                    detection: detection.clone(),
                });
            let row = DetectionRow::from_detection(&unit_id, peer.session_id.as_deref(), &detection);
            state.router.persist("detection", move |sink| async move {
                sink.insert_detection(row).await
            });
        }

        InboundMessage::UrgentAlert {
            message,
            priority,
            detection,
        } => {
            let alert_id = uuid::Uuid::new_v4().to_string();
            let priority = priority.unwrap_or_else(|| "critical".into());
            state
                .router
                .broadcast_to_control_centers(OutboundMessage::UrgentAlert {
                    alert_id: alert_id.clone(),
                    unit_id: unit_id.clone(),
                    message: message.clone(),
                    priority: priority.clone(),
                    timestamp: now,
                    detection,
                });
            let mut event =
                EventRow::new(Some(&unit_id), "urgent_alert", message).with_priority(&priority);
            event.id = alert_id;
            state.router.persist("urgent alert", move |sink| async move {
                sink.insert_event(event).await
            });
        }

        InboundMessage::LocationUpdate {
            latitude,
            longitude,
            accuracy,
        } => {
            state
                .router
                .broadcast_to_control_centers(OutboundMessage::LocationUpdate {
                    unit_id: unit_id.clone(),
                    latitude,
                    longitude,
                    accuracy,
                    timestamp: now,
                });
            let location = UnitLocation {
                unit_id,
                latitude,
                longitude,
                accuracy_m: accuracy,
            };
            state.router.persist("location", move |sink| async move {
                sink.update_unit_location(location).await
            });
        }

        InboundMessage::UnitStatusChange { status } => {
            state
                .router
                .broadcast_to_control_centers(OutboundMessage::UnitStatusChanged {
                    unit_id: unit_id.clone(),
                    status: status.clone(),
                    timestamp: now,
                });
            state.router.persist("unit status", move |sink| async move {
                sink.upsert_unit_status(unit_id, status).await
            });
        }

        InboundMessage::SendMessageToControl { message } => {
            state
                .router
                .broadcast_to_control_centers(OutboundMessage::UnitMessageReceived {
                    unit_id: unit_id.clone(),
                    message: message.clone(),
                    timestamp: now,
                });
            let event = EventRow::new(Some(&unit_id), "unit_message", message);
            state.router.persist("unit message", move |sink| async move {
                sink.insert_event(event).await
            });
        }

        InboundMessage::AnalyzeFrame { frame, captured_at } => {
            let image = match FrameImage::from_base64(&frame) {
                Ok(image) => image,
                Err(e) => {
                    reply(state, conn, OutboundMessage::error(e.to_string()));
                    return;
                }
            };
            let session_id = match &peer.session_id {
                Some(id) => id.clone(),
                None => {
                    let id = state.sessions.start(&unit_id).id();
                    peer.session_id = Some(id.clone());
                    id
                }
            };
            let frame = Frame::at(image, captured_at.unwrap_or(now));
            match submit_frame(state, conn, &session_id, frame) {
                FrameDisposition::Accepted => {}
                FrameDisposition::Dropped => tracing::debug!(unit_id = %unit_id, "Frame dropped"),
                FrameDisposition::SessionEnded => {
                    peer.session_id = None;
                    reply(state, conn, OutboundMessage::error("session ended, register_unit again"));
                }
            }
        }

        InboundMessage::EndSession => end_session(state, peer),

        // Handled before unit membership is checked.
        InboundMessage::RegisterUnit { .. }
        | InboundMessage::RegisterControlCenter { .. }
        | InboundMessage::SendCommand { .. }
        | InboundMessage::Ping => {}
    }
}
