// src/api/frames.rs — Frame forwarding: one analysis in flight per session
//
// A frame that arrives while its session is still being analysed is dropped,
// not queued, so memory is always updated in submission order.

use chrono::Utc;

use super::ApiState;
use crate::analysis::{AnalysisResult, Frame};
use crate::db::store::{DetectionRow, EventRow};
use crate::detection::Severity;
use crate::distribution::{ConnectionId, OutboundMessage};
use crate::escalation::Escalation;
use crate::session::InFlightGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Accepted,
    Dropped,
    /// The session is unknown or has ended; nothing was started.
    SessionEnded,
}

/// Start analysing a frame on a background task unless one is already running.
pub fn submit_frame(
    state: &ApiState,
    conn: ConnectionId,
    session_id: &str,
    frame: Frame,
) -> FrameDisposition {
    let Some(slot) = state.sessions.get(session_id).filter(|s| !s.is_closed()) else {
        tracing::debug!(session_id, "Frame for ended session rejected");
        return FrameDisposition::SessionEnded;
    };
    let Some(guard) = slot.try_begin_analysis() else {
        tracing::warn!(session_id, "Analysis in flight, dropping frame");
        return FrameDisposition::Dropped;
    };

    let state = state.clone();
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        analyze_and_distribute(state, conn, session_id, frame, guard).await;
    });
    FrameDisposition::Accepted
}

async fn analyze_and_distribute(
    state: ApiState,
    conn: ConnectionId,
    session_id: String,
    frame: Frame,
    guard: InFlightGuard,
) {
    let mut result = match state.pipeline.analyze_slot(guard.slot(), frame).await {
        Ok(result) => result,
        Err(e) => {
            tracing::debug!(session_id = %session_id, "Analysis result discarded: {e}");
            return;
        }
    };

    let escalation = state.escalation.evaluate(&session_id, &result);
    if let Some(stats) = state.sessions.stats(&session_id) {
        result.stats = Some(stats);
    }

    distribute(&state, &result, &escalation);

    state.router.send_to_connection(
        conn,
        OutboundMessage::AnalysisResult { result, escalation },
    );
}

/// Fan out to control centers first, then queue the durable writes.
fn distribute(state: &ApiState, result: &AnalysisResult, escalation: &Escalation) {
    for detection in &result.detections {
        state
            .router
            .broadcast_to_control_centers(OutboundMessage::NewDetection {
                unit_id: result.unit_id.clone(),
                session_id: Some(result.session_id.clone()),
                detection: detection.clone(),
            });
    }

    if escalation.urgent {
        let message = escalation
            .voice_alert
            .clone()
            .or_else(|| result.summary.clone())
            .unwrap_or_else(|| "Urgent hazard reported".to_string());
        let detection = result
            .detections
            .iter()
            .filter(|d| d.severity == Severity::Critical)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .cloned();
        let alert_id = uuid::Uuid::new_v4().to_string();

        state
            .router
            .broadcast_to_control_centers(OutboundMessage::UrgentAlert {
                alert_id: alert_id.clone(),
                unit_id: result.unit_id.clone(),
                message: message.clone(),
                priority: Severity::Critical.as_str().to_string(),
                timestamp: Utc::now(),
                detection,
            });

        let mut event = EventRow::new(Some(&result.unit_id), "urgent_alert", message)
            .with_priority(Severity::Critical.as_str());
        event.id = alert_id;
        if let Ok(payload) = serde_json::to_value(escalation) {
            event = event.with_payload(&payload);
        }
        state
            .router
            .persist("urgent alert", move |sink| async move {
                sink.insert_event(event).await
            });
    }

    for detection in &result.detections {
        let row = DetectionRow::from_detection(
            &result.unit_id,
            Some(&result.session_id),
            detection,
        );
        state
            .router
            .persist("detection", move |sink| async move {
                sink.insert_detection(row).await
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NullSink;
    use crate::infra::config::Config;
    use crate::provider::FrameImage;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_second_frame_dropped_while_in_flight() {
        let state = ApiState::new(&Config::default(), None, Arc::new(NullSink)).unwrap();
        let slot = state.sessions.start("engine-1");
        let held = slot.try_begin_analysis().unwrap();

        let frame = Frame::new(FrameImage::jpeg(vec![1, 2, 3]));
        assert_eq!(
            submit_frame(&state, 1, &slot.id(), frame.clone()),
            FrameDisposition::Dropped
        );

        drop(held);
        assert_eq!(
            submit_frame(&state, 1, &slot.id(), frame),
            FrameDisposition::Accepted
        );
    }

    #[tokio::test]
    async fn test_ended_or_unknown_session_rejected() {
        let state = ApiState::new(&Config::default(), None, Arc::new(NullSink)).unwrap();
        let slot = state.sessions.start("engine-1");
        let old_id = slot.id();
        state.sessions.start("engine-1");

        let frame = Frame::new(FrameImage::jpeg(vec![1, 2, 3]));
        assert_eq!(
            submit_frame(&state, 1, &old_id, frame.clone()),
            FrameDisposition::SessionEnded
        );
        assert_eq!(
            submit_frame(&state, 1, "no-such-session", frame),
            FrameDisposition::SessionEnded
        );
        assert_eq!(state.sessions.len(), 1);
        assert!(state.sessions.get(&old_id).is_none());
    }

    #[tokio::test]
    async fn test_degraded_result_reaches_unit_only() {
        let state = ApiState::new(&Config::default(), None, Arc::new(NullSink)).unwrap();
        let (unit, mut unit_rx) = state.router.connect();
        let (cc, mut cc_rx) = state.router.connect();
        state.router.register_unit(unit, "engine-1");
        state.router.register_control_center(cc, "op-1");
        let slot = state.sessions.start("engine-1");

        let frame = Frame::new(FrameImage::jpeg(vec![1, 2, 3]));
        submit_frame(&state, unit, &slot.id(), frame);

        match unit_rx.recv().await {
            Some(OutboundMessage::AnalysisResult { result, escalation }) => {
                assert!(result.is_degraded());
                assert!(!escalation.urgent);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(cc_rx.try_recv().is_err());
    }
}
