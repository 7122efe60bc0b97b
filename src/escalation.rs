// src/escalation.rs — Urgency and spoken-alert selection for reconciled results

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::analysis::AnalysisResult;
use crate::detection::{Detection, Severity};
use crate::session::memory::CriticalEventKind;
use crate::session::SessionRegistry;

const EXPLOSION_RISK_ALERT: &str =
    "Explosion risk. Fire and a gas source are both present. Evacuate the area now.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyReason {
    ExplosionRisk,
    CriticalDetection,
    PersonMissing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    pub urgent: bool,
    pub voice_alert: Option<String>,
    /// Every reason that applied, highest priority first.
    pub reasons: Vec<UrgencyReason>,
}

pub struct EscalationEngine {
    sessions: Arc<SessionRegistry>,
}

impl EscalationEngine {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    /// Decide urgency for one result and record it on the session timeline.
    ///
    /// Degraded results are never urgent. The explosion-risk event itself is
    /// already on the timeline from reconciliation and is not appended twice.
    pub fn evaluate(&self, session_id: &str, result: &AnalysisResult) -> Escalation {
        let escalation = assess(result);
        if !escalation.urgent {
            return escalation;
        }

        let Some(slot) = self.sessions.get(session_id) else {
            tracing::debug!(session_id, "Escalation for unknown session, timeline not updated");
            return escalation;
        };

        let now = Utc::now();
        slot.with_memory(|memory| {
            if let Some(d) = most_critical(&result.detections) {
                memory.append_critical_event(
                    CriticalEventKind::CriticalDetection,
                    format!("{}: {}", d.kind, describe(d)),
                    now,
                );
            }
            if let Some(update) = &result.memory {
                for person in &update.missing_people {
                    memory.append_critical_event(
                        CriticalEventKind::PersonMissing,
                        format!("lost track of {} at {}", person.description, person.location),
                        now,
                    );
                }
            }
        });

        tracing::info!(
            session_id,
            reasons = ?escalation.reasons,
            "Escalated frame {}",
            result.frame_number
        );
        escalation
    }
}

/// Pure urgency decision, without side effects.
pub fn assess(result: &AnalysisResult) -> Escalation {
    let mut escalation = Escalation::default();
    if result.is_degraded() {
        return escalation;
    }

    let explosion = result
        .memory
        .as_ref()
        .is_some_and(|u| u.explosion_risk_started);
    let critical = most_critical(&result.detections);
    let missing = result
        .memory
        .as_ref()
        .and_then(|u| u.missing_people.first());

    if explosion {
        escalation.reasons.push(UrgencyReason::ExplosionRisk);
    }
    if critical.is_some() {
        escalation.reasons.push(UrgencyReason::CriticalDetection);
    }
    if missing.is_some() {
        escalation.reasons.push(UrgencyReason::PersonMissing);
    }
    escalation.urgent = !escalation.reasons.is_empty();

    escalation.voice_alert = if explosion {
        Some(EXPLOSION_RISK_ALERT.to_string())
    } else if let Some(d) = critical {
        Some(match &d.immediate_action {
            Some(action) => format!("Critical {}. {}. {}", d.kind, describe(d), action),
            None => format!("Critical {}. {}.", d.kind, describe(d)),
        })
    } else {
        missing.map(|p| {
            format!(
                "Person no longer visible. {} last seen at {}.",
                p.description, p.location
            )
        })
    };
    escalation
}

/// Highest-confidence critical detection, if any.
fn most_critical(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.severity == Severity::Critical)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

fn describe(d: &Detection) -> &str {
    if d.description.is_empty() {
        d.kind.as_str()
    } else {
        &d.description
    }
}
