// src/client/alerts.rs — Operator-side alert ordering and presentation
//
// Alerts move queued → speaking → delivered. Only high and critical alerts
// are queued for speech; everything accepted shows in the live list. At most
// one alert is speaking at a time.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

use crate::detection::Severity;
use crate::infra::config::AlertsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "urgent" => AlertPriority::Critical,
            "high" => AlertPriority::High,
            "medium" | "moderate" => AlertPriority::Medium,
            _ => AlertPriority::Low,
        }
    }

    pub fn is_spoken(&self) -> bool {
        *self >= AlertPriority::High
    }
}

impl From<Severity> for AlertPriority {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Critical => AlertPriority::Critical,
            Severity::High => AlertPriority::High,
            Severity::Medium => AlertPriority::Medium,
            Severity::Low | Severity::None => AlertPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSource {
    Pipeline,
    Operator,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Queued,
    Speaking,
    Delivered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub alert_type: String,
    pub text: String,
    pub priority: AlertPriority,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub source: AlertSource,
    pub state: AlertState,
    pub unit_id: Option<String>,
}

impl Alert {
    pub fn new(
        alert_type: impl Into<String>,
        text: impl Into<String>,
        priority: AlertPriority,
        source: AlertSource,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type: alert_type.into(),
            text: text.into(),
            priority,
            confidence: 1.0,
            timestamp: Utc::now(),
            source,
            state: AlertState::Queued,
            unit_id: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build an alert from a wire message the operator console received.
    pub fn from_message(msg_type: &str, payload: &Value) -> Option<Self> {
        let str_field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
        let unit_id = str_field(payload, "unitId");

        let mut alert = match msg_type {
            "urgent_alert" => {
                let detection = payload.get("detection");
                let alert_type = detection
                    .and_then(|d| str_field(d, "type"))
                    .unwrap_or_else(|| "urgent_alert".to_string());
                let priority = str_field(payload, "priority")
                    .map(|p| AlertPriority::parse_loose(&p))
                    .unwrap_or(AlertPriority::Critical);
                let confidence = detection
                    .and_then(|d| d.get("confidence"))
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0) as f32;
                let mut alert = Alert::new(
                    alert_type,
                    str_field(payload, "message")?,
                    priority,
                    AlertSource::Pipeline,
                )
                .with_confidence(confidence);
                if let Some(id) = str_field(payload, "alertId") {
                    alert.id = id;
                }
                alert
            }
            "new_detection" => {
                let d = payload.get("detection")?;
                let kind = str_field(d, "type")?;
                let severity = str_field(d, "severity")
                    .map(|s| Severity::parse_loose(&s))
                    .unwrap_or_default();
                let description = str_field(d, "description").unwrap_or_default();
                let location = str_field(d, "location").unwrap_or_default();
                let text = if location.is_empty() {
                    format!("{kind}: {description}")
                } else {
                    format!("{kind}: {description} at {location}")
                };
                let mut alert = Alert::new(
                    kind,
                    text,
                    AlertPriority::from(severity),
                    AlertSource::Pipeline,
                )
                .with_confidence(d.get("confidence").and_then(Value::as_f64).unwrap_or(0.5) as f32);
                if let Some(id) = str_field(d, "id") {
                    alert.id = id;
                }
                alert
            }
            "command_received" => Alert::new(
                "command",
                str_field(payload, "command")?,
                AlertPriority::High,
                AlertSource::Operator,
            ),
            "unit_message_received" => Alert::new(
                "unit_message",
                str_field(payload, "message")?,
                AlertPriority::Medium,
                AlertSource::System,
            ),
            _ => return None,
        };

        if let Some(ts) = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            alert.timestamp = ts.with_timezone(&Utc);
        }
        alert.unit_id = unit_id;
        Some(alert)
    }

    fn dedup_key(&self) -> (String, String) {
        (self.alert_type.clone(), self.text.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued for speech and shown live.
    Queued,
    /// Below speaking priority; shown live only.
    Displayed,
    /// Same type and description already queued or seen within the window.
    Duplicate,
}

/// Speaks or otherwise presents one alert.
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Writes alerts to the log in place of speech.
#[derive(Debug, Default)]
pub struct LogAnnouncer;

#[async_trait]
impl Announcer for LogAnnouncer {
    async fn announce(&self, alert: &Alert) -> anyhow::Result<()> {
        tracing::info!(
            priority = ?alert.priority,
            unit_id = alert.unit_id.as_deref().unwrap_or("-"),
            "ALERT: {}",
            alert.text
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Pending {
    alert: Alert,
    seq: u64,
}

#[derive(Debug)]
pub struct AlertQueue {
    dedup_window: Duration,
    live_limit: usize,
    history_limit: usize,
    live: VecDeque<Alert>,
    pending: Vec<Pending>,
    speaking: Option<Alert>,
    delivered: VecDeque<Alert>,
    recent: VecDeque<((String, String), DateTime<Utc>)>,
    next_seq: u64,
}

impl Default for AlertQueue {
    fn default() -> Self {
        Self::new(&AlertsConfig::default())
    }
}

impl AlertQueue {
    pub fn new(config: &AlertsConfig) -> Self {
        Self {
            dedup_window: Duration::milliseconds(config.dedup_window_ms as i64),
            live_limit: config.live_limit.max(1),
            history_limit: config.history_limit.max(1),
            live: VecDeque::new(),
            pending: Vec::new(),
            speaking: None,
            delivered: VecDeque::new(),
            recent: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, mut alert: Alert) -> PushOutcome {
        let key = alert.dedup_key();
        let cutoff = alert.timestamp - self.dedup_window;
        // Timestamps come from many units, so entries are not in time order.
        self.recent.retain(|(_, at)| *at >= cutoff);

        let queued_dup = self.pending.iter().any(|p| p.alert.dedup_key() == key)
            || self.speaking.as_ref().is_some_and(|a| a.dedup_key() == key);
        let recent_dup = self.recent.iter().any(|(k, _)| *k == key);
        if queued_dup || recent_dup {
            tracing::debug!(alert_type = %alert.alert_type, "Duplicate alert suppressed");
            return PushOutcome::Duplicate;
        }
        self.recent.push_back((key, alert.timestamp));

        let spoken = alert.priority.is_spoken();
        alert.state = if spoken {
            AlertState::Queued
        } else {
            AlertState::Delivered
        };

        self.live.push_back(alert.clone());
        while self.live.len() > self.live_limit {
            self.live.pop_front();
        }

        if !spoken {
            return PushOutcome::Displayed;
        }
        self.pending.push(Pending {
            alert,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        PushOutcome::Queued
    }

    /// Move the next alert to speaking. `None` while one is already speaking.
    pub fn start_next(&mut self) -> Option<Alert> {
        if self.speaking.is_some() || self.pending.is_empty() {
            return None;
        }
        let best = self
            .pending
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.alert
                    .priority
                    .cmp(&b.alert.priority)
                    .then(a.alert.confidence.total_cmp(&b.alert.confidence))
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)?;

        let mut alert = self.pending.remove(best).alert;
        alert.state = AlertState::Speaking;
        self.set_live_state(&alert.id, AlertState::Speaking);
        self.speaking = Some(alert.clone());
        Some(alert)
    }

    /// Mark the speaking alert delivered and move it to history.
    pub fn finish(&mut self) -> Option<Alert> {
        let mut alert = self.speaking.take()?;
        alert.state = AlertState::Delivered;
        self.set_live_state(&alert.id, AlertState::Delivered);
        self.delivered.push_back(alert.clone());
        while self.delivered.len() > self.history_limit {
            self.delivered.pop_front();
        }
        Some(alert)
    }

    /// Speak everything queued, one at a time.
    pub async fn drain(&mut self, announcer: &dyn Announcer) -> usize {
        let mut spoken = 0;
        while let Some(alert) = self.start_next() {
            if let Err(e) = announcer.announce(&alert).await {
                tracing::warn!(alert_id = %alert.id, "Announcement failed: {e}");
            }
            self.finish();
            spoken += 1;
        }
        spoken
    }

    fn set_live_state(&mut self, id: &str, state: AlertState) {
        if let Some(entry) = self.live.iter_mut().find(|a| a.id == id) {
            entry.state = state;
        }
    }

    pub fn speaking(&self) -> Option<&Alert> {
        self.speaking.as_ref()
    }

    pub fn queued_len(&self) -> usize {
        self.pending.len()
    }

    /// Live entries, oldest first.
    pub fn live(&self) -> impl Iterator<Item = &Alert> {
        self.live.iter()
    }

    /// Delivered alerts, oldest first.
    pub fn replay(&self) -> Vec<Alert> {
        self.delivered.iter().cloned().collect()
    }
}
