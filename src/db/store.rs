// src/db/store.rs — SQLite operations

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Low-level SQLite operations for units, detections and events.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    // -- Units --

    pub fn upsert_unit_status(&self, unit_id: &str, status: &str) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO units (id, status, last_seen_at, created_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET status = ?2, last_seen_at = ?3",
            params![unit_id, status, now],
        )?;
        Ok(())
    }

    pub fn update_unit_location(&self, location: &UnitLocation) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO units (id, status, latitude, longitude, accuracy_m, last_seen_at, created_at)
             VALUES (?1, 'active', ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET latitude = ?2, longitude = ?3,
             accuracy_m = ?4, last_seen_at = ?5",
            params![
                location.unit_id,
                location.latitude,
                location.longitude,
                location.accuracy_m,
                now
            ],
        )?;
        Ok(())
    }

    /// Returns false when the unit was never recorded.
    pub fn mark_unit_inactive(&self, unit_id: &str) -> anyhow::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE units SET status = 'inactive', last_seen_at = ?1 WHERE id = ?2",
            params![now, unit_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_unit(&self, unit_id: &str) -> anyhow::Result<Option<UnitRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, status, latitude, longitude, accuracy_m, last_seen_at
                 FROM units WHERE id = ?1",
                params![unit_id],
                |row| {
                    Ok(UnitRow {
                        id: row.get(0)?,
                        status: row.get(1)?,
                        latitude: row.get(2)?,
                        longitude: row.get(3)?,
                        accuracy_m: row.get(4)?,
                        last_seen_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // -- Detections --

    /// At-least-once writers may repeat an id; repeats are ignored.
    pub fn insert_detection(&self, d: &DetectionRow) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO detections (id, unit_id, session_id, kind, severity,
             confidence, description, location, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                d.id,
                d.unit_id,
                d.session_id,
                d.kind,
                d.severity,
                d.confidence,
                d.description,
                d.location,
                d.payload,
                d.created_at
            ],
        )?;
        Ok(())
    }

    pub fn count_detections(&self, unit_id: Option<&str>) -> anyhow::Result<i64> {
        let count = match unit_id {
            Some(unit) => self.conn.query_row(
                "SELECT COUNT(*) FROM detections WHERE unit_id = ?1",
                params![unit],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    // -- Events --

    pub fn insert_event(&self, e: &EventRow) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO events (id, unit_id, event_type, priority, message, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                e.id,
                e.unit_id,
                e.event_type,
                e.priority,
                e.message,
                e.payload,
                e.created_at
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn recent_events(&self, limit: u32) -> anyhow::Result<Vec<EventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, unit_id, event_type, priority, message, payload, created_at
             FROM events ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(EventRow {
                id: row.get(0)?,
                unit_id: row.get(1)?,
                event_type: row.get(2)?,
                priority: row.get(3)?,
                message: row.get(4)?,
                payload: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

// -- Row types --

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitRow {
    pub id: String,
    pub status: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub last_seen_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitLocation {
    pub unit_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRow {
    pub id: String,
    pub unit_id: String,
    pub session_id: Option<String>,
    pub kind: String,
    pub severity: String,
    pub confidence: f64,
    pub description: String,
    pub location: String,
    /// Full detection as JSON.
    pub payload: Option<String>,
    pub created_at: String,
}

impl DetectionRow {
    pub fn from_detection(
        unit_id: &str,
        session_id: Option<&str>,
        d: &crate::detection::Detection,
    ) -> Self {
        Self {
            id: d.id.clone(),
            unit_id: unit_id.to_string(),
            session_id: session_id.map(str::to_string),
            kind: d.kind.as_str().to_string(),
            severity: d.severity.as_str().to_string(),
            confidence: f64::from(d.confidence),
            description: d.description.clone(),
            location: d.location.clone(),
            payload: serde_json::to_string(d).ok(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRow {
    pub id: String,
    pub unit_id: Option<String>,
    pub event_type: String,
    pub priority: Option<String>,
    pub message: String,
    pub payload: Option<String>,
    pub created_at: String,
}

impl EventRow {
    pub fn new(unit_id: Option<&str>, event_type: &str, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            unit_id: unit_id.map(str::to_string),
            event_type: event_type.to_string(),
            priority: None,
            message: message.into(),
            payload: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_priority(mut self, priority: &str) -> Self {
        self.priority = Some(priority.to_string());
        self
    }

    pub fn with_payload(mut self, payload: &serde_json::Value) -> Self {
        self.payload = Some(payload.to_string());
        self
    }
}
