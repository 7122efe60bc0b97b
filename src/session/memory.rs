// src/session/memory.rs — Per-session situational memory
//
// Turns a sequence of independent frame classifications into one picture:
// a bounded history ring, tracked people and hazard objects keyed by
// EntityKey, environment flags, cumulative stats, and a critical-event
// timeline. Everything here is ephemeral and dies with the session.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use super::identity::EntityKey;
use crate::detection::{Detection, HazardKind, Severity};
use crate::infra::config::MemoryConfig;

/// Marker returned by `format_context` before the first recorded frame.
pub const NO_PRIOR_HISTORY: &str = "NO PRIOR HISTORY: first frame of this session.";

/// Sightings retained per tracked entity.
const MAX_SIGHTINGS: usize = 10;

const DIRECTION_WORDS: &[&str] = &[
    "north", "south", "east", "west", "left", "right", "upward", "upwards", "downward",
    "ceiling", "upstairs", "downstairs",
];

#[derive(Debug, Clone)]
pub struct MemoryLimits {
    pub history_limit: usize,
    pub stale_after: Duration,
    pub timeline_limit: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for MemoryLimits {
    fn from(c: &MemoryConfig) -> Self {
        Self {
            history_limit: c.history_limit.max(1),
            stale_after: Duration::seconds(c.stale_after_secs as i64),
            timeline_limit: c.timeline_limit.max(1),
        }
    }
}

/// One analysed frame as retained in the history ring.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sighting {
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub severity: Severity,
}

/// A person or hazard object believed to persist across frames.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    pub key: EntityKey,
    pub kind: HazardKind,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub description: String,
    pub location: String,
    pub severity: Severity,
    pub sightings: Vec<Sighting>,
}

impl TrackedEntity {
    fn new(key: EntityKey, d: &Detection, at: DateTime<Utc>) -> Self {
        Self {
            key,
            kind: d.kind,
            first_seen: at,
            last_seen: at,
            description: d.description.clone(),
            location: d.location.clone(),
            severity: d.severity,
            sightings: vec![Sighting {
                timestamp: at,
                description: d.description.clone(),
                severity: d.severity,
            }],
        }
    }

    fn observe(&mut self, d: &Detection, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
        self.description = d.description.clone();
        self.location = d.location.clone();
        self.severity = d.severity;
        self.sightings.push(Sighting {
            timestamp: at,
            description: d.description.clone(),
            severity: d.severity,
        });
        if self.sightings.len() > MAX_SIGHTINGS {
            let excess = self.sightings.len() - MAX_SIGHTINGS;
            self.sightings.drain(..excess);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StructuralIntegrity {
    #[default]
    Unknown,
    Damaged,
    Compromised,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentContext {
    pub has_fire: bool,
    pub has_gas_leak: bool,
    pub power_live: Option<bool>,
    pub structural_integrity: StructuralIntegrity,
    pub fire_spread_direction: Option<String>,
}

impl EnvironmentContext {
    pub fn explosion_risk(&self) -> bool {
        self.has_fire && self.has_gas_leak
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalEventKind {
    ExplosionRisk,
    CriticalDetection,
    PersonMissing,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: CriticalEventKind,
    pub description: String,
}

/// What one `record_frame_analysis` call changed.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUpdate {
    pub frame_number: u64,
    pub new_people: Vec<EntityKey>,
    pub updated_people: Vec<EntityKey>,
    pub missing_people: Vec<TrackedEntity>,
    pub new_hazards: Vec<EntityKey>,
    pub updated_hazards: Vec<EntityKey>,
    pub expired_hazards: Vec<EntityKey>,
    pub explosion_risk_started: bool,
    pub environment: EnvironmentContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurrentlyTracking {
    pub people: usize,
    pub hazards: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub elapsed_secs: i64,
    pub frames_analyzed: u64,
    pub total_people_seen: usize,
    pub total_hazards_seen: usize,
    pub critical_events: usize,
    pub currently_tracking: CurrentlyTracking,
}

/// Ephemeral memory owned by exactly one session.
#[derive(Debug)]
pub struct SessionMemory {
    limits: MemoryLimits,
    started_at: DateTime<Utc>,
    history: VecDeque<FrameRecord>,
    people: HashMap<EntityKey, TrackedEntity>,
    hazards: HashMap<EntityKey, TrackedEntity>,
    environment: EnvironmentContext,
    people_ever: HashSet<EntityKey>,
    hazards_ever: HashSet<EntityKey>,
    timeline: VecDeque<CriticalEvent>,
    critical_event_count: usize,
    explosion_risk_active: bool,
    frames_recorded: u64,
}

impl SessionMemory {
    pub fn new(started_at: DateTime<Utc>, limits: MemoryLimits) -> Self {
        Self {
            limits,
            started_at,
            history: VecDeque::new(),
            people: HashMap::new(),
            hazards: HashMap::new(),
            environment: EnvironmentContext::default(),
            people_ever: HashSet::new(),
            hazards_ever: HashSet::new(),
            timeline: VecDeque::new(),
            critical_event_count: 0,
            explosion_risk_active: false,
            frames_recorded: 0,
        }
    }

    /// Fold one frame's detections into memory.
    pub fn record_frame_analysis(
        &mut self,
        frame_number: u64,
        timestamp: DateTime<Utc>,
        detections: &[Detection],
        summary: Option<String>,
    ) -> MemoryUpdate {
        let mut update = MemoryUpdate {
            frame_number,
            ..Default::default()
        };

        self.history.push_back(FrameRecord {
            frame_number,
            timestamp,
            detections: detections.to_vec(),
            summary,
        });
        while self.history.len() > self.limits.history_limit {
            self.history.pop_front();
        }
        self.frames_recorded += 1;

        for d in detections {
            if d.kind.is_person() {
                let key = EntityKey::derive(d);
                match reconcile(&mut self.people, key.clone(), d, timestamp) {
                    Reconciled::Created => {
                        self.people_ever.insert(key.clone());
                        update.new_people.push(key);
                    }
                    Reconciled::Updated => push_unique(&mut update.updated_people, key),
                }
            } else if d.severity.is_elevated() {
                let key = EntityKey::derive(d);
                match reconcile(&mut self.hazards, key.clone(), d, timestamp) {
                    Reconciled::Created => {
                        self.hazards_ever.insert(key.clone());
                        update.new_hazards.push(key);
                    }
                    Reconciled::Updated => push_unique(&mut update.updated_hazards, key),
                }
            }
        }

        let cutoff = timestamp - self.limits.stale_after;
        update.missing_people = evict_stale(&mut self.people, cutoff);
        update.expired_hazards = evict_stale(&mut self.hazards, cutoff)
            .into_iter()
            .map(|e| e.key)
            .collect();

        self.update_environment(detections);

        let joint = self.environment.explosion_risk();
        if joint && !self.explosion_risk_active {
            self.append_critical_event(
                CriticalEventKind::ExplosionRisk,
                "explosion risk: active fire with gas source present",
                timestamp,
            );
            update.explosion_risk_started = true;
        }
        self.explosion_risk_active = joint;

        update.environment = self.environment.clone();
        update
    }

    fn update_environment(&mut self, current: &[Detection]) {
        // History already contains the current frame.
        let seen = |kind: HazardKind| {
            self.history
                .iter()
                .any(|f| f.detections.iter().any(|d| d.kind == kind))
        };
        self.environment.has_fire = seen(HazardKind::Fire);
        self.environment.has_gas_leak = seen(HazardKind::GasSource);

        for d in current {
            match d.kind {
                HazardKind::ExposedWiring => {
                    let text = d.description.to_lowercase();
                    if text.contains("de-energized")
                        || text.contains("deenergized")
                        || text.contains("no power")
                        || text.contains("power off")
                    {
                        self.environment.power_live = Some(false);
                    } else if d.severity >= Severity::Medium
                        || text.contains("spark")
                        || text.contains("live")
                    {
                        self.environment.power_live = Some(true);
                    }
                }
                HazardKind::StructuralDamage => {
                    let observed = match d.severity {
                        Severity::Critical => StructuralIntegrity::Critical,
                        Severity::High => StructuralIntegrity::Compromised,
                        Severity::Medium | Severity::Low => StructuralIntegrity::Damaged,
                        Severity::None => StructuralIntegrity::Unknown,
                    };
                    if observed > self.environment.structural_integrity {
                        self.environment.structural_integrity = observed;
                    }
                }
                HazardKind::Fire => {
                    if let Some(direction) = spread_direction(&d.description) {
                        self.environment.fire_spread_direction = Some(direction);
                    }
                }
                _ => {}
            }
        }

        if !self.environment.has_fire {
            self.environment.fire_spread_direction = None;
        }
    }

    pub fn append_critical_event(
        &mut self,
        kind: CriticalEventKind,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) {
        self.timeline.push_back(CriticalEvent {
            timestamp,
            kind,
            description: description.into(),
        });
        while self.timeline.len() > self.limits.timeline_limit {
            self.timeline.pop_front();
        }
        self.critical_event_count += 1;
    }

    /// Compact summary injected into the next classification request.
    pub fn format_context(&self, now: DateTime<Utc>) -> String {
        if self.history.is_empty() {
            return NO_PRIOR_HISTORY.to_string();
        }

        let mut out = String::new();
        let _ = writeln!(
            out,
            "SESSION: {}s elapsed, {} frames analysed",
            (now - self.started_at).num_seconds().max(0),
            self.frames_recorded
        );

        let _ = writeln!(out, "TRACKED PEOPLE ({}):", self.people.len());
        for p in sorted_by_first_seen(&self.people) {
            let _ = writeln!(
                out,
                "- {} at {} [{}], last seen {}s ago",
                p.description,
                p.location,
                p.severity,
                (now - p.last_seen).num_seconds().max(0)
            );
        }

        let _ = writeln!(out, "TRACKED HAZARDS ({}):", self.hazards.len());
        for h in sorted_by_first_seen(&self.hazards) {
            let _ = writeln!(
                out,
                "- {} {} at {} [{}]",
                h.kind, h.description, h.location, h.severity
            );
        }

        let env = &self.environment;
        let _ = write!(
            out,
            "ENVIRONMENT: fire={} gas_leak={} power_live={} structure={:?} fire_spread={}",
            yes_no(env.has_fire),
            yes_no(env.has_gas_leak),
            env.power_live.map(yes_no).unwrap_or("unknown"),
            env.structural_integrity,
            env.fire_spread_direction.as_deref().unwrap_or("unknown"),
        );
        if env.explosion_risk() {
            out.push_str("\nWARNING: explosion risk (fire + gas) already flagged");
        }
        out
    }

    /// O(1): every field is maintained incrementally.
    pub fn get_stats(&self, now: DateTime<Utc>) -> SessionStats {
        SessionStats {
            elapsed_secs: (now - self.started_at).num_seconds().max(0),
            frames_analyzed: self.frames_recorded,
            total_people_seen: self.people_ever.len(),
            total_hazards_seen: self.hazards_ever.len(),
            critical_events: self.critical_event_count,
            currently_tracking: CurrentlyTracking {
                people: self.people.len(),
                hazards: self.hazards.len(),
            },
        }
    }

    pub fn environment(&self) -> &EnvironmentContext {
        &self.environment
    }

    pub fn tracked_people(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.people.values()
    }

    pub fn tracked_hazards(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.hazards.values()
    }

    pub fn timeline(&self) -> impl Iterator<Item = &CriticalEvent> {
        self.timeline.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

enum Reconciled {
    Created,
    Updated,
}

fn reconcile(
    tracked: &mut HashMap<EntityKey, TrackedEntity>,
    key: EntityKey,
    d: &Detection,
    at: DateTime<Utc>,
) -> Reconciled {
    match tracked.get_mut(&key) {
        Some(existing) => {
            existing.observe(d, at);
            Reconciled::Updated
        }
        None => {
            tracked.insert(key.clone(), TrackedEntity::new(key, d, at));
            Reconciled::Created
        }
    }
}

fn evict_stale(
    tracked: &mut HashMap<EntityKey, TrackedEntity>,
    cutoff: DateTime<Utc>,
) -> Vec<TrackedEntity> {
    let stale: Vec<EntityKey> = tracked
        .values()
        .filter(|e| e.last_seen < cutoff)
        .map(|e| e.key.clone())
        .collect();
    stale.iter().filter_map(|k| tracked.remove(k)).collect()
}

fn push_unique(keys: &mut Vec<EntityKey>, key: EntityKey) {
    if !keys.contains(&key) {
        keys.push(key);
    }
}

fn sorted_by_first_seen(map: &HashMap<EntityKey, TrackedEntity>) -> Vec<&TrackedEntity> {
    let mut v: Vec<&TrackedEntity> = map.values().collect();
    v.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then_with(|| a.key.cmp(&b.key)));
    v
}

fn spread_direction(description: &str) -> Option<String> {
    let lower = description.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| DIRECTION_WORDS.contains(w))
        .map(str::to_string)
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
