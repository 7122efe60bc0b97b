// src/session/mod.rs — Sessions and the registry that owns their memory
//
// A session binds one field unit's connection to one SessionMemory. The
// registry hands out Arc<SessionSlot>s; ending a session marks the slot
// closed so any analysis still in flight discards its result on arrival.

pub mod identity;
pub mod memory;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use memory::{MemoryLimits, SessionMemory, SessionStats};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub unit_id: String,
    pub created_at: DateTime<Utc>,
    pub frame_counter: u64,
    pub last_analysis_at: Option<DateTime<Utc>>,
    /// Session clock: the effective capture time of the latest frame.
    pub last_frame_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(unit_id: &str) -> Self {
        Self::with_id(&uuid::Uuid::new_v4().to_string(), unit_id)
    }

    fn with_id(id: &str, unit_id: &str) -> Self {
        Self {
            id: id.to_string(),
            unit_id: unit_id.to_string(),
            created_at: Utc::now(),
            frame_counter: 0,
            last_analysis_at: None,
            last_frame_at: None,
        }
    }
}

/// Everything one session owns.
#[derive(Debug)]
pub struct SessionSlot {
    session: Mutex<Session>,
    memory: Mutex<SessionMemory>,
    in_flight: AtomicBool,
    closed: AtomicBool,
}

impl SessionSlot {
    fn new(session: Session, limits: MemoryLimits) -> Self {
        let memory = SessionMemory::new(session.created_at, limits);
        Self {
            session: Mutex::new(session),
            memory: Mutex::new(memory),
            in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> String {
        self.session.lock().id.clone()
    }

    pub fn unit_id(&self) -> String {
        self.session.lock().unit_id.clone()
    }

    pub fn snapshot(&self) -> Session {
        self.session.lock().clone()
    }

    /// Claim the single analysis slot. `None` while another analysis runs.
    pub fn try_begin_analysis(self: &Arc<Self>) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { slot: self.clone() })
    }

    pub fn is_analysis_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Bump the frame counter and place the frame on the session clock.
    ///
    /// Capture times come from the unit's clock, so they are clamped to be no
    /// earlier than the previous frame (or session start) and no later than
    /// now. Returns the frame number and the effective capture time.
    pub fn begin_frame(&self, captured_at: DateTime<Utc>) -> (u64, DateTime<Utc>) {
        let mut s = self.session.lock();
        let floor = s.last_frame_at.unwrap_or(s.created_at);
        let at = captured_at.min(Utc::now()).max(floor);
        s.frame_counter += 1;
        s.last_frame_at = Some(at);
        (s.frame_counter, at)
    }

    pub fn mark_analyzed(&self, at: DateTime<Utc>) {
        self.session.lock().last_analysis_at = Some(at);
    }

    /// Short critical section over the memory store.
    pub fn with_memory<R>(&self, f: impl FnOnce(&mut SessionMemory) -> R) -> R {
        let mut memory = self.memory.lock();
        f(&mut memory)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> SessionStats {
        self.memory.lock().get_stats(now)
    }
}

/// Releases the session's analysis slot on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    slot: Arc<SessionSlot>,
}

impl InFlightGuard {
    pub fn slot(&self) -> &Arc<SessionSlot> {
        &self.slot
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slot.in_flight.store(false, Ordering::Release);
    }
}

/// All live sessions, keyed by session id, with a unit → session index.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    limits: MemoryLimits,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    by_unit: RwLock<HashMap<String, String>>,
}

impl SessionRegistry {
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            limits,
            sessions: RwLock::new(HashMap::new()),
            by_unit: RwLock::new(HashMap::new()),
        }
    }

    /// Start a fresh session for a unit, ending any previous one it had.
    pub fn start(&self, unit_id: &str) -> Arc<SessionSlot> {
        if let Some(previous) = self.session_for_unit(unit_id) {
            self.end(&previous.id());
        }
        let session = Session::new(unit_id);
        let id = session.id.clone();
        let slot = Arc::new(SessionSlot::new(session, self.limits.clone()));
        self.sessions.write().insert(id.clone(), slot.clone());
        self.by_unit.write().insert(unit_id.to_string(), id.clone());
        tracing::info!(session_id = %id, unit_id, "Session started");
        slot
    }

    /// Discard a session and its memory. Returns false if it was unknown.
    pub fn end(&self, session_id: &str) -> bool {
        let Some(slot) = self.sessions.write().remove(session_id) else {
            return false;
        };
        slot.close();
        let unit_id = slot.unit_id();
        let mut by_unit = self.by_unit.write();
        if by_unit.get(&unit_id).is_some_and(|id| id == session_id) {
            by_unit.remove(&unit_id);
        }
        tracing::info!(session_id, unit_id = %unit_id, "Session ended");
        true
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Look up a session, creating an anonymous one if it does not exist yet.
    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionSlot> {
        if let Some(slot) = self.get(session_id) {
            return slot;
        }
        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "Creating memory for unregistered session");
                Arc::new(SessionSlot::new(
                    Session::with_id(session_id, session_id),
                    self.limits.clone(),
                ))
            })
            .clone()
    }

    pub fn session_for_unit(&self, unit_id: &str) -> Option<Arc<SessionSlot>> {
        let id = self.by_unit.read().get(unit_id).cloned()?;
        self.get(&id)
    }

    pub fn stats(&self, session_id: &str) -> Option<SessionStats> {
        self.get(session_id).map(|s| s.stats(Utc::now()))
    }

    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> =
            self.sessions.read().values().map(|s| s.snapshot()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
