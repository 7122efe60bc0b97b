// tests/memory_scenarios_test.rs — Integration test: session memory over frame sequences

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use fieldwatch::detection::{Detection, HazardKind, Severity};
use fieldwatch::session::identity::EntityKey;
use fieldwatch::session::memory::{CriticalEventKind, MemoryLimits, SessionMemory, NO_PRIOR_HISTORY};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn person(desc: &str, loc: &str) -> Detection {
    Detection::new(HazardKind::Person, Severity::High, 0.8, desc, loc)
}

fn fire() -> Detection {
    Detection::new(HazardKind::Fire, Severity::Critical, 0.9, "kitchen fire", "kitchen")
}

fn gas() -> Detection {
    Detection::new(HazardKind::GasSource, Severity::High, 0.8, "propane tank", "back porch")
}

fn explosion_events(memory: &SessionMemory) -> usize {
    memory
        .timeline()
        .filter(|e| e.kind == CriticalEventKind::ExplosionRisk)
        .count()
}

#[test]
fn test_people_count_monotonic_and_bounded_by_keys() {
    let mut memory = SessionMemory::new(t0(), MemoryLimits::default());
    let frames: Vec<Vec<Detection>> = vec![
        vec![person("adult male", "doorway")],
        vec![person("adult male lying", "doorway"), person("child", "window")],
        vec![],
        vec![person("adult male", "doorway")],
        vec![person("elderly woman", "stairs")],
    ];

    let mut keys = std::collections::HashSet::new();
    let mut last_total = 0;
    for (i, detections) in frames.iter().enumerate() {
        let at = t0() + Duration::seconds(5 * i as i64);
        for d in detections {
            keys.insert(EntityKey::derive(d));
        }
        memory.record_frame_analysis(i as u64 + 1, at, detections, None);
        let total = memory.get_stats(at).total_people_seen;
        assert!(total >= last_total);
        assert!(total <= keys.len());
        last_total = total;
    }
    // "lying" is a condition word, so the adult keeps one identity.
    assert_eq!(last_total, 3);
}

#[test]
fn test_person_evicted_after_thirty_seconds() {
    let mut memory = SessionMemory::new(t0(), MemoryLimits::default());
    memory.record_frame_analysis(1, t0(), &[person("firefighter", "hallway")], None);
    assert_eq!(memory.get_stats(t0()).currently_tracking.people, 1);

    let at = t0() + Duration::seconds(20);
    let update = memory.record_frame_analysis(2, at, &[], None);
    assert!(update.missing_people.is_empty());
    assert_eq!(memory.get_stats(at).currently_tracking.people, 1);

    let at = t0() + Duration::seconds(31);
    let update = memory.record_frame_analysis(3, at, &[], None);
    assert_eq!(update.missing_people.len(), 1);
    assert_eq!(update.missing_people[0].location, "hallway");
    let stats = memory.get_stats(at);
    assert_eq!(stats.currently_tracking.people, 0);
    assert_eq!(stats.total_people_seen, 1);
}

#[test]
fn test_joint_event_once_per_transition() {
    let limits = MemoryLimits {
        history_limit: 2,
        ..MemoryLimits::default()
    };
    let mut memory = SessionMemory::new(t0(), limits);
    let at = |s: i64| t0() + Duration::seconds(s);

    memory.record_frame_analysis(1, at(0), &[fire()], None);
    assert_eq!(explosion_events(&memory), 0);

    let update = memory.record_frame_analysis(2, at(2), &[gas()], None);
    assert!(update.explosion_risk_started);
    assert_eq!(explosion_events(&memory), 1);

    let update = memory.record_frame_analysis(3, at(4), &[fire(), gas()], None);
    assert!(!update.explosion_risk_started);
    assert_eq!(explosion_events(&memory), 1);

    // Two empty frames push fire and gas out of the two-frame window.
    memory.record_frame_analysis(4, at(6), &[], None);
    let update = memory.record_frame_analysis(5, at(8), &[], None);
    assert!(!update.environment.has_fire);
    assert!(!update.environment.explosion_risk());

    memory.record_frame_analysis(6, at(10), &[fire()], None);
    let update = memory.record_frame_analysis(7, at(12), &[gas()], None);
    assert!(update.explosion_risk_started);
    assert_eq!(explosion_events(&memory), 2);
    assert_eq!(memory.get_stats(at(12)).critical_events, 2);
}

#[test]
fn test_context_after_first_frame() {
    let mut memory = SessionMemory::new(t0(), MemoryLimits::default());
    assert_eq!(memory.format_context(t0()), NO_PRIOR_HISTORY);

    memory.record_frame_analysis(1, t0(), &[fire(), person("adult", "doorway")], None);
    let context = memory.format_context(t0() + Duration::seconds(3));
    assert!(context.contains("TRACKED PEOPLE (1):"));
    assert!(context.contains("TRACKED HAZARDS (1):"));
    assert!(context.contains("fire=yes"));
}

#[test]
fn test_history_ring_is_bounded() {
    let limits = MemoryLimits {
        history_limit: 3,
        ..MemoryLimits::default()
    };
    let mut memory = SessionMemory::new(t0(), limits);
    for i in 0..10 {
        memory.record_frame_analysis(i + 1, t0() + Duration::seconds(i as i64), &[], None);
    }
    assert_eq!(memory.history_len(), 3);
    assert_eq!(memory.get_stats(t0()).frames_analyzed, 10);
}
