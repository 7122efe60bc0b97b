// src/session/identity.rs — Stable identity keys for tracked entities
//
// A key is built from the detection's category, its in-frame location, and
// the descriptive words of its description. Condition words ("lying",
// "trapped", ...) are excluded so the same person keeps the same key while
// their state changes between frames.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detection::{Detection, HazardKind};

/// Words that carry no identity.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "in", "on", "at", "of", "with", "is", "are", "near", "by", "and", "to",
    "from", "appears", "visible", "seen", "possibly", "some", "there", "this", "that",
];

/// Words describing state rather than identity.
const CONDITION_WORDS: &[&str] = &[
    "lying", "standing", "sitting", "walking", "running", "moving", "motionless", "unconscious",
    "conscious", "injured", "trapped", "waving", "calling", "crawling", "bleeding", "burning",
    "spreading", "growing", "smoldering", "active", "leaking", "sparking", "down", "up",
    "stationary", "still",
];

/// Maximum descriptive tokens folded into a key.
const MAX_DESCRIPTOR_TOKENS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(String);

impl EntityKey {
    /// Derive the identity key for a detection.
    pub fn derive(detection: &Detection) -> Self {
        let class = entity_class(detection.kind);
        let location = normalize(&detection.location, usize::MAX, false);
        let descriptor = normalize(&detection.description, MAX_DESCRIPTOR_TOKENS, true);
        Self(format!("{class}|{location}|{descriptor}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn entity_class(kind: HazardKind) -> &'static str {
    if kind.is_person() {
        "person"
    } else {
        kind.as_str()
    }
}

/// Lowercase, strip punctuation, drop stopwords (and condition words when
/// asked), then keep the first `limit` tokens in order.
fn normalize(text: &str, limit: usize, drop_conditions: bool) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| !STOPWORDS.contains(t))
        .filter(|t| !(drop_conditions && CONDITION_WORDS.contains(t)))
        .take(limit)
        .collect::<Vec<_>>()
        .join("-")
}
