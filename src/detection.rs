// src/detection.rs — Hazard/person detections produced from one frame

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed taxonomy of things the classifier may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    Fire,
    Smoke,
    Person,
    Child,
    GasSource,
    ExposedWiring,
    StructuralDamage,
}

impl HazardKind {
    pub const ALL: [HazardKind; 7] = [
        HazardKind::Fire,
        HazardKind::Smoke,
        HazardKind::Person,
        HazardKind::Child,
        HazardKind::GasSource,
        HazardKind::ExposedWiring,
        HazardKind::StructuralDamage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HazardKind::Fire => "fire",
            HazardKind::Smoke => "smoke",
            HazardKind::Person => "person",
            HazardKind::Child => "child",
            HazardKind::GasSource => "gas_source",
            HazardKind::ExposedWiring => "exposed_wiring",
            HazardKind::StructuralDamage => "structural_damage",
        }
    }

    /// People are tracked separately from hazard objects.
    pub fn is_person(&self) -> bool {
        matches!(self, HazardKind::Person | HazardKind::Child)
    }

    /// Map the loose spellings models produce onto the taxonomy.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let norm = norm.trim_matches('_');

        let kind = match norm {
            "fire" | "flame" | "flames" | "active_fire" => HazardKind::Fire,
            "smoke" => HazardKind::Smoke,
            "person" | "people" | "adult" | "victim" | "human" => HazardKind::Person,
            "child" | "kid" | "infant" | "baby" => HazardKind::Child,
            "gas_source" | "gas" | "gas_tank" | "gas_leak" | "gas_cylinder" | "propane"
            | "gas_line" => HazardKind::GasSource,
            "exposed_wiring" | "wiring" | "electrical" | "live_wire" | "downed_power_line"
            | "electrical_hazard" => HazardKind::ExposedWiring,
            "structural_damage" | "structural" | "collapse" | "debris" | "structural_collapse" => {
                HazardKind::StructuralDamage
            }
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for HazardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "severe" | "extreme" => Severity::Critical,
            "high" => Severity::High,
            "medium" | "moderate" => Severity::Medium,
            "low" | "minor" => Severity::Low,
            _ => Severity::None,
        }
    }

    /// High and critical detections are tracked as persistent hazard objects.
    pub fn is_elevated(&self) -> bool {
        *self >= Severity::High
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fractional bounding region, every coordinate in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Option<Self> {
        let inside = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        if [x, y, width, height].into_iter().all(inside) {
            Some(Self {
                x,
                y,
                width,
                height,
            })
        } else {
            None
        }
    }
}

/// One hazard or person observed in one frame. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: HazardKind,
    pub severity: Severity,
    pub confidence: f32,
    pub description: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immediate_action: Option<String>,
}

impl Detection {
    pub fn new(
        kind: HazardKind,
        severity: Severity,
        confidence: f32,
        description: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            description: description.into(),
            location: location.into(),
            count: None,
            bbox: None,
            immediate_action: None,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.immediate_action = Some(action.into());
        self
    }

    /// Bring a detection deserialized from a peer under the same bounds as
    /// one built with [`Detection::new`].
    pub fn normalized(mut self) -> Self {
        if self.id.trim().is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.bbox = self
            .bbox
            .and_then(|b| BoundingBox::new(b.x, b.y, b.width, b.height));
        self
    }
}
