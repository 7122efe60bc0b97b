// src/analysis/parser.rs — Parse classifier output into detections
//
// Models wrap JSON in prose or code fences and drift from the taxonomy, so
// parsing is lenient per detection and strict only about there being a JSON
// payload at all.

use serde_json::Value;

use crate::detection::{BoundingBox, Detection, HazardKind, Severity};
use crate::infra::errors::FieldwatchError;

/// Parsed classification result.
#[derive(Debug, Clone, Default)]
pub struct ParsedClassification {
    pub summary: Option<String>,
    pub detections: Vec<Detection>,
    /// Entries dropped because their type is outside the taxonomy.
    pub skipped: usize,
}

/// Default confidence when the model omits one.
const DEFAULT_CONFIDENCE: f32 = 0.5;

pub fn parse_classification(text: &str) -> Result<ParsedClassification, FieldwatchError> {
    let value = extract_json(text)
        .ok_or_else(|| FieldwatchError::MalformedResponse("no JSON payload found".into()))?;

    let (summary, entries) = match &value {
        Value::Array(items) => (None, items.as_slice()),
        Value::Object(obj) => {
            let summary = obj
                .get("summary")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let entries: &[Value] = match obj.get("detections").or_else(|| obj.get("hazards")) {
                Some(Value::Array(items)) => items.as_slice(),
                Some(Value::Null) | None => &[],
                Some(_) => {
                    return Err(FieldwatchError::MalformedResponse(
                        "`detections` is not a list".into(),
                    ))
                }
            };
            (summary, entries)
        }
        _ => {
            return Err(FieldwatchError::MalformedResponse(
                "expected a JSON object or list".into(),
            ))
        }
    };

    let mut parsed = ParsedClassification {
        summary,
        ..Default::default()
    };
    for entry in entries {
        match parse_detection(entry) {
            Some(d) => parsed.detections.push(d),
            None => parsed.skipped += 1,
        }
    }
    Ok(parsed)
}

/// First complete JSON payload in the text, ignoring fences and prose.
///
/// Every `{` or `[` is tried in order and the first value that parses wins.
/// Lists only count when they hold objects, so prose like `[1]` or
/// `[see below]` is stepped over.
fn extract_json(text: &str) -> Option<Value> {
    text.match_indices(['{', '['])
        .filter_map(|(start, _)| {
            serde_json::Deserializer::from_str(&text[start..])
                .into_iter::<Value>()
                .next()?
                .ok()
        })
        .find(|value| match value {
            Value::Object(_) => true,
            Value::Array(items) => items.iter().all(Value::is_object),
            _ => false,
        })
}

fn parse_detection(entry: &Value) -> Option<Detection> {
    let kind = entry
        .get("type")
        .or_else(|| entry.get("kind"))
        .and_then(Value::as_str)
        .and_then(HazardKind::parse_loose)?;

    let severity = entry
        .get("severity")
        .and_then(Value::as_str)
        .map(Severity::parse_loose)
        .unwrap_or_default();

    let confidence = entry
        .get("confidence")
        .and_then(|c| {
            c.as_f64()
                .or_else(|| c.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        })
        .map(|c| c as f32)
        .filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_CONFIDENCE);

    let text = |field: &str| {
        entry
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .to_string()
    };

    let mut detection = Detection::new(
        kind,
        severity,
        confidence,
        text("description"),
        text("location"),
    );

    if let Some(count) = entry.get("count").and_then(Value::as_u64) {
        detection = detection.with_count(count.min(u32::MAX as u64) as u32);
    }
    if let Some(bbox) = entry.get("bbox").and_then(parse_bbox) {
        detection = detection.with_bbox(bbox);
    }
    let mut action = text("immediate_action");
    if action.is_empty() {
        action = text("immediateAction");
    }
    if !action.is_empty() {
        detection = detection.with_action(action);
    }
    Some(detection)
}

fn parse_bbox(v: &Value) -> Option<BoundingBox> {
    let nums: Vec<f32> = match v {
        Value::Array(items) => items.iter().filter_map(Value::as_f64).map(|n| n as f32).collect(),
        Value::Object(obj) => ["x", "y", "width", "height"]
            .iter()
            .filter_map(|k| obj.get(*k).and_then(Value::as_f64))
            .map(|n| n as f32)
            .collect(),
        _ => return None,
    };
    match nums.as_slice() {
        [x, y, w, h] => BoundingBox::new(*x, *y, *w, *h),
        _ => None,
    }
}
