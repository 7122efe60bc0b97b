// src/analysis/prompt.rs — Classification prompts (minijinja templates)

use minijinja::{context, Environment};

use crate::detection::HazardKind;
use crate::infra::errors::FieldwatchError;

const SYSTEM_TEMPLATE: &str = r#"You are a hazard spotter supporting an emergency response team.
Inspect the image and report every visible hazard or person.
Allowed types: {{ kinds | join(", ") }}.
Allowed severities: none, low, medium, high, critical.
Reply with a single JSON object and nothing else:
{"summary": "<one sentence>", "detections": [{"type": "<type>", "severity": "<severity>", "confidence": <0.0-1.0>, "description": "<what it is>", "location": "<where in frame>", "count": <optional integer>, "bbox": [x, y, width, height] (optional, fractions 0-1), "immediate_action": "<optional instruction>"}]}
Use an empty detections list when nothing relevant is visible."#;

const FRAME_TEMPLATE: &str = r#"Frame {{ frame_number }} from unit {{ unit_id }}.
{% if context %}Situation so far:
{{ context }}

Keep descriptions and locations consistent with the tracked entities above when you see the same person or object again. Note anyone who has disappeared or whose condition changed.{% else %}Report what is visible in this frame.{% endif %}"#;

pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, FieldwatchError> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .map_err(template_error)?;
        env.add_template("frame", FRAME_TEMPLATE)
            .map_err(template_error)?;
        Ok(Self { env })
    }

    pub fn system(&self) -> Result<String, FieldwatchError> {
        let kinds: Vec<&str> = HazardKind::ALL.iter().map(|k| k.as_str()).collect();
        self.env
            .get_template("system")
            .and_then(|t| t.render(context! { kinds => kinds }))
            .map_err(template_error)
    }

    /// Memory-aware prompt. `memory_context` is embedded verbatim.
    pub fn enhanced(
        &self,
        unit_id: &str,
        frame_number: u64,
        memory_context: &str,
    ) -> Result<String, FieldwatchError> {
        self.render_frame(unit_id, frame_number, Some(memory_context))
    }

    /// Context-free prompt used by the fallback step.
    pub fn basic(&self, unit_id: &str, frame_number: u64) -> Result<String, FieldwatchError> {
        self.render_frame(unit_id, frame_number, None)
    }

    fn render_frame(
        &self,
        unit_id: &str,
        frame_number: u64,
        memory_context: Option<&str>,
    ) -> Result<String, FieldwatchError> {
        self.env
            .get_template("frame")
            .and_then(|t| {
                t.render(context! {
                    unit_id => unit_id,
                    frame_number => frame_number,
                    context => memory_context,
                })
            })
            .map_err(template_error)
    }
}

fn template_error(e: minijinja::Error) -> FieldwatchError {
    FieldwatchError::Other(anyhow::anyhow!("prompt template: {e}"))
}
