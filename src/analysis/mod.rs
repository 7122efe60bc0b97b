// src/analysis/mod.rs — Frame analysis pipeline
//
// context (short lock) → classifier call (no lock held) → reconcile (short lock).
// Classification is a two-step strategy: memory-aware prompt first, then the
// basic prompt, then a degraded empty result. Nothing here returns a parse or
// provider error to the caller.

pub mod parser;
pub mod prompt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::detection::Detection;
use crate::infra::config::AnalysisConfig;
use crate::infra::errors::FieldwatchError;
use crate::provider::{FrameImage, VisionProvider, VisionRequest};
use crate::session::memory::{MemoryUpdate, SessionStats};
use crate::session::{SessionRegistry, SessionSlot};
use parser::{parse_classification, ParsedClassification};
use prompt::PromptBuilder;

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Memory-aware prompt succeeded.
    Enhanced,
    /// Memory-aware prompt failed; basic prompt succeeded.
    Fallback,
    /// No usable classification. Detections are empty.
    Degraded,
}

/// A frame submitted for analysis.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: FrameImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: FrameImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn at(image: FrameImage, captured_at: DateTime<Utc>) -> Self {
        Self { image, captured_at }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: String,
    pub session_id: String,
    pub unit_id: String,
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub mode: AnalysisMode,
    pub detections: Vec<Detection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SessionStats>,
}

impl AnalysisResult {
    pub fn is_degraded(&self) -> bool {
        self.mode == AnalysisMode::Degraded
    }
}

/// Tagged outcome of the two-step classification strategy.
#[derive(Debug)]
enum Classification {
    Enhanced(ParsedClassification),
    Fallback(ParsedClassification),
    Failed(String),
}

pub struct AnalysisPipeline {
    provider: Option<Arc<dyn VisionProvider>>,
    sessions: Arc<SessionRegistry>,
    prompts: PromptBuilder,
    config: AnalysisConfig,
}

impl AnalysisPipeline {
    pub fn new(
        provider: Option<Arc<dyn VisionProvider>>,
        sessions: Arc<SessionRegistry>,
        config: AnalysisConfig,
    ) -> Result<Self, FieldwatchError> {
        Ok(Self {
            provider,
            sessions,
            prompts: PromptBuilder::new()?,
            config,
        })
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Analyse one frame for a session, creating the session's memory if needed.
    ///
    /// Returns `SessionClosed` only when the session ended while the
    /// classifier call was in flight; the late result is discarded.
    pub async fn analyze(
        &self,
        session_id: &str,
        frame: Frame,
    ) -> Result<AnalysisResult, FieldwatchError> {
        let slot = self.sessions.get_or_create(session_id);
        self.analyze_slot(&slot, frame).await
    }

    /// Analyse one frame against a session the caller already holds.
    pub async fn analyze_slot(
        &self,
        slot: &Arc<SessionSlot>,
        frame: Frame,
    ) -> Result<AnalysisResult, FieldwatchError> {
        if slot.is_closed() {
            return Err(FieldwatchError::SessionClosed { session_id: slot.id() });
        }
        let id = slot.id();
        let session_id = id.as_str();
        let (frame_number, captured_at) = slot.begin_frame(frame.captured_at);
        let unit_id = slot.unit_id();

        let context = slot.with_memory(|m| m.format_context(captured_at));

        let classification = self
            .classify(&unit_id, frame_number, &context, &frame.image)
            .await;

        if slot.is_closed() {
            tracing::debug!(session_id, frame_number, "Discarding result for ended session");
            return Err(FieldwatchError::SessionClosed {
                session_id: session_id.to_string(),
            });
        }

        let mut result = AnalysisResult {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            unit_id,
            frame_number,
            timestamp: captured_at,
            mode: AnalysisMode::Degraded,
            detections: Vec::new(),
            summary: None,
            degraded_reason: None,
            memory: None,
            stats: None,
        };

        let parsed = match classification {
            Classification::Enhanced(p) => {
                result.mode = AnalysisMode::Enhanced;
                p
            }
            Classification::Fallback(p) => {
                result.mode = AnalysisMode::Fallback;
                p
            }
            Classification::Failed(reason) => {
                tracing::warn!(session_id, frame_number, reason = %reason, "Analysis degraded");
                result.degraded_reason = Some(reason);
                result.stats = Some(slot.stats(captured_at));
                slot.mark_analyzed(Utc::now());
                return Ok(result);
            }
        };

        result.summary = parsed.summary;
        result.detections = parsed.detections;

        let (update, stats) = slot.with_memory(|m| {
            let update = m.record_frame_analysis(
                frame_number,
                captured_at,
                &result.detections,
                result.summary.clone(),
            );
            (update, m.get_stats(captured_at))
        });
        result.memory = Some(update);
        result.stats = Some(stats);
        slot.mark_analyzed(Utc::now());

        tracing::debug!(
            session_id,
            frame_number,
            mode = ?result.mode,
            detections = result.detections.len(),
            "Frame analysed"
        );
        Ok(result)
    }

    async fn classify(
        &self,
        unit_id: &str,
        frame_number: u64,
        memory_context: &str,
        image: &FrameImage,
    ) -> Classification {
        let Some(provider) = &self.provider else {
            return Classification::Failed("no classification provider configured".into());
        };

        let enhanced = match self.prompts.enhanced(unit_id, frame_number, memory_context) {
            Ok(prompt) => self.attempt(provider.as_ref(), prompt, image).await,
            Err(e) => Err(e),
        };
        let first_error = match enhanced {
            Ok(parsed) => return Classification::Enhanced(parsed),
            Err(e) => e,
        };

        if !self.config.fallback_to_basic {
            return Classification::Failed(first_error.to_string());
        }
        tracing::warn!(
            provider = provider.id(),
            "Memory-aware analysis failed, retrying with basic prompt: {}",
            first_error
        );

        let basic = match self.prompts.basic(unit_id, frame_number) {
            Ok(prompt) => self.attempt(provider.as_ref(), prompt, image).await,
            Err(e) => Err(e),
        };
        match basic {
            Ok(parsed) => Classification::Fallback(parsed),
            Err(e) => Classification::Failed(e.to_string()),
        }
    }

    async fn attempt(
        &self,
        provider: &dyn VisionProvider,
        prompt: String,
        image: &FrameImage,
    ) -> Result<ParsedClassification, FieldwatchError> {
        let request = VisionRequest {
            model: self.config.model.clone(),
            system: self.prompts.system()?,
            prompt,
            image: image.clone(),
            max_tokens: self.config.max_tokens,
        };
        let response = provider.classify(request).await?;
        tracing::debug!(
            provider = provider.id(),
            tokens = response.usage.total(),
            "Classification received"
        );
        let parsed = parse_classification(&response.content)?;
        if parsed.skipped > 0 {
            tracing::debug!(skipped = parsed.skipped, "Dropped detections outside the taxonomy");
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::HazardKind;
    use crate::provider::{TokenUsage, VisionResponse};
    use crate::session::memory::{MemoryLimits, NO_PRIOR_HISTORY};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Replays canned responses in order and records the prompts it saw.
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String, FieldwatchError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, FieldwatchError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VisionProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-1"
        }

        async fn classify(&self, request: VisionRequest) -> Result<VisionResponse, FieldwatchError> {
            self.prompts.lock().push(request.prompt);
            let reply = self
                .replies
                .lock()
                .pop()
                .unwrap_or_else(|| Ok(r#"{"detections": []}"#.into()))?;
            Ok(VisionResponse {
                content: reply,
                usage: TokenUsage::default(),
            })
        }
    }

    fn unavailable() -> FieldwatchError {
        FieldwatchError::Provider {
            provider: "scripted".into(),
            message: "HTTP 503".into(),
            retriable: true,
        }
    }

    fn pipeline(provider: Option<Arc<dyn VisionProvider>>) -> AnalysisPipeline {
        let sessions = Arc::new(SessionRegistry::new(MemoryLimits::default()));
        AnalysisPipeline::new(provider, sessions, AnalysisConfig::default()).unwrap()
    }

    fn frame() -> Frame {
        Frame::new(FrameImage::jpeg(vec![0xFF, 0xD8]))
    }

    const FIRE: &str = r#"{"summary": "fire", "detections": [{"type": "fire", "severity": "critical", "confidence": 0.9, "description": "kitchen fire", "location": "kitchen"}]}"#;

    #[tokio::test]
    async fn test_enhanced_result_is_recorded() {
        let provider = ScriptedProvider::new(vec![Ok(FIRE.into())]);
        let p = pipeline(Some(provider.clone()));
        let slot = p.sessions().start("engine-1");

        let result = p.analyze(&slot.id(), frame()).await.unwrap();
        assert_eq!(result.mode, AnalysisMode::Enhanced);
        assert_eq!(result.detections[0].kind, HazardKind::Fire);
        assert_eq!(result.frame_number, 1);
        assert_eq!(result.stats.as_ref().unwrap().total_hazards_seen, 1);
        assert!(provider.prompts.lock()[0].contains(NO_PRIOR_HISTORY));
    }

    #[tokio::test]
    async fn test_second_frame_sees_memory_context() {
        let provider = ScriptedProvider::new(vec![Ok(FIRE.into()), Ok(FIRE.into())]);
        let p = pipeline(Some(provider.clone()));
        p.analyze("s1", frame()).await.unwrap();
        p.analyze("s1", frame()).await.unwrap();
        let prompts = provider.prompts.lock();
        assert!(prompts[1].contains("TRACKED HAZARDS (1):"));
    }

    #[tokio::test]
    async fn test_fallback_after_malformed_output() {
        let provider = ScriptedProvider::new(vec![Ok("sorry, no".into()), Ok(FIRE.into())]);
        let p = pipeline(Some(provider.clone()));
        let result = p.analyze("s1", frame()).await.unwrap();
        assert_eq!(result.mode, AnalysisMode::Fallback);
        assert_eq!(result.detections.len(), 1);
        assert!(!provider.prompts.lock()[1].contains("Situation so far"));
    }

    #[tokio::test]
    async fn test_degraded_when_both_attempts_fail() {
        let provider = ScriptedProvider::new(vec![Err(unavailable()), Err(unavailable())]);
        let p = pipeline(Some(provider));
        let result = p.analyze("s1", frame()).await.unwrap();
        assert!(result.is_degraded());
        assert!(result.detections.is_empty());
        assert!(result.degraded_reason.unwrap().contains("HTTP 503"));
        assert!(result.memory.is_none());
    }

    #[tokio::test]
    async fn test_degraded_without_provider() {
        let p = pipeline(None);
        let result = p.analyze("never-registered", frame()).await.unwrap();
        assert!(result.is_degraded());
        assert_eq!(p.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_ended_slot_is_not_revived() {
        let provider = ScriptedProvider::new(vec![Ok(FIRE.into())]);
        let p = pipeline(Some(provider.clone()));
        let slot = p.sessions().start("engine-3");
        p.sessions().end(&slot.id());

        let err = p.analyze_slot(&slot, frame()).await.unwrap_err();
        assert!(matches!(err, FieldwatchError::SessionClosed { .. }));
        assert!(p.sessions().is_empty());
        assert!(provider.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_fallback_when_disabled() {
        let provider = ScriptedProvider::new(vec![Err(unavailable()), Ok(FIRE.into())]);
        let sessions = Arc::new(SessionRegistry::default());
        let config = AnalysisConfig {
            fallback_to_basic: false,
            ..AnalysisConfig::default()
        };
        let p = AnalysisPipeline::new(Some(provider.clone()), sessions, config).unwrap();
        let result = p.analyze("s1", frame()).await.unwrap();
        assert!(result.is_degraded());
        assert_eq!(provider.prompts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_result_discarded_for_ended_session() {
        struct EndingProvider {
            sessions: Arc<SessionRegistry>,
            session_id: String,
        }

        #[async_trait]
        impl VisionProvider for EndingProvider {
            fn id(&self) -> &str {
                "ending"
            }
            fn default_model(&self) -> &str {
                "ending-1"
            }
            async fn classify(&self, _r: VisionRequest) -> Result<VisionResponse, FieldwatchError> {
                self.sessions.end(&self.session_id);
                Ok(VisionResponse {
                    content: FIRE.into(),
                    usage: TokenUsage::default(),
                })
            }
        }

        let sessions = Arc::new(SessionRegistry::default());
        let slot = sessions.start("unit-9");
        let provider = Arc::new(EndingProvider {
            sessions: sessions.clone(),
            session_id: slot.id(),
        });
        let p = AnalysisPipeline::new(Some(provider), sessions, AnalysisConfig::default()).unwrap();
        let err = p.analyze(&slot.id(), frame()).await.unwrap_err();
        assert!(matches!(err, FieldwatchError::SessionClosed { .. }));
        assert_eq!(slot.stats(Utc::now()).frames_analyzed, 0);
    }
}
