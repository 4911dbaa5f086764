//! In-memory capability doubles for tests (A7), mirroring the teacher's
//! `MockLLMClient`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{
    BriefRequest, BriefResponse, CapabilityHealth, EditRequest, EditResponse, EditorCapability,
    MetadataRequest, MetadataResponse, MetadataCapability, ReviewCapability, ReviewRequest,
    ReviewResponse, ScriptCapability, ScriptRequest, ScriptResponse, TtsCapability, TtsRequest,
    TtsResponse, WriterCapability,
};
use crate::error::CapabilityError;

/// A reviewer that always returns a fixed confidence and tag set, optionally
/// forced to fail so cascade-escalation and fallback paths can be exercised.
pub struct MockReviewer {
    pub confidence: f64,
    pub tags: Vec<String>,
    pub fail: AtomicBool,
}

impl MockReviewer {
    pub fn new(confidence: f64, tags: Vec<String>) -> Self {
        Self {
            confidence,
            tags,
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CapabilityHealth for MockReviewer {
    async fn health_check(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewCapability for MockReviewer {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewResponse, CapabilityError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CapabilityError::Transport {
                capability: "mock_reviewer".to_string(),
                reason: "forced failure".to_string(),
            });
        }
        Ok(ReviewResponse {
            tags: self.tags.clone(),
            summary: format!("summary of {}", request.title),
            confidence: self.confidence,
        })
    }
}

pub struct MockWriter;

#[async_trait]
impl CapabilityHealth for MockWriter {
    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
impl WriterCapability for MockWriter {
    async fn brief(&self, request: &BriefRequest) -> Result<BriefResponse, CapabilityError> {
        Ok(BriefResponse {
            brief: format!(
                "brief for {} (presenter {}) covering {} articles",
                request.group_name,
                request.presenter_id,
                request.article_titles.len()
            ),
        })
    }
}

pub struct MockScript {
    pub fail: AtomicBool,
}

impl MockScript {
    pub fn new() -> Self {
        Self { fail: AtomicBool::new(false) }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockScript {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityHealth for MockScript {
    async fn health_check(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptCapability for MockScript {
    async fn generate_script(&self, request: &ScriptRequest) -> Result<ScriptResponse, CapabilityError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CapabilityError::Transport {
                capability: "mock_script".to_string(),
                reason: "forced failure".to_string(),
            });
        }
        Ok(ScriptResponse {
            script: format!("Script for {}: {}", request.group_name, request.briefs.join(" ")),
        })
    }
}

/// Lets tests hold onto a `MockScript` (e.g. to flip `set_fail` after the
/// capability set has been built) while the set itself only needs a trait
/// object.
#[async_trait]
impl ScriptCapability for std::sync::Arc<MockScript> {
    async fn generate_script(&self, request: &ScriptRequest) -> Result<ScriptResponse, CapabilityError> {
        (**self).generate_script(request).await
    }
}

#[async_trait]
impl CapabilityHealth for std::sync::Arc<MockScript> {
    async fn health_check(&self) -> bool {
        (**self).health_check().await
    }
}

pub struct MockEditor;

#[async_trait]
impl CapabilityHealth for MockEditor {
    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
impl EditorCapability for MockEditor {
    async fn edit(&self, request: &EditRequest) -> Result<EditResponse, CapabilityError> {
        Ok(EditResponse {
            edited_script: request.script.clone(),
        })
    }
}

pub struct MockMetadata;

#[async_trait]
impl CapabilityHealth for MockMetadata {
    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
impl MetadataCapability for MockMetadata {
    async fn generate_metadata(&self, request: &MetadataRequest) -> Result<MetadataResponse, CapabilityError> {
        Ok(MetadataResponse {
            title: format!("{} episode", request.group_name),
            description: request.script.chars().take(120).collect(),
        })
    }
}

pub struct MockTts {
    pub fail: AtomicBool,
}

impl MockTts {
    pub fn new() -> Self {
        Self { fail: AtomicBool::new(false) }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityHealth for MockTts {
    async fn health_check(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsCapability for MockTts {
    async fn synthesize(&self, request: &TtsRequest) -> Result<TtsResponse, CapabilityError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CapabilityError::Transport {
                capability: "mock_tts".to_string(),
                reason: "forced failure".to_string(),
            });
        }
        Ok(TtsResponse {
            audio_url: "https://cdn.example.com/mock.mp3".to_string(),
            duration_seconds: (request.script.len() as f64 / 15.0).max(1.0),
            byte_size: request.script.len() as u64 * 100,
        })
    }
}
