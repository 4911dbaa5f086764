//! Capability clients (A5, §4.4, §4.7): typed HTTP boundaries to the seven
//! external models this orchestrator drives, generalized from the teacher's
//! `LLMClient` trait + `LLMClientPool` + `MockLLMClient` pattern
//! (`routing/engine.rs`). Each capability gets its own request/response shape
//! and its own trait so call sites depend on exactly the operation they need.

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CapabilityError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub tags: Vec<String>,
    pub summary: String,
    pub confidence: f64,
}

/// Shared by every capability trait so the `/health` route (§4.9, §6) can
/// probe each held trait object without downcasting to a concrete client.
#[async_trait]
pub trait CapabilityHealth: Send + Sync {
    async fn health_check(&self) -> bool;
}

/// Light and heavy reviewers share a shape (§4.4); they are distinct trait
/// objects so the cascade can hold one of each behind its own config/URL.
#[async_trait]
pub trait ReviewCapability: CapabilityHealth + Send + Sync {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewResponse, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefRequest {
    pub group_name: String,
    pub presenter_id: String,
    pub article_titles: Vec<String>,
    pub article_summaries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefResponse {
    pub brief: String,
}

#[async_trait]
pub trait WriterCapability: CapabilityHealth + Send + Sync {
    async fn brief(&self, request: &BriefRequest) -> Result<BriefResponse, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub group_name: String,
    pub presenter_ids: Vec<String>,
    pub briefs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptResponse {
    pub script: String,
}

#[async_trait]
pub trait ScriptCapability: CapabilityHealth + Send + Sync {
    async fn generate_script(&self, request: &ScriptRequest) -> Result<ScriptResponse, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRequest {
    pub script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResponse {
    pub edited_script: String,
}

#[async_trait]
pub trait EditorCapability: CapabilityHealth + Send + Sync {
    async fn edit(&self, request: &EditRequest) -> Result<EditResponse, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub script: String,
    pub group_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub title: String,
    pub description: String,
}

#[async_trait]
pub trait MetadataCapability: CapabilityHealth + Send + Sync {
    async fn generate_metadata(&self, request: &MetadataRequest) -> Result<MetadataResponse, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsRequest {
    pub script: String,
    pub presenter_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsResponse {
    pub audio_url: String,
    pub duration_seconds: f64,
    pub byte_size: u64,
}

#[async_trait]
pub trait TtsCapability: CapabilityHealth + Send + Sync {
    async fn synthesize(&self, request: &TtsRequest) -> Result<TtsResponse, CapabilityError>;
}

/// Which capability a given failure pertains to, for error/metric labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    LightReviewer,
    HeavyReviewer,
    Writer,
    Script,
    Editor,
    Metadata,
    Tts,
}

impl CapabilityKind {
    pub fn label(self) -> &'static str {
        match self {
            CapabilityKind::LightReviewer => "light_reviewer",
            CapabilityKind::HeavyReviewer => "heavy_reviewer",
            CapabilityKind::Writer => "writer",
            CapabilityKind::Script => "script",
            CapabilityKind::Editor => "editor",
            CapabilityKind::Metadata => "metadata",
            CapabilityKind::Tts => "tts",
        }
    }
}

/// A single capability reached over HTTP, posting a JSON request body and
/// decoding a JSON response body at a fixed path. Mirrors the teacher's
/// `LLMClient::execute_request` shape but generalized across capability kinds
/// instead of LLM providers.
pub struct HttpCapabilityClient {
    http: reqwest::Client,
    base_url: String,
    kind: CapabilityKind,
    timeout: Duration,
}

impl HttpCapabilityClient {
    pub fn new(base_url: impl Into<String>, kind: CapabilityKind, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            kind,
            timeout,
        }
    }

    /// Posts once, retrying exactly one time on a transient error (§4.7:
    /// "retried once on transport errors but not on semantic errors").
    async fn post_json<Req: Serialize + Sync, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, CapabilityError> {
        match self.post_json_once(path, request).await {
            Ok(resp) => Ok(resp),
            Err(e) if e.kind() == crate::error::ErrorKind::Transient => {
                tracing::warn!(capability = self.kind.label(), error = %e, "retrying after transient failure");
                self.post_json_once(path, request).await
            }
            Err(e) => Err(e),
        }
    }

    async fn post_json_once<Req: Serialize + Sync, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, CapabilityError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Timeout {
                        capability: self.kind.label().to_string(),
                        timeout: self.timeout,
                    }
                } else {
                    CapabilityError::Transport {
                        capability: self.kind.label().to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(CapabilityError::Transport {
                capability: self.kind.label().to_string(),
                reason: format!("status {}", response.status()),
            });
        }

        response.json::<Resp>().await.map_err(|e| CapabilityError::MalformedResponse {
            capability: self.kind.label().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Probes `{base_url}/health`; any non-2xx or transport failure counts as
/// unhealthy rather than erroring the `/health` route itself.
#[async_trait]
impl CapabilityHealth for HttpCapabilityClient {
    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        match self.http.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(capability = self.kind.label(), error = %e, "capability health probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl ReviewCapability for HttpCapabilityClient {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewResponse, CapabilityError> {
        self.post_json("/review", request).await
    }
}

#[async_trait]
impl WriterCapability for HttpCapabilityClient {
    async fn brief(&self, request: &BriefRequest) -> Result<BriefResponse, CapabilityError> {
        self.post_json("/brief", request).await
    }
}

#[async_trait]
impl ScriptCapability for HttpCapabilityClient {
    async fn generate_script(&self, request: &ScriptRequest) -> Result<ScriptResponse, CapabilityError> {
        self.post_json("/script", request).await
    }
}

#[async_trait]
impl EditorCapability for HttpCapabilityClient {
    async fn edit(&self, request: &EditRequest) -> Result<EditResponse, CapabilityError> {
        self.post_json("/edit", request).await
    }
}

#[async_trait]
impl MetadataCapability for HttpCapabilityClient {
    async fn generate_metadata(&self, request: &MetadataRequest) -> Result<MetadataResponse, CapabilityError> {
        self.post_json("/metadata", request).await
    }
}

#[async_trait]
impl TtsCapability for HttpCapabilityClient {
    async fn synthesize(&self, request: &TtsRequest) -> Result<TtsResponse, CapabilityError> {
        self.post_json("/tts", request).await
    }
}

/// The full set of capability clients an episode run depends on (§4.7).
///
/// `light_reviewer`/`heavy_reviewer` are `Arc` rather than `Box` because the
/// review cascade (C4) needs its own owned handle to each independent of the
/// rest of the set, which the episode pipeline (C7) never touches.
pub struct CapabilitySet {
    pub light_reviewer: Arc<dyn ReviewCapability>,
    pub heavy_reviewer: Arc<dyn ReviewCapability>,
    pub writer: Box<dyn WriterCapability>,
    pub script: Box<dyn ScriptCapability>,
    pub editor: Box<dyn EditorCapability>,
    pub metadata: Box<dyn MetadataCapability>,
    pub tts: Box<dyn TtsCapability>,
}

impl CapabilitySet {
    pub fn from_config(config: &crate::config::CapabilityConfig) -> Self {
        Self {
            light_reviewer: Arc::new(HttpCapabilityClient::new(
                &config.light_reviewer_url,
                CapabilityKind::LightReviewer,
                config.timeout,
            )),
            heavy_reviewer: Arc::new(HttpCapabilityClient::new(
                &config.heavy_reviewer_url,
                CapabilityKind::HeavyReviewer,
                config.timeout,
            )),
            writer: Box::new(HttpCapabilityClient::new(&config.writer_url, CapabilityKind::Writer, config.timeout)),
            script: Box::new(HttpCapabilityClient::new(&config.script_url, CapabilityKind::Script, config.timeout)),
            editor: Box::new(HttpCapabilityClient::new(&config.editor_url, CapabilityKind::Editor, config.timeout)),
            metadata: Box::new(HttpCapabilityClient::new(
                &config.metadata_url,
                CapabilityKind::Metadata,
                config.timeout,
            )),
            tts: Box::new(HttpCapabilityClient::new(&config.tts_url, CapabilityKind::Tts, config.timeout)),
        }
    }

    /// Builds a capability set from mock doubles, for tests and local dev
    /// runs without the seven external services available.
    pub fn mock() -> Self {
        Self {
            light_reviewer: Arc::new(mock::MockReviewer::new(0.9, vec!["general".to_string()])),
            heavy_reviewer: Arc::new(mock::MockReviewer::new(0.9, vec!["general".to_string()])),
            writer: Box::new(mock::MockWriter),
            script: Box::new(mock::MockScript::new()),
            editor: Box::new(mock::MockEditor),
            metadata: Box::new(mock::MockMetadata),
            tts: Box::new(mock::MockTts::new()),
        }
    }

    /// Probes every capability through `health`'s TTL cache, keyed by the
    /// same labels `CapabilityKind::label` uses for metrics (§4.9 `/health`).
    pub async fn probe_all(&self, health: &crate::metrics::HealthRegistry) -> std::collections::HashMap<String, bool> {
        let mut out = std::collections::HashMap::new();
        out.insert(
            CapabilityKind::LightReviewer.label().to_string(),
            health.probe_capability(CapabilityKind::LightReviewer.label(), || self.light_reviewer.health_check()).await
                == crate::metrics::HealthState::Healthy,
        );
        out.insert(
            CapabilityKind::HeavyReviewer.label().to_string(),
            health.probe_capability(CapabilityKind::HeavyReviewer.label(), || self.heavy_reviewer.health_check()).await
                == crate::metrics::HealthState::Healthy,
        );
        out.insert(
            CapabilityKind::Writer.label().to_string(),
            health.probe_capability(CapabilityKind::Writer.label(), || self.writer.health_check()).await == crate::metrics::HealthState::Healthy,
        );
        out.insert(
            CapabilityKind::Script.label().to_string(),
            health.probe_capability(CapabilityKind::Script.label(), || self.script.health_check()).await == crate::metrics::HealthState::Healthy,
        );
        out.insert(
            CapabilityKind::Editor.label().to_string(),
            health.probe_capability(CapabilityKind::Editor.label(), || self.editor.health_check()).await == crate::metrics::HealthState::Healthy,
        );
        out.insert(
            CapabilityKind::Metadata.label().to_string(),
            health.probe_capability(CapabilityKind::Metadata.label(), || self.metadata.health_check()).await
                == crate::metrics::HealthState::Healthy,
        );
        out.insert(
            CapabilityKind::Tts.label().to_string(),
            health.probe_capability(CapabilityKind::Tts.label(), || self.tts.health_check()).await == crate::metrics::HealthState::Healthy,
        );
        out
    }
}
