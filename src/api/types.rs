//! Request/response DTOs for the admin HTTP surface (§6).
//!
//! Plain `serde` structs — no OpenAPI schema derive, since nothing in
//! SPEC_FULL.md calls for a generated Swagger document.

#[cfg(feature = "http-api")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "http-api")]
use crate::cadence::EligibilityReason;
#[cfg(feature = "http-api")]
use crate::types::{EpisodeId, GroupId};

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateEpisodeRequest {
    pub group_id: GroupId,
    #[serde(default)]
    pub force: bool,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateEpisodeResponse {
    pub episode_id: EpisodeId,
    pub status: String,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCadenceStatus {
    pub group_id: GroupId,
    pub group_name: String,
    pub eligible: bool,
    pub reason: EligibilityReasonDto,
    pub last_episode_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Wire form of [`EligibilityReason`] — a plain `serde` mirror since the
/// internal enum carries no serde derive of its own.
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReasonDto {
    Eligible,
    NoReadyCollection,
    CadenceNotElapsed,
    LeaseHeld,
    ManualBucketRequiresForce,
}

#[cfg(feature = "http-api")]
impl From<EligibilityReason> for EligibilityReasonDto {
    fn from(reason: EligibilityReason) -> Self {
        match reason {
            EligibilityReason::Eligible => EligibilityReasonDto::Eligible,
            EligibilityReason::NoReadyCollection => EligibilityReasonDto::NoReadyCollection,
            EligibilityReason::CadenceNotElapsed => EligibilityReasonDto::CadenceNotElapsed,
            EligibilityReason::LeaseHeld => EligibilityReasonDto::LeaseHeld,
            EligibilityReason::ManualBucketRequiresForce => EligibilityReasonDto::ManualBucketRequiresForce,
        }
    }
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceStatusResponse {
    pub groups: Vec<GroupCadenceStatus>,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerConfigResponse {
    pub light_conf_threshold: f64,
    pub heavy_conf_threshold: f64,
    pub pause_backoff_secs: u64,
}

/// All fields optional: `PUT /reviewer/config` only overwrites what's present.
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateReviewerConfigRequest {
    pub light_conf_threshold: Option<f64>,
    pub heavy_conf_threshold: Option<f64>,
    pub pause_backoff_secs: Option<u64>,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionActionResponse {
    pub paused: bool,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionStatusResponse {
    pub any_lease_active: bool,
    pub active_lease_count: usize,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusResponse {
    pub depth: i64,
    pub dead_letter_count: u64,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: OverallHealth,
    pub store: bool,
    pub capabilities: std::collections::HashMap<String, bool>,
}
