//! Aggregated error model for the orchestrator (A2, §7).
//!
//! Every subsystem gets its own `thiserror`-derived enum; [`OrchestratorError`]
//! aggregates them via `#[from]`, mirroring the teacher's `RuntimeError`
//! composition. Each subsystem error classifies into one of the four §7 error
//! kinds through [`ErrorKind`] rather than by matching on message strings, so
//! callers (retry logic, the admin HTTP layer) never need to inspect `Display`
//! output to decide how to react.

use std::time::Duration;
use thiserror::Error;

use crate::types::{ArticleId, CollectionId, EpisodeId, GroupId};

/// The four error classes named in SPEC_FULL.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout, connection reset — retry with backoff at the call site.
    Transient,
    /// Malformed response, threshold unmet, missing input — do not retry.
    Semantic,
    /// Queue full, lease held — structured busy signal.
    Capacity,
    /// Persistence failure after retries, unhandled exception.
    Fatal,
}

#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("review error: {0}")]
    Review(#[from] ReviewError),

    #[error("collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("cadence error: {0}")]
    Cadence(#[from] CadenceError),

    #[error("episode error: {0}")]
    Episode(#[from] EpisodeError),

    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Intake(e) => e.kind(),
            OrchestratorError::Review(e) => e.kind(),
            OrchestratorError::Collection(e) => e.kind(),
            OrchestratorError::Cadence(e) => e.kind(),
            OrchestratorError::Episode(e) => e.kind(),
            OrchestratorError::Lease(e) => e.kind(),
            OrchestratorError::Capability(e) => e.kind(),
            OrchestratorError::Store(e) => e.kind(),
            OrchestratorError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// A stable, machine-readable code for the admin HTTP surface's
    /// `ErrorResponse.code` field (§6). Delegates to the subsystem's own
    /// code where one is defined (currently just [`EpisodeError`]) and
    /// otherwise falls back to the subsystem/kind pairing.
    pub fn reason_code(&self) -> &'static str {
        match self {
            OrchestratorError::Episode(e) => e.reason_code(),
            OrchestratorError::Intake(_) => "INTAKE_FAILED",
            OrchestratorError::Review(_) => "REVIEW_FAILED",
            OrchestratorError::Collection(_) => "COLLECTION_FAILED",
            OrchestratorError::Cadence(_) => "CADENCE_FAILED",
            OrchestratorError::Lease(_) => "LEASE_FAILED",
            OrchestratorError::Capability(_) => "CAPABILITY_FAILED",
            OrchestratorError::Store(_) => "STORE_FAILED",
            OrchestratorError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum IntakeError {
    #[error("failed to persist article after {attempts} attempts: {reason}")]
    PersistenceFailed { attempts: u32, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IntakeError::PersistenceFailed { .. } => ErrorKind::Fatal,
            IntakeError::Store(e) => e.kind(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ReviewError {
    #[error("light reviewer failed for article {article_id}: {reason}")]
    LightFailed { article_id: ArticleId, reason: String },

    #[error("heavy reviewer failed for article {article_id}: {reason}")]
    HeavyFailed { article_id: ArticleId, reason: String },

    #[error("article {article_id} not found")]
    ArticleNotFound { article_id: ArticleId },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ReviewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReviewError::LightFailed { .. } | ReviewError::HeavyFailed { .. } => ErrorKind::Transient,
            ReviewError::ArticleNotFound { .. } => ErrorKind::Semantic,
            ReviewError::Store(e) => e.kind(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum CollectionError {
    #[error("collection {collection_id} not found")]
    NotFound { collection_id: CollectionId },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CollectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectionError::NotFound { .. } => ErrorKind::Semantic,
            CollectionError::Store(e) => e.kind(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum CadenceError {
    #[error("group {group_id} not found")]
    GroupNotFound { group_id: GroupId },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CadenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CadenceError::GroupNotFound { .. } => ErrorKind::Semantic,
            CadenceError::Store(e) => e.kind(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum EpisodeError {
    #[error("lease held by another owner for group {group_id}")]
    LeaseHeld { group_id: GroupId },

    #[error("insufficient content for group {group_id}")]
    InsufficientContent { group_id: GroupId },

    #[error("script generation failed for episode {episode_id}: {reason}")]
    ScriptFailed { episode_id: EpisodeId, reason: String },

    #[error("audio synthesis failed for episode {episode_id}: {reason}")]
    AudioFailed { episode_id: EpisodeId, reason: String },

    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EpisodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EpisodeError::LeaseHeld { .. } => ErrorKind::Capacity,
            EpisodeError::InsufficientContent { .. } => ErrorKind::Semantic,
            EpisodeError::ScriptFailed { .. } | EpisodeError::AudioFailed { .. } => ErrorKind::Fatal,
            EpisodeError::Capability(e) => e.kind(),
            EpisodeError::Store(e) => e.kind(),
        }
    }

    /// The stable reason code recorded on `Episode.failure_reason` (§4.7, scenario 6).
    pub fn reason_code(&self) -> &'static str {
        match self {
            EpisodeError::LeaseHeld { .. } => "LEASE_HELD",
            EpisodeError::InsufficientContent { .. } => "INSUFFICIENT_CONTENT",
            EpisodeError::ScriptFailed { .. } => "SCRIPT_FAILED",
            EpisodeError::AudioFailed { .. } => "AUDIO_FAILED",
            EpisodeError::Capability(_) => "CAPABILITY_FAILED",
            EpisodeError::Store(_) => "STORE_FAILED",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum LeaseError {
    #[error("lease for group {group_id} held by another owner")]
    HeldByOther { group_id: GroupId },

    #[error("caller does not own the lease for group {group_id}")]
    NotOwner { group_id: GroupId },

    #[error("no lease held for group {group_id}")]
    Absent { group_id: GroupId },
}

impl LeaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LeaseError::HeldByOther { .. } => ErrorKind::Capacity,
            LeaseError::NotOwner { .. } | LeaseError::Absent { .. } => ErrorKind::Semantic,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum CapabilityError {
    #[error("request to {capability} timed out after {timeout:?}")]
    Timeout { capability: String, timeout: Duration },

    #[error("request to {capability} failed: {reason}")]
    Transport { capability: String, reason: String },

    #[error("malformed response from {capability}: {reason}")]
    MalformedResponse { capability: String, reason: String },
}

impl CapabilityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CapabilityError::Timeout { .. } | CapabilityError::Transport { .. } => ErrorKind::Transient,
            CapabilityError::MalformedResponse { .. } => ErrorKind::Semantic,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("row not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Sqlite(_) | StoreError::Serialization(_) => ErrorKind::Fatal,
            StoreError::NotFound(_) => ErrorKind::Semantic,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_error_reason_codes() {
        let e = EpisodeError::InsufficientContent { group_id: GroupId::new() };
        assert_eq!(e.reason_code(), "INSUFFICIENT_CONTENT");
        assert_eq!(e.kind(), ErrorKind::Semantic);
    }

    #[test]
    fn lease_held_is_capacity_kind() {
        let e = LeaseError::HeldByOther { group_id: GroupId::new() };
        assert_eq!(e.kind(), ErrorKind::Capacity);
    }

    #[test]
    fn store_not_found_propagates_semantic_kind_through_aggregate() {
        let store_err = StoreError::NotFound("article".to_string());
        let collection_err: CollectionError = store_err.into();
        let orchestrator_err: OrchestratorError = collection_err.into();
        assert_eq!(orchestrator_err.kind(), ErrorKind::Semantic);
    }
}
