//! Core entity and identifier types shared across the orchestrator (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

opaque_id!(FeedId);
opaque_id!(ArticleId);
opaque_id!(GroupId);
opaque_id!(CollectionId);
opaque_id!(CollectionSnapshotId);
opaque_id!(EpisodeId);
opaque_id!(AudioFileId);

/// A feed's transport format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedKind {
    Rss,
    Atom,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub source_url: String,
    pub kind: FeedKind,
    pub active: bool,
    pub last_polled_at: Option<DateTime<Utc>>,
}

/// Where an article stands in the review cascade (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReviewTier {
    #[default]
    None,
    Light,
    Heavy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub feed_id: FeedId,
    pub title: String,
    pub url: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub fingerprint: String,
    pub review_tier: ReviewTier,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub confidence: Option<f64>,
    pub collection_id: Option<CollectionId>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// How often a group is willing to publish (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CadenceBucket {
    High,
    Medium,
    Low,
    Manual,
}

impl CadenceBucket {
    /// Minimum interval between episodes for this bucket. `None` for `Manual`
    /// means the bucket never becomes cadence-eligible on its own; it only
    /// publishes via `force_regenerate`.
    pub fn interval(self) -> Option<chrono::Duration> {
        match self {
            CadenceBucket::High => Some(chrono::Duration::minutes(15)),
            CadenceBucket::Medium => Some(chrono::Duration::hours(1)),
            CadenceBucket::Low => Some(chrono::Duration::hours(6)),
            CadenceBucket::Manual => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub presenter_ids: Vec<String>,
    pub writer_id: String,
    pub feed_ids: Vec<FeedId>,
    pub min_articles: u32,
    pub cadence_bucket: CadenceBucket,
    pub last_episode_at: Option<DateTime<Utc>>,
    /// Any-of tag filter; empty means "no filter" (§9).
    pub tag_filter: Vec<String>,
}

impl Group {
    /// Whether an article with the given feed/tags is of interest to this group (§4.5).
    pub fn is_interested_in(&self, feed_id: FeedId, tags: &[String]) -> bool {
        if !self.feed_ids.contains(&feed_id) {
            return false;
        }
        if self.tag_filter.is_empty() {
            return true;
        }
        tags.iter().any(|t| self.tag_filter.contains(t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionStatus {
    Building,
    Ready,
    Consumed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub group_id: GroupId,
    pub status: CollectionStatus,
    pub item_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Immutable copy of a collection's article list, taken at generation start (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub id: CollectionSnapshotId,
    pub collection_id: CollectionId,
    pub group_id: GroupId,
    pub article_ids: Vec<ArticleId>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeStatus {
    Queued,
    Generating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub group_id: GroupId,
    pub collection_snapshot_id: CollectionSnapshotId,
    pub status: EpisodeStatus,
    pub script: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Mp3,
    Wav,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFile {
    pub id: AudioFileId,
    pub episode_id: EpisodeId,
    pub url: String,
    pub duration_seconds: f64,
    pub byte_size: u64,
    pub format: AudioFormat,
}

/// Owner token for a lease acquisition (§4.2) — opaque, compared by equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerToken(pub String);

impl OwnerToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_interest_empty_filter_matches_any_tags() {
        let feed = FeedId::new();
        let group = Group {
            id: GroupId::new(),
            name: "g".into(),
            presenter_ids: vec![],
            writer_id: "w".into(),
            feed_ids: vec![feed],
            min_articles: 3,
            cadence_bucket: CadenceBucket::Medium,
            last_episode_at: None,
            tag_filter: vec![],
        };
        assert!(group.is_interested_in(feed, &["anything".to_string()]));
        assert!(group.is_interested_in(feed, &[]));
    }

    #[test]
    fn group_interest_requires_feed_membership() {
        let feed = FeedId::new();
        let other_feed = FeedId::new();
        let group = Group {
            id: GroupId::new(),
            name: "g".into(),
            presenter_ids: vec![],
            writer_id: "w".into(),
            feed_ids: vec![feed],
            min_articles: 3,
            cadence_bucket: CadenceBucket::Medium,
            last_episode_at: None,
            tag_filter: vec![],
        };
        assert!(!group.is_interested_in(other_feed, &["x".to_string()]));
    }

    #[test]
    fn group_interest_any_of_tag_filter() {
        let feed = FeedId::new();
        let group = Group {
            id: GroupId::new(),
            name: "g".into(),
            presenter_ids: vec![],
            writer_id: "w".into(),
            feed_ids: vec![feed],
            min_articles: 3,
            cadence_bucket: CadenceBucket::Medium,
            last_episode_at: None,
            tag_filter: vec!["tech".to_string(), "finance".to_string()],
        };
        assert!(group.is_interested_in(feed, &["sports".to_string(), "tech".to_string()]));
        assert!(!group.is_interested_in(feed, &["sports".to_string()]));
    }

    #[test]
    fn cadence_bucket_intervals() {
        assert_eq!(CadenceBucket::High.interval(), Some(chrono::Duration::minutes(15)));
        assert_eq!(CadenceBucket::Manual.interval(), None);
    }
}
