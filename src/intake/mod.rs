//! Article Intake (C3, §4.3): fingerprint, dedup, persist, enqueue for
//! review — with exponential-backoff retry on persistence failure, grounded
//! on `scheduler/job_store.rs`'s retry style and `types/error.rs`'s
//! `RecoveryStrategy::Retry` shape.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, warn};

use crate::error::IntakeError;
use crate::fingerprint::{FingerprintStore, SeenResult};
use crate::queue::ReviewQueue;
use crate::store::Store;
use crate::types::{Article, ArticleId, FeedId, ReviewTier};

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: u32 = 2;
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    Enqueued,
    Duplicate,
}

/// Raw article fields as received from a feed poller, prior to assignment of
/// an `ArticleId` or fingerprint (§4.3).
pub struct IncomingArticle {
    pub feed_id: FeedId,
    pub title: String,
    pub url: String,
    pub content: String,
    pub published_at: chrono::DateTime<Utc>,
}

pub struct ArticleIntake {
    fingerprints: Arc<FingerprintStore>,
    store: Arc<dyn Store>,
    queue: Arc<ReviewQueue>,
}

impl ArticleIntake {
    pub fn new(fingerprints: Arc<FingerprintStore>, store: Arc<dyn Store>, queue: Arc<ReviewQueue>) -> Self {
        Self { fingerprints, store, queue }
    }

    /// Dedups by content fingerprint, persists the article, and enqueues it
    /// for review. Persistence is retried with exponential backoff
    /// (1s, 2s, 4s, ... capped at 60s, 5 attempts) before giving up fatally
    /// (§4.3 edge case: store unavailable).
    pub async fn ingest(&self, incoming: IncomingArticle) -> Result<IntakeOutcome, IntakeError> {
        let fingerprint = FingerprintStore::fingerprint(&incoming.title, &incoming.url, &incoming.content);

        if self.fingerprints.seen_or_insert(&fingerprint) == SeenResult::Duplicate {
            return Ok(IntakeOutcome::Duplicate);
        }

        let article = Article {
            id: ArticleId::new(),
            feed_id: incoming.feed_id,
            title: incoming.title,
            url: incoming.url,
            content: incoming.content,
            published_at: incoming.published_at,
            fingerprint,
            review_tier: ReviewTier::None,
            tags: vec![],
            summary: None,
            confidence: None,
            collection_id: None,
            processed_at: None,
        };

        self.persist_with_retry(&article).await?;
        self.queue.enqueue(article.id).await;
        Ok(IntakeOutcome::Enqueued)
    }

    async fn persist_with_retry(&self, article: &Article) -> Result<(), IntakeError> {
        let mut backoff = BASE_BACKOFF;
        let mut last_reason = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.store.insert_article(article).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_reason = e.to_string();
                    warn!(article_id = %article.id, attempt, error = %last_reason, "article persistence failed");
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * BACKOFF_FACTOR).min(MAX_BACKOFF);
                    }
                }
            }
        }

        error!(article_id = %article.id, "article persistence exhausted retries");
        Err(IntakeError::PersistenceFailed {
            attempts: MAX_ATTEMPTS,
            reason: last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Feed, FeedKind};

    async fn setup() -> (ArticleIntake, Arc<dyn Store>, FeedId) {
        let fingerprints = FingerprintStore::new(Duration::from_secs(3600), true);
        let store: Arc<dyn Store> = Arc::new(crate::store::SqliteStore::open_in_memory().unwrap());
        let queue = Arc::new(ReviewQueue::new(100));
        let feed_id = FeedId::new();
        store
            .upsert_feed(&Feed {
                id: feed_id,
                source_url: "https://feed.example.com".to_string(),
                kind: FeedKind::Rss,
                active: true,
                last_polled_at: None,
            })
            .await
            .unwrap();
        (ArticleIntake::new(fingerprints, store.clone(), queue), store, feed_id)
    }

    fn incoming(feed_id: FeedId, seed: &str) -> IncomingArticle {
        IncomingArticle {
            feed_id,
            title: format!("Headline {seed}"),
            url: format!("https://example.com/{seed}"),
            content: format!("Body {seed}"),
            published_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fresh_article_is_persisted_and_enqueued() {
        let (intake, store, feed_id) = setup().await;
        let outcome = intake.ingest(incoming(feed_id, "a")).await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Enqueued);
        assert_eq!(store.list_feeds().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_is_suppressed_without_store_write() {
        let (intake, _store, feed_id) = setup().await;
        let first = incoming(feed_id, "dup");
        let second = incoming(feed_id, "dup");
        assert_eq!(intake.ingest(first).await.unwrap(), IntakeOutcome::Enqueued);
        assert_eq!(intake.ingest(second).await.unwrap(), IntakeOutcome::Duplicate);
    }
}
