//! Review Cascade (C4, §4.4): light review with heavy-reviewer escalation on
//! low confidence, grounded on `routing/engine.rs::execute_slm_route`'s
//! confidence-threshold escalation and `routing/confidence.rs`'s
//! `ConfidenceEvaluation` shape.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::capability::{ReviewCapability, ReviewRequest};
use crate::config::ReviewConfig;
use crate::error::ReviewError;
use crate::metrics::MetricsRegistry;
use crate::store::Store;
use crate::types::{Article, ReviewTier};

/// Tags applied when both tiers fail to produce a usable verdict (§4.4 edge case).
pub const FALLBACK_TAGS: &[&str] = &["news", "general"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    AcceptedLight,
    AcceptedHeavy,
    FailedFallback,
}

pub struct ReviewCascade {
    light: Arc<dyn ReviewCapability>,
    heavy: Arc<dyn ReviewCapability>,
    store: Arc<dyn Store>,
    config: Arc<parking_lot::RwLock<ReviewConfig>>,
    metrics: Arc<MetricsRegistry>,
}

impl ReviewCascade {
    pub fn new(
        light: Arc<dyn ReviewCapability>,
        heavy: Arc<dyn ReviewCapability>,
        store: Arc<dyn Store>,
        config: Arc<parking_lot::RwLock<ReviewConfig>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self { light, heavy, store, config, metrics }
    }

    /// Runs the light→heavy cascade for one article and persists the result
    /// (§4.4: θ_light=0.75 inclusive, θ_heavy=0.5 inclusive, ties favor the
    /// cheaper tier). Light-reviewer transport failure skips straight to
    /// heavy; heavy failure after that falls back to confidence 0 with
    /// [`FALLBACK_TAGS`] rather than erroring the whole pipeline.
    pub async fn review(&self, article: &Article) -> Result<ReviewOutcome, ReviewError> {
        let request = ReviewRequest {
            title: article.title.clone(),
            content: article.content.clone(),
        };

        let light_started = Instant::now();
        let light_result = self.light.review(&request).await;
        self.metrics.light_review_latency.observe(light_started.elapsed());
        let config = self.config.read().clone();

        let (outcome, tier, tags, summary, confidence) = match light_result {
            Ok(light) if light.confidence >= config.light_conf_threshold => {
                info!(article_id = %article.id, confidence = light.confidence, "accepted at light tier");
                (ReviewOutcome::AcceptedLight, ReviewTier::Light, light.tags, light.summary, light.confidence)
            }
            Ok(light) => {
                info!(article_id = %article.id, confidence = light.confidence, "escalating to heavy tier");
                self.run_heavy(article, &request, Some(light.summary), config.heavy_conf_threshold).await
            }
            Err(reason) => {
                warn!(article_id = %article.id, %reason, "light reviewer failed, escalating to heavy tier");
                self.run_heavy(article, &request, None, config.heavy_conf_threshold).await
            }
        };

        match outcome {
            ReviewOutcome::AcceptedLight => {
                self.metrics.reviews_light.fetch_add(1, Ordering::Relaxed);
            }
            ReviewOutcome::AcceptedHeavy => {
                self.metrics.reviews_heavy.fetch_add(1, Ordering::Relaxed);
            }
            ReviewOutcome::FailedFallback => {
                self.metrics.reviews_failed_fallback.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.store
            .update_article_review(article.id, tier, &tags, &summary, confidence, Utc::now())
            .await?;

        Ok(outcome)
    }

    async fn run_heavy(
        &self,
        article: &Article,
        request: &ReviewRequest,
        light_summary: Option<String>,
        heavy_conf_threshold: f64,
    ) -> (ReviewOutcome, ReviewTier, Vec<String>, String, f64) {
        let heavy_started = Instant::now();
        let heavy_result = self.heavy.review(request).await;
        self.metrics.heavy_review_latency.observe(heavy_started.elapsed());

        match heavy_result {
            Ok(heavy) if heavy.confidence >= heavy_conf_threshold => (
                ReviewOutcome::AcceptedHeavy,
                ReviewTier::Heavy,
                heavy.tags,
                heavy.summary,
                heavy.confidence,
            ),
            Ok(heavy) => {
                warn!(article_id = %article.id, confidence = heavy.confidence, "heavy tier below threshold, falling back");
                (
                    ReviewOutcome::FailedFallback,
                    ReviewTier::Heavy,
                    FALLBACK_TAGS.iter().map(|s| s.to_string()).collect(),
                    light_summary.unwrap_or_default(),
                    0.0,
                )
            }
            Err(reason) => {
                warn!(article_id = %article.id, %reason, "heavy reviewer failed, falling back");
                (
                    ReviewOutcome::FailedFallback,
                    ReviewTier::Heavy,
                    FALLBACK_TAGS.iter().map(|s| s.to_string()).collect(),
                    light_summary.unwrap_or_default(),
                    0.0,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mock::MockReviewer;
    use crate::store::SqliteStore;
    use crate::types::{ArticleId, FeedId, FeedKind};

    fn article() -> Article {
        Article {
            id: ArticleId::new(),
            feed_id: FeedId::new(),
            title: "Headline".to_string(),
            url: "https://example.com/a".to_string(),
            content: "Body text".to_string(),
            published_at: Utc::now(),
            fingerprint: "fp".to_string(),
            review_tier: ReviewTier::None,
            tags: vec![],
            summary: None,
            confidence: None,
            collection_id: None,
            processed_at: None,
        }
    }

    async fn setup_store_with(article: &Article) -> Arc<dyn Store> {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .upsert_feed(&crate::types::Feed {
                id: article.feed_id,
                source_url: "https://feed.example.com".to_string(),
                kind: FeedKind::Rss,
                active: true,
                last_polled_at: None,
            })
            .await
            .unwrap();
        store.insert_article(article).await.unwrap();
        store
    }

    #[tokio::test]
    async fn high_confidence_light_review_skips_heavy_tier() {
        let article = article();
        let store = setup_store_with(&article).await;
        let light = Arc::new(MockReviewer::new(0.9, vec!["tech".to_string()]));
        let heavy = Arc::new(MockReviewer::new(0.9, vec!["tech".to_string()]));
        heavy.set_fail(true);

        let cascade = ReviewCascade::new(light, heavy, store.clone(), Arc::new(parking_lot::RwLock::new(ReviewConfig::default())), Arc::new(MetricsRegistry::new()));
        let outcome = cascade.review(&article).await.unwrap();
        assert_eq!(outcome, ReviewOutcome::AcceptedLight);

        let loaded = store.get_article(article.id).await.unwrap().unwrap();
        assert_eq!(loaded.review_tier, ReviewTier::Light);
    }

    #[tokio::test]
    async fn boundary_confidence_is_accepted_at_light_tier() {
        let article = article();
        let store = setup_store_with(&article).await;
        let light = Arc::new(MockReviewer::new(0.75, vec!["tech".to_string()]));
        let heavy = Arc::new(MockReviewer::new(0.9, vec!["tech".to_string()]));

        let cascade = ReviewCascade::new(light, heavy, store, Arc::new(parking_lot::RwLock::new(ReviewConfig::default())), Arc::new(MetricsRegistry::new()));
        let outcome = cascade.review(&article).await.unwrap();
        assert_eq!(outcome, ReviewOutcome::AcceptedLight);
    }

    #[tokio::test]
    async fn low_confidence_escalates_and_accepts_heavy() {
        let article = article();
        let store = setup_store_with(&article).await;
        let light = Arc::new(MockReviewer::new(0.3, vec!["tech".to_string()]));
        let heavy = Arc::new(MockReviewer::new(0.6, vec!["tech".to_string(), "ai".to_string()]));

        let cascade = ReviewCascade::new(light, heavy, store.clone(), Arc::new(parking_lot::RwLock::new(ReviewConfig::default())), Arc::new(MetricsRegistry::new()));
        let outcome = cascade.review(&article).await.unwrap();
        assert_eq!(outcome, ReviewOutcome::AcceptedHeavy);

        let loaded = store.get_article(article.id).await.unwrap().unwrap();
        assert_eq!(loaded.review_tier, ReviewTier::Heavy);
        assert_eq!(loaded.tags.len(), 2);
    }

    #[tokio::test]
    async fn both_tiers_failing_falls_back_to_fallback_tags() {
        let article = article();
        let store = setup_store_with(&article).await;
        let light = Arc::new(MockReviewer::new(0.1, vec![]));
        let heavy = Arc::new(MockReviewer::new(0.1, vec![]));
        heavy.set_fail(true);

        let cascade = ReviewCascade::new(light, heavy, store.clone(), Arc::new(parking_lot::RwLock::new(ReviewConfig::default())), Arc::new(MetricsRegistry::new()));
        let outcome = cascade.review(&article).await.unwrap();
        assert_eq!(outcome, ReviewOutcome::FailedFallback);

        let loaded = store.get_article(article.id).await.unwrap().unwrap();
        assert_eq!(loaded.confidence, Some(0.0));
        assert_eq!(loaded.tags, vec!["news".to_string(), "general".to_string()]);
    }

    #[tokio::test]
    async fn light_transport_failure_skips_straight_to_heavy() {
        let article = article();
        let store = setup_store_with(&article).await;
        let light = Arc::new(MockReviewer::new(0.9, vec![]));
        light.set_fail(true);
        let heavy = Arc::new(MockReviewer::new(0.8, vec!["finance".to_string()]));

        let cascade = ReviewCascade::new(light, heavy, store.clone(), Arc::new(parking_lot::RwLock::new(ReviewConfig::default())), Arc::new(MetricsRegistry::new()));
        let outcome = cascade.review(&article).await.unwrap();
        assert_eq!(outcome, ReviewOutcome::AcceptedHeavy);
    }
}
