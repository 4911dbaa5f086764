//! Collection Builder (C5, §4.5): routes reviewed articles into per-group
//! collections and promotes them to `Ready` once they reach `min_articles`.
//! Grounded on `scheduler/job_store.rs::update_run_state`'s store-row
//! transition style.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::CollectionError;
use crate::store::Store;
use crate::types::{Article, CollectionStatus, Group};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// Article matched no interested group; nothing was built.
    NoInterestedGroup,
    /// Added to an in-progress collection, still `Building`.
    AddedToBuilding,
    /// Added to an in-progress collection that just crossed `min_articles`
    /// and was promoted to `Ready`.
    PromotedToReady,
}

pub struct CollectionBuilder {
    store: Arc<dyn Store>,
}

impl CollectionBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Routes a single reviewed article into every interested group's
    /// building collection (§4.5: an article can belong to more than one
    /// group's collection since interest is per-group, not exclusive).
    pub async fn route_article(&self, article: &Article) -> Result<Vec<RoutingOutcome>, CollectionError> {
        let groups = self.store.list_groups().await?;
        let mut outcomes = Vec::new();

        for group in groups {
            if !group.is_interested_in(article.feed_id, &article.tags) {
                continue;
            }
            outcomes.push(self.add_to_group_collection(&group, article).await?);
        }

        if outcomes.is_empty() {
            outcomes.push(RoutingOutcome::NoInterestedGroup);
        }
        Ok(outcomes)
    }

    /// At most one `Building` and one `Ready` collection may exist per group
    /// (§4.5 invariant); a `Ready` collection already present means a new
    /// `Building` one is still created to receive further articles while the
    /// `Ready` one awaits consumption by episode generation.
    async fn add_to_group_collection(&self, group: &Group, article: &Article) -> Result<RoutingOutcome, CollectionError> {
        let collection = match self.store.get_building_collection(group.id).await? {
            Some(c) => c,
            None => self.store.create_building_collection(group.id).await?,
        };

        self.store.update_article_collection(article.id, collection.id).await?;
        let updated = self.store.increment_collection_item_count(collection.id).await?;

        if updated.item_count >= group.min_articles && self.store.get_ready_collection(group.id).await?.is_none() {
            self.store.set_collection_status(collection.id, CollectionStatus::Ready).await?;
            info!(group_id = %group.id, collection_id = %collection.id, item_count = updated.item_count, "collection promoted to ready");
            Ok(RoutingOutcome::PromotedToReady)
        } else {
            Ok(RoutingOutcome::AddedToBuilding)
        }
    }

    /// Sweeps collections past their expiry (§4.5 edge case: a `Building` or
    /// `Ready` collection that sits too long without generating an episode is
    /// expired rather than publishing stale content).
    pub async fn expire_stale(&self, older_than: chrono::DateTime<chrono::Utc>) -> Result<usize, CollectionError> {
        Ok(self.store.expire_stale_building_collections(older_than).await?)
    }
}

/// Periodic sweep calling [`CollectionBuilder::expire_stale`] (§4.5, §3
/// Collection status). Grounded on the same `tokio::select!`
/// tick-or-shutdown shape as `lease::spawn_reaper_loop`/`episode::spawn_reaper_loop`.
pub fn spawn_expiry_loop(
    builder: Arc<CollectionBuilder>,
    tick: Duration,
    max_age: Duration,
    shutdown: Arc<tokio::sync::Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = chrono::Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
                    match builder.expire_stale(cutoff).await {
                        Ok(n) if n > 0 => info!(count = n, "expired stale collections"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "collection expiry sweep failed"),
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{ArticleId, CadenceBucket, FeedId, FeedKind, Group, GroupId, ReviewTier};
    use chrono::Utc;

    fn article(feed_id: FeedId, tags: Vec<String>) -> Article {
        Article {
            id: ArticleId::new(),
            feed_id,
            title: "t".to_string(),
            url: "https://e".to_string(),
            content: "c".to_string(),
            published_at: Utc::now(),
            fingerprint: "fp".to_string(),
            review_tier: ReviewTier::Light,
            tags,
            summary: Some("s".to_string()),
            confidence: Some(0.9),
            collection_id: None,
            processed_at: Some(Utc::now()),
        }
    }

    async fn setup(min_articles: u32, tag_filter: Vec<String>) -> (CollectionBuilder, Arc<dyn Store>, FeedId, GroupId) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let feed_id = FeedId::new();
        let group = Group {
            id: GroupId::new(),
            name: "g".to_string(),
            presenter_ids: vec![],
            writer_id: "w".to_string(),
            feed_ids: vec![feed_id],
            min_articles,
            cadence_bucket: CadenceBucket::High,
            last_episode_at: None,
            tag_filter,
        };
        store
            .upsert_feed(&crate::types::Feed { id: feed_id, source_url: "https://f".to_string(), kind: FeedKind::Rss, active: true, last_polled_at: None })
            .await
            .unwrap();
        store.upsert_group(&group).await.unwrap();
        (CollectionBuilder::new(store.clone()), store, feed_id, group.id)
    }

    #[tokio::test]
    async fn article_outside_tag_filter_matches_no_group() {
        let (builder, _store, feed_id, _group_id) = setup(3, vec!["finance".to_string()]).await;
        let a = article(feed_id, vec!["sports".to_string()]);
        let outcomes = builder.route_article(&a).await.unwrap();
        assert_eq!(outcomes, vec![RoutingOutcome::NoInterestedGroup]);
    }

    #[tokio::test]
    async fn crossing_min_articles_promotes_to_ready() {
        let (builder, store, feed_id, group_id) = setup(2, vec![]).await;

        let a1 = article(feed_id, vec!["tech".to_string()]);
        let outcome1 = builder.route_article(&a1).await.unwrap();
        assert_eq!(outcome1, vec![RoutingOutcome::AddedToBuilding]);
        assert!(store.get_ready_collection(group_id).await.unwrap().is_none());

        let a2 = article(feed_id, vec!["tech".to_string()]);
        let outcome2 = builder.route_article(&a2).await.unwrap();
        assert_eq!(outcome2, vec![RoutingOutcome::PromotedToReady]);
        assert!(store.get_ready_collection(group_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn at_most_one_building_collection_per_group() {
        let (builder, store, feed_id, group_id) = setup(5, vec![]).await;
        let a1 = article(feed_id, vec![]);
        builder.route_article(&a1).await.unwrap();
        let first = store.get_building_collection(group_id).await.unwrap().unwrap();

        let a2 = article(feed_id, vec![]);
        builder.route_article(&a2).await.unwrap();
        let second = store.get_building_collection(group_id).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.item_count, 2);
    }

    /// §4.5 step 4: while a READY collection already exists, further articles
    /// accumulate in a new BUILDING collection rather than promoting a second
    /// one to READY, even once it also reaches `min_articles`.
    #[tokio::test]
    async fn second_collection_stays_building_while_first_is_ready() {
        let (builder, store, feed_id, group_id) = setup(1, vec![]).await;

        let a1 = article(feed_id, vec![]);
        assert_eq!(builder.route_article(&a1).await.unwrap(), vec![RoutingOutcome::PromotedToReady]);
        let ready = store.get_ready_collection(group_id).await.unwrap().unwrap();

        let a2 = article(feed_id, vec![]);
        assert_eq!(builder.route_article(&a2).await.unwrap(), vec![RoutingOutcome::AddedToBuilding]);

        let still_ready = store.get_ready_collection(group_id).await.unwrap().unwrap();
        assert_eq!(still_ready.id, ready.id);
        let building = store.get_building_collection(group_id).await.unwrap().unwrap();
        assert_ne!(building.id, ready.id);
    }
}
