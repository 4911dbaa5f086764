//! Cadence Controller (C6, §4.6): 30s tick loop that enqueues episode
//! generation for every group whose cadence interval has elapsed, which has
//! a `Ready` collection, and which doesn't already hold a generation lease.
//! Grounded on `scheduler/mod.rs::start_scheduler_loop`'s periodic
//! `tokio::select!` tick and `heartbeat.rs`'s beat/assess/act framing.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::CadenceError;
use crate::lease::LeaseManager;
use crate::store::Store;
use crate::types::{CadenceBucket, Group, GroupId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityReason {
    Eligible,
    NoReadyCollection,
    CadenceNotElapsed,
    LeaseHeld,
    ManualBucketRequiresForce,
}

pub struct CadenceController {
    store: Arc<dyn Store>,
    lease: Arc<LeaseManager>,
}

impl CadenceController {
    pub fn new(store: Arc<dyn Store>, lease: Arc<LeaseManager>) -> Self {
        Self { store, lease }
    }

    /// Beat: evaluate every group's eligibility (§4.6). `force` bypasses the
    /// cadence-interval check (but never the lease check — a forced
    /// regeneration still respects an in-flight generation, §9 resolved
    /// open question) and always permits `Manual`-bucket groups.
    pub async fn assess(&self, group: &Group, now: chrono::DateTime<Utc>, force: bool) -> Result<EligibilityReason, CadenceError> {
        if self.lease.any_active_for(group.id) {
            return Ok(EligibilityReason::LeaseHeld);
        }

        let ready = self.store.get_ready_collection(group.id).await?;
        if ready.is_none() {
            return Ok(EligibilityReason::NoReadyCollection);
        }

        if force {
            return Ok(EligibilityReason::Eligible);
        }

        match group.cadence_bucket.interval() {
            None => Ok(EligibilityReason::ManualBucketRequiresForce),
            Some(interval) => match group.last_episode_at {
                None => Ok(EligibilityReason::Eligible),
                Some(last) if now - last >= interval => Ok(EligibilityReason::Eligible),
                Some(_) => Ok(EligibilityReason::CadenceNotElapsed),
            },
        }
    }

    /// Act: returns the ids of groups eligible for episode generation this
    /// tick. Idempotent — calling it again before any episode completes
    /// simply returns the same groups again, since none of their state has
    /// changed (enqueueing is the caller's job and is itself idempotent via
    /// lease acquisition).
    pub async fn eligible_groups(&self, force_group: Option<(GroupId, bool)>) -> Result<Vec<GroupId>, CadenceError> {
        let now = Utc::now();
        let groups = self.store.list_groups().await?;
        let mut eligible = Vec::new();

        for group in groups {
            let force = matches!(force_group, Some((id, true)) if id == group.id);
            if self.assess(&group, now, force).await? == EligibilityReason::Eligible {
                eligible.push(group.id);
            }
        }

        Ok(eligible)
    }
}

pub fn spawn_tick_loop(
    controller: Arc<CadenceController>,
    on_eligible: Arc<dyn Fn(GroupId) + Send + Sync>,
    interval: std::time::Duration,
    shutdown: Arc<tokio::sync::Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match controller.eligible_groups(None).await {
                        Ok(groups) => {
                            for group_id in groups {
                                info!(%group_id, "cadence tick: group eligible for generation");
                                on_eligible(group_id);
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "cadence tick failed to assess groups"),
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    })
}

/// Small extension so cadence assessment reads as "is this *group's* lease
/// active" without `LeaseManager` needing a cadence-specific method name.
trait LeaseManagerExt {
    fn any_active_for(&self, group_id: GroupId) -> bool;
}

impl LeaseManagerExt for LeaseManager {
    fn any_active_for(&self, group_id: GroupId) -> bool {
        matches!(self.status(group_id).holder, Some(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{FeedId, OwnerToken};
    use std::time::Duration;

    fn group(bucket: CadenceBucket, last_episode_at: Option<chrono::DateTime<Utc>>) -> Group {
        Group {
            id: GroupId::new(),
            name: "g".to_string(),
            presenter_ids: vec![],
            writer_id: "w".to_string(),
            feed_ids: vec![FeedId::new()],
            min_articles: 3,
            cadence_bucket: bucket,
            last_episode_at,
            tag_filter: vec![],
        }
    }

    async fn setup_ready(group: &Group) -> Arc<dyn Store> {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.upsert_group(group).await.unwrap();
        let collection = store.create_building_collection(group.id).await.unwrap();
        store.set_collection_status(collection.id, CollectionStatus::Ready).await.unwrap();
        store
    }

    use crate::types::CollectionStatus;

    #[tokio::test]
    async fn never_published_group_with_ready_collection_is_eligible() {
        let group = group(CadenceBucket::High, None);
        let store = setup_ready(&group).await;
        let controller = CadenceController::new(store, LeaseManager::new());
        let reason = controller.assess(&group, Utc::now(), false).await.unwrap();
        assert_eq!(reason, EligibilityReason::Eligible);
    }

    #[tokio::test]
    async fn interval_not_elapsed_is_ineligible() {
        let group = group(CadenceBucket::High, Some(Utc::now()));
        let store = setup_ready(&group).await;
        let controller = CadenceController::new(store, LeaseManager::new());
        let reason = controller.assess(&group, Utc::now(), false).await.unwrap();
        assert_eq!(reason, EligibilityReason::CadenceNotElapsed);
    }

    #[tokio::test]
    async fn manual_bucket_requires_force() {
        let group = group(CadenceBucket::Manual, None);
        let store = setup_ready(&group).await;
        let controller = CadenceController::new(store.clone(), LeaseManager::new());
        assert_eq!(
            controller.assess(&group, Utc::now(), false).await.unwrap(),
            EligibilityReason::ManualBucketRequiresForce
        );
        assert_eq!(controller.assess(&group, Utc::now(), true).await.unwrap(), EligibilityReason::Eligible);
    }

    #[tokio::test]
    async fn held_lease_blocks_eligibility_even_when_forced() {
        let group = group(CadenceBucket::High, Some(Utc::now() - chrono::Duration::hours(1)));
        let store = setup_ready(&group).await;
        let lease = LeaseManager::new();
        lease.acquire(group.id, &OwnerToken::new(), Duration::from_secs(60));
        let controller = CadenceController::new(store, lease);
        assert_eq!(controller.assess(&group, Utc::now(), true).await.unwrap(), EligibilityReason::LeaseHeld);
    }

    #[tokio::test]
    async fn no_ready_collection_is_ineligible() {
        let group = group(CadenceBucket::High, None);
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.upsert_group(&group).await.unwrap();
        let controller = CadenceController::new(store, LeaseManager::new());
        assert_eq!(
            controller.assess(&group, Utc::now(), false).await.unwrap(),
            EligibilityReason::NoReadyCollection
        );
    }
}
