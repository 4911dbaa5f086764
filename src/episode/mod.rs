//! Episode Orchestrator (C7, §4.7): the lease-guarded sequential pipeline
//! that turns a `Ready` collection into a published episode. Grounded on
//! `routing/engine.rs`'s sequential multi-capability call chain and
//! `scheduler/job_store.rs`'s state-column update pattern.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::capability::{
    BriefRequest, CapabilitySet, EditRequest, MetadataRequest, ScriptRequest, TtsRequest,
};
use crate::error::EpisodeError;
use crate::lease::{AcquireResult, LeaseManager};
use crate::store::Store;
use crate::types::{
    AudioFile, CollectionSnapshot, CollectionSnapshotId, CollectionStatus, Episode, EpisodeId,
    EpisodeStatus, GroupId, OwnerToken,
};

pub struct EpisodeOrchestrator {
    store: Arc<dyn Store>,
    lease: Arc<LeaseManager>,
    capabilities: Arc<CapabilitySet>,
    lease_ttl: Duration,
}

impl EpisodeOrchestrator {
    pub fn new(store: Arc<dyn Store>, lease: Arc<LeaseManager>, capabilities: Arc<CapabilitySet>, lease_ttl: Duration) -> Self {
        Self { store, lease, capabilities, lease_ttl }
    }

    /// Runs the full 13-step pipeline for `group_id` (§4.7):
    /// acquire lease → validate `Ready` collection → snapshot + consume →
    /// create episode → brief(s) [non-fatal] → script [fatal] →
    /// edit [non-fatal] → metadata → TTS [fatal] → persist audio → complete
    /// → bump `last_episode_at` → release lease. A `Failed` episode leaves
    /// its collection `Consumed`, not reverted to `Ready` (§9 resolved open
    /// question) — regeneration requires a fresh collection or
    /// `force_regenerate` against the next cadence-eligible one.
    pub async fn generate(&self, group_id: GroupId, owner: &OwnerToken) -> Result<EpisodeId, EpisodeError> {
        if self.lease.acquire(group_id, owner, self.lease_ttl) != AcquireResult::Acquired {
            return Err(EpisodeError::LeaseHeld { group_id });
        }

        let result = self.run_pipeline(group_id).await;
        let _ = self.lease.checked_release(group_id, owner);
        result
    }

    async fn run_pipeline(&self, group_id: GroupId) -> Result<EpisodeId, EpisodeError> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or(EpisodeError::InsufficientContent { group_id })?;

        let collection = self
            .store
            .get_ready_collection(group_id)
            .await?
            .ok_or(EpisodeError::InsufficientContent { group_id })?;

        let article_ids = self.store.list_article_ids_for_collection(collection.id).await?;
        if article_ids.is_empty() {
            return Err(EpisodeError::InsufficientContent { group_id });
        }

        let snapshot = CollectionSnapshot {
            id: CollectionSnapshotId::new(),
            collection_id: collection.id,
            group_id,
            article_ids: article_ids.clone(),
            taken_at: Utc::now(),
        };
        self.store.insert_snapshot(&snapshot).await?;
        self.store.set_collection_status(collection.id, CollectionStatus::Consumed).await?;

        let episode = Episode {
            id: EpisodeId::new(),
            group_id,
            collection_snapshot_id: snapshot.id,
            status: EpisodeStatus::Generating,
            script: None,
            title: None,
            description: None,
            duration_seconds: None,
            created_at: Utc::now(),
            failure_reason: None,
        };
        self.store.insert_episode(&episode).await?;

        let mut articles = Vec::with_capacity(article_ids.len());
        for article_id in &article_ids {
            if let Some(article) = self.store.get_article(*article_id).await? {
                articles.push(article);
            }
        }

        let mut briefs = Vec::with_capacity(group.presenter_ids.len());
        for presenter_id in &group.presenter_ids {
            briefs.push(self.build_brief(&group.name, presenter_id, &articles).await);
        }

        let script = match self
            .capabilities
            .script
            .generate_script(&ScriptRequest {
                group_name: group.name.clone(),
                presenter_ids: group.presenter_ids.clone(),
                briefs,
            })
            .await
        {
            Ok(r) => r.script,
            Err(e) => return self.fail(episode.id, EpisodeError::ScriptFailed { episode_id: episode.id, reason: e.to_string() }).await,
        };
        self.store.update_episode_script(episode.id, &script).await?;

        let edited_script = match self.capabilities.editor.edit(&EditRequest { script: script.clone() }).await {
            Ok(r) => r.edited_script,
            Err(e) => {
                warn!(episode_id = %episode.id, error = %e, "editor pass failed, publishing unedited script");
                script
            }
        };

        let metadata = self
            .capabilities
            .metadata
            .generate_metadata(&MetadataRequest { script: edited_script.clone(), group_name: group.name.clone() })
            .await;
        let (title, description) = match metadata {
            Ok(m) => (m.title, m.description),
            Err(e) => {
                warn!(episode_id = %episode.id, error = %e, "metadata generation failed, using fallback");
                (format!("{} episode", group.name), edited_script.chars().take(160).collect())
            }
        };
        self.store.update_episode_metadata(episode.id, &title, &description, 0.0).await?;

        let audio = match self
            .capabilities
            .tts
            .synthesize(&TtsRequest { script: edited_script.clone(), presenter_ids: group.presenter_ids.clone() })
            .await
        {
            Ok(r) => r,
            Err(e) => return self.fail(episode.id, EpisodeError::AudioFailed { episode_id: episode.id, reason: e.to_string() }).await,
        };

        self.store
            .update_episode_metadata(episode.id, &title, &description, audio.duration_seconds)
            .await?;
        self.store
            .insert_audio_file(&AudioFile {
                id: crate::types::AudioFileId::new(),
                episode_id: episode.id,
                url: audio.audio_url,
                duration_seconds: audio.duration_seconds,
                byte_size: audio.byte_size,
                format: crate::types::AudioFormat::Mp3,
            })
            .await?;

        self.store.update_episode_status(episode.id, EpisodeStatus::Completed, None).await?;
        self.store.update_group_last_episode_at(group_id, Utc::now()).await?;

        info!(episode_id = %episode.id, group_id = %group_id, "episode generation completed");
        Ok(episode.id)
    }

    /// Brief generation is non-fatal (§4.7): if the writer capability fails
    /// for a given presenter, fall back to a synthesized brief built from
    /// article summaries so the pipeline can still proceed to scripting.
    async fn build_brief(&self, group_name: &str, presenter_id: &str, articles: &[crate::types::Article]) -> String {
        let titles: Vec<String> = articles.iter().map(|a| a.title.clone()).collect();
        let summaries: Vec<String> = articles
            .iter()
            .map(|a| a.summary.clone().unwrap_or_default())
            .collect();

        match self
            .capabilities
            .writer
            .brief(&BriefRequest {
                group_name: group_name.to_string(),
                presenter_id: presenter_id.to_string(),
                article_titles: titles.clone(),
                article_summaries: summaries.clone(),
            })
            .await
        {
            Ok(r) => r.brief,
            Err(e) => {
                warn!(group = group_name, presenter_id, error = %e, "writer brief failed, falling back to concatenated summaries");
                summaries.join(" ")
            }
        }
    }

    async fn fail(&self, episode_id: EpisodeId, error: EpisodeError) -> Result<EpisodeId, EpisodeError> {
        let _ = self
            .store
            .update_episode_status(episode_id, EpisodeStatus::Failed, Some(error.reason_code()))
            .await;
        Err(error)
    }
}

/// Sweeps episodes stuck in `Generating` past `lease_ttl + grace` (§4.7,
/// §5): their owning process crashed mid-pipeline without releasing the
/// lease through the normal path. The lease itself expires on its own TTL;
/// this only fixes up the stranded episode row so `/queue/status` and
/// `/production/status` don't report a phantom in-flight generation forever.
pub async fn reap_stale_generating_episodes(store: &dyn Store, older_than: chrono::DateTime<Utc>) -> Result<usize, EpisodeError> {
    let stale = store.list_stale_generating_episodes(older_than).await?;
    let count = stale.len();
    for episode in stale {
        warn!(episode_id = %episode.id, "reaping stale generating episode");
        store
            .update_episode_status(episode.id, EpisodeStatus::Failed, Some("REAPED_STALE_GENERATING"))
            .await?;
        if let Some(snapshot) = store.get_snapshot(episode.collection_snapshot_id).await? {
            let _ = store.set_collection_status(snapshot.collection_id, CollectionStatus::Consumed).await;
        }
    }
    Ok(count)
}

pub fn spawn_reaper_loop(
    store: Arc<dyn Store>,
    interval: Duration,
    grace: Duration,
    shutdown: Arc<tokio::sync::Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = Utc::now() - chrono::Duration::from_std(grace).unwrap_or_default();
                    if let Err(e) = reap_stale_generating_episodes(store.as_ref(), cutoff).await {
                        warn!(error = %e, "episode reaper sweep failed");
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
    use crate::capability::mock::{MockEditor, MockMetadata, MockScript, MockTts, MockWriter};
    use crate::store::SqliteStore;
    use crate::types::{Article, ArticleId, CadenceBucket, FeedId, Group, ReviewTier};

    async fn setup(
        min_articles: u32,
    ) -> (EpisodeOrchestrator, Arc<dyn Store>, GroupId, Arc<LeaseManager>, Arc<MockScript>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let feed_id = FeedId::new();
        let group = Group {
            id: GroupId::new(),
            name: "daily-tech".to_string(),
            presenter_ids: vec!["p1".to_string()],
            writer_id: "w1".to_string(),
            feed_ids: vec![feed_id],
            min_articles,
            cadence_bucket: CadenceBucket::High,
            last_episode_at: None,
            tag_filter: vec![],
        };
        store.upsert_group(&group).await.unwrap();

        let collection = store.create_building_collection(group.id).await.unwrap();
        for i in 0..min_articles {
            let article = Article {
                id: ArticleId::new(),
                feed_id,
                title: format!("Headline {i}"),
                url: format!("https://e/{i}"),
                content: "c".to_string(),
                published_at: Utc::now(),
                fingerprint: format!("fp{i}"),
                review_tier: ReviewTier::Light,
                tags: vec![],
                summary: Some("summary".to_string()),
                confidence: Some(0.9),
                collection_id: Some(collection.id),
                processed_at: Some(Utc::now()),
            };
            store.insert_article(&article).await.unwrap();
            store.increment_collection_item_count(collection.id).await.unwrap();
        }
        store.set_collection_status(collection.id, CollectionStatus::Ready).await.unwrap();

        let script_mock = Arc::new(MockScript::new());
        let capabilities = Arc::new(CapabilitySet {
            light_reviewer: Arc::new(crate::capability::mock::MockReviewer::new(0.9, vec![])),
            heavy_reviewer: Arc::new(crate::capability::mock::MockReviewer::new(0.9, vec![])),
            writer: Box::new(MockWriter),
            script: Box::new(script_mock.clone()),
            editor: Box::new(MockEditor),
            metadata: Box::new(MockMetadata),
            tts: Box::new(MockTts::new()),
        });

        let lease = LeaseManager::new();
        (
            EpisodeOrchestrator::new(store.clone(), lease.clone(), capabilities, Duration::from_secs(3600)),
            store,
            group.id,
            lease,
            script_mock,
        )
    }

    #[tokio::test]
    async fn happy_path_produces_completed_episode_with_audio() {
        let (orchestrator, store, group_id, _lease, _script_mock) = setup(3).await;
        let owner = OwnerToken::new();
        let episode_id = orchestrator.generate(group_id, &owner).await.unwrap();

        let episode = store.get_episode(episode_id).await.unwrap().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Completed);
        assert!(episode.script.is_some());

        let audio = store.get_audio_file_for_episode(episode_id).await.unwrap();
        assert!(audio.is_some());

        let group = store.get_group(group_id).await.unwrap().unwrap();
        assert!(group.last_episode_at.is_some());
    }

    #[tokio::test]
    async fn lease_held_by_other_owner_rejects_generation() {
        let (orchestrator, _store, group_id, lease, _script_mock) = setup(3).await;
        let owner_a = OwnerToken::new();
        lease.acquire(group_id, &owner_a, Duration::from_secs(60));

        let owner_b = OwnerToken::new();
        let result = orchestrator.generate(group_id, &owner_b).await;
        assert!(matches!(result, Err(EpisodeError::LeaseHeld { .. })));
    }

    #[tokio::test]
    async fn script_failure_marks_episode_failed_and_leaves_collection_consumed() {
        let (orchestrator, store, group_id, _lease, script_mock) = setup(3).await;
        script_mock.set_fail(true);

        let owner = OwnerToken::new();
        let result = orchestrator.generate(group_id, &owner).await;
        assert!(matches!(result, Err(EpisodeError::ScriptFailed { .. })));

        let ready = store.get_ready_collection(group_id).await.unwrap();
        assert!(ready.is_none());
    }
}
