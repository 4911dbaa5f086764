//! Cadence podcast orchestrator
//!
//! This crate is the core coordination layer for a podcast-generation
//! pipeline: it ingests articles from feeds, reviews and routes them into
//! per-group collections, and drives lease-guarded episode generation against
//! a set of external model capabilities once a group's cadence comes due.

pub mod capability;
pub mod cadence;
pub mod collection;
pub mod config;
pub mod episode;
pub mod error;
pub mod fingerprint;
pub mod intake;
pub mod lease;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod review;
pub mod store;
pub mod types;

#[cfg(feature = "http-api")]
pub mod api;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cadence::CadenceController;
use crate::capability::CapabilitySet;
use crate::collection::CollectionBuilder;
use crate::config::{OrchestratorConfig, ReviewConfig};
use crate::episode::EpisodeOrchestrator;
use crate::error::OrchestratorError;
use crate::fingerprint::FingerprintStore;
use crate::intake::{ArticleIntake, IncomingArticle, IntakeOutcome};
use crate::lease::LeaseManager;
use crate::metrics::{HealthRegistry, MetricsRegistry};
use crate::queue::{QueueWorker, ReviewQueue};
use crate::review::ReviewCascade;
use crate::store::Store;
use crate::types::{EpisodeId, GroupId, OwnerToken};

/// How often the fingerprint store sheds expired entries. Not itself
/// cadence-sensitive, so it isn't exposed as an env-configurable knob.
const FINGERPRINT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// How often the exported gauges (queue depth, active leases, ready
/// collections) are refreshed from live state.
const GAUGE_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Wires every component (C1-C9) together and exposes the operations the
/// admin HTTP surface and the process entrypoint need. Analogous to the
/// teacher's `AgentRuntime`, but composed from this system's own components
/// rather than a generic agent lifecycle.
pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub store: Arc<dyn Store>,
    pub fingerprints: Arc<FingerprintStore>,
    pub lease: Arc<LeaseManager>,
    pub capabilities: Arc<CapabilitySet>,
    pub intake: Arc<ArticleIntake>,
    pub queue: Arc<ReviewQueue>,
    pub queue_worker: Arc<QueueWorker>,
    pub cascade: Arc<ReviewCascade>,
    pub collection_builder: Arc<CollectionBuilder>,
    pub cadence: Arc<CadenceController>,
    pub episodes: Arc<EpisodeOrchestrator>,
    pub metrics: Arc<MetricsRegistry>,
    pub health: Arc<HealthRegistry>,
    /// Live-mutable review thresholds/backoff shared by the cascade and the
    /// queue worker, so `PUT /reviewer/config` takes effect without a restart.
    pub review_config: Arc<parking_lot::RwLock<ReviewConfig>>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl Orchestrator {
    /// Builds every component from `config`, wiring them to `store` and
    /// `capabilities`. Does not start any background loop; call
    /// [`Orchestrator::spawn_background_tasks`] once the returned value is
    /// wrapped in an `Arc`.
    pub fn new(config: OrchestratorConfig, store: Arc<dyn Store>, capabilities: Arc<CapabilitySet>) -> Arc<Self> {
        let fingerprints = FingerprintStore::new(config.fingerprint.ttl, config.fingerprint.dedup_enabled);
        let lease = LeaseManager::new();
        let queue = Arc::new(ReviewQueue::new(config.queue.capacity));
        let review_config = Arc::new(parking_lot::RwLock::new(config.review.clone()));
        let metrics = Arc::new(MetricsRegistry::new());

        let cascade = Arc::new(ReviewCascade::new(
            capabilities.light_reviewer.clone(),
            capabilities.heavy_reviewer.clone(),
            store.clone(),
            review_config.clone(),
            metrics.clone(),
        ));

        let intake = Arc::new(ArticleIntake::new(fingerprints.clone(), store.clone(), queue.clone()));
        let collection_builder = Arc::new(CollectionBuilder::new(store.clone()));
        let cadence = Arc::new(CadenceController::new(store.clone(), lease.clone()));
        let episodes = Arc::new(EpisodeOrchestrator::new(
            store.clone(),
            lease.clone(),
            capabilities.clone(),
            config.lease.ttl,
        ));

        let queue_worker = QueueWorker::new(
            queue.clone(),
            cascade.clone(),
            collection_builder.clone(),
            store.clone(),
            lease.clone(),
            config.review.concurrency,
            config.queue.max_attempts,
            review_config.clone(),
        );

        let health = Arc::new(HealthRegistry::new(Duration::from_secs(config.capabilities.health_probe_ttl_secs)));

        Arc::new(Self {
            config,
            store,
            fingerprints,
            lease,
            capabilities,
            intake,
            queue,
            queue_worker,
            cascade,
            collection_builder,
            cadence,
            episodes,
            metrics,
            health,
            review_config,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        })
    }

    /// Ingests one article through the fingerprint/persist/enqueue path (C3).
    pub async fn ingest_article(&self, incoming: IncomingArticle) -> Result<IntakeOutcome, OrchestratorError> {
        let outcome = self.intake.ingest(incoming).await?;
        match outcome {
            IntakeOutcome::Enqueued => {
                self.metrics.articles_ingested.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            IntakeOutcome::Duplicate => {
                self.metrics.articles_duplicate.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
        Ok(outcome)
    }

    /// Runs the full episode-generation pipeline for `group_id` under a fresh
    /// owner token (§6 `POST /generate-episode`). `force` bypasses the
    /// cadence-interval check but never the lease check.
    pub async fn generate_episode(&self, group_id: GroupId, force: bool) -> Result<EpisodeId, OrchestratorError> {
        if !force {
            let now = chrono::Utc::now();
            let group = self
                .store
                .get_group(group_id)
                .await?
                .ok_or(crate::error::EpisodeError::InsufficientContent { group_id })?;
            let reason = self.cadence.assess(&group, now, false).await?;
            match reason {
                cadence::EligibilityReason::Eligible => {}
                cadence::EligibilityReason::LeaseHeld => {
                    return Err(crate::error::EpisodeError::LeaseHeld { group_id }.into());
                }
                _ => {
                    return Err(crate::error::EpisodeError::InsufficientContent { group_id }.into());
                }
            }
        }

        let owner = OwnerToken::new();
        let start = std::time::Instant::now();
        let result = self.episodes.generate(group_id, &owner).await;
        self.metrics.end_to_end_episode_latency.observe(start.elapsed());
        match &result {
            Ok(_) => {
                self.metrics.episodes_generated.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(e) if !matches!(e, crate::error::EpisodeError::LeaseHeld { .. }) => {
                self.metrics.episodes_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(_) => {}
        }
        Ok(result?)
    }

    /// Reports cadence eligibility for every known group (§6 `GET /cadence/status`).
    pub async fn cadence_status(&self) -> Result<Vec<(crate::types::Group, cadence::EligibilityReason)>, OrchestratorError> {
        let groups = self.store.list_groups().await?;
        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            let reason = self.cadence.assess(&group, chrono::Utc::now(), false).await?;
            out.push((group, reason));
        }
        Ok(out)
    }

    /// Snapshot of the live-mutable reviewer thresholds (§6 `GET /reviewer/config`).
    pub fn reviewer_config(&self) -> crate::config::ReviewConfig {
        self.review_config.read().clone()
    }

    /// Overwrites only the provided fields of the reviewer config (§6 `PUT /reviewer/config`).
    pub fn update_reviewer_config(
        &self,
        light_conf_threshold: Option<f64>,
        heavy_conf_threshold: Option<f64>,
        pause_backoff_secs: Option<u64>,
    ) -> crate::config::ReviewConfig {
        let mut guard = self.review_config.write();
        if let Some(v) = light_conf_threshold {
            guard.light_conf_threshold = v;
        }
        if let Some(v) = heavy_conf_threshold {
            guard.heavy_conf_threshold = v;
        }
        if let Some(v) = pause_backoff_secs {
            guard.pause_backoff = Duration::from_secs(v);
        }
        guard.clone()
    }

    /// Forces a group-wide generation pause across every known group (§6
    /// `POST /production/pause`), independent of any per-group lease held by
    /// a running episode.
    pub async fn pause_production(&self) -> Result<(), OrchestratorError> {
        let groups = self.store.list_groups().await?;
        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        self.lease.force_pause(&ids, self.config.lease.ttl);
        Ok(())
    }

    /// Releases the maintenance pause set by [`Orchestrator::pause_production`]
    /// (§6 `POST /production/resume`). Leases held by an in-flight episode
    /// generation are untouched since they belong to a different owner token.
    pub async fn resume_production(&self) -> Result<(), OrchestratorError> {
        let groups = self.store.list_groups().await?;
        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        self.lease.force_resume(&ids);
        Ok(())
    }

    /// Whether generation is currently paused anywhere, and how many leases
    /// are active (§6 `GET /production/status`).
    pub fn production_status(&self) -> (bool, usize) {
        (self.lease.any_active(), self.lease.active_count())
    }

    /// Review queue depth and dead-letter count (§6 `GET /queue/status`).
    pub fn queue_status(&self) -> (i64, u64) {
        (self.queue.depth(), self.queue_worker.dead_letter_count())
    }

    /// Store reachability plus per-capability probe booleans (§4.9, §6 `GET /health`).
    pub async fn health_snapshot(&self) -> (bool, std::collections::HashMap<String, bool>) {
        let store = self.store.clone();
        let store_ok = self
            .health
            .probe_store(|| async move { store.list_groups().await.is_ok() })
            .await
            == crate::metrics::HealthState::Healthy;
        let capabilities = self.capabilities.probe_all(&self.health).await;
        (store_ok, capabilities)
    }

    /// Refreshes the queue-depth / active-lease / ready-collection gauges
    /// from live state (§4.9).
    async fn refresh_gauges(&self) {
        let ready_count = match self.store.list_groups().await {
            Ok(groups) => {
                let mut count = 0u64;
                for group in groups {
                    if matches!(self.store.get_ready_collection(group.id).await, Ok(Some(_))) {
                        count += 1;
                    }
                }
                count
            }
            Err(e) => {
                warn!(error = %e, "failed to refresh ready-collection gauge");
                0
            }
        };

        self.metrics.set_gauge(
            self.queue.depth().max(0) as u64,
            self.lease.active_count() as u64,
            ready_count,
        );
    }

    /// Spawns every background loop (fingerprint purge, lease reaper, episode
    /// reaper, cadence tick, queue worker, gauge refresh). Requires `self` to
    /// already be behind an `Arc` since several loops hold a clone across
    /// `tokio::spawn`.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(fingerprint::spawn_purge_loop(
            self.fingerprints.clone(),
            FINGERPRINT_PURGE_INTERVAL,
            self.shutdown.clone(),
        ));

        handles.push(lease::spawn_reaper_loop(
            self.lease.clone(),
            self.config.lease.reaper_interval,
            self.shutdown.clone(),
        ));

        handles.push(episode::spawn_reaper_loop(
            self.store.clone(),
            self.config.lease.reaper_interval,
            self.config.lease.reaper_grace,
            self.shutdown.clone(),
        ));

        handles.push(collection::spawn_expiry_loop(
            self.collection_builder.clone(),
            self.config.lease.reaper_interval,
            self.config.collection.expiry,
            self.shutdown.clone(),
        ));

        let worker = self.queue_worker.clone();
        let worker_shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            worker.run(worker_shutdown).await;
        }));

        let orchestrator = self.clone();
        let on_eligible: Arc<dyn Fn(GroupId) + Send + Sync> = Arc::new(move |group_id| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.generate_episode(group_id, false).await {
                    warn!(%group_id, error = %e, "cadence-triggered episode generation failed");
                }
            });
        });
        handles.push(cadence::spawn_tick_loop(
            self.cadence.clone(),
            on_eligible,
            self.config.cadence.tick_interval,
            self.shutdown.clone(),
        ));

        let gauges_self = self.clone();
        let gauges_shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GAUGE_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => gauges_self.refresh_gauges().await,
                    _ = gauges_shutdown.notified() => break,
                }
            }
        }));

        handles
    }

    /// Signals every spawned background loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
