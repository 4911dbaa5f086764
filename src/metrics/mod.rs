//! Metrics & Health (C9, §4.9, §6): lock-free counters/gauges rendered as
//! Prometheus text for the `/metrics` route, plus a TTL-cached capability
//! health probe for `/health`. Generalized from the teacher's
//! `MetricsExporter`/`CompositeExporter` export-tolerance idiom — here there
//! is a single always-on Prometheus-text sink rather than a pluggable
//! backend list, since nothing in this system calls for OTLP or file
//! snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A fixed-bucket histogram good enough for rough latency distributions
/// without pulling in a dedicated histogram crate.
pub struct Histogram {
    buckets_ms: &'static [u64],
    counts: Vec<AtomicU64>,
    sum_ms: AtomicU64,
    total: AtomicU64,
}

impl Histogram {
    fn new(buckets_ms: &'static [u64]) -> Self {
        Self {
            buckets_ms,
            counts: (0..=buckets_ms.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_ms: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let bucket = self.buckets_ms.iter().position(|&b| ms <= b).unwrap_or(self.buckets_ms.len());
        self.counts[bucket].fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self, name: &str, out: &mut String) {
        let mut cumulative = 0u64;
        for (i, &bound) in self.buckets_ms.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            out.push_str(&format!("{name}_bucket{{le=\"{bound}\"}} {cumulative}\n"));
        }
        cumulative += self.counts[self.buckets_ms.len()].load(Ordering::Relaxed);
        out.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {cumulative}\n"));
        out.push_str(&format!("{name}_sum {}\n", self.sum_ms.load(Ordering::Relaxed)));
        out.push_str(&format!("{name}_count {}\n", self.total.load(Ordering::Relaxed)));
    }
}

const LATENCY_BUCKETS_MS: &[u64] = &[100, 250, 500, 1_000, 2_500, 5_000, 15_000, 30_000, 60_000];

/// Every counter, gauge, and histogram the orchestrator emits (§4.9).
pub struct MetricsRegistry {
    pub articles_ingested: AtomicU64,
    pub articles_duplicate: AtomicU64,
    pub reviews_light: AtomicU64,
    pub reviews_heavy: AtomicU64,
    pub reviews_failed_fallback: AtomicU64,
    pub episodes_generated: AtomicU64,
    pub episodes_failed: AtomicU64,
    pub queue_depth: AtomicU64,
    pub active_leases: AtomicU64,
    pub collections_ready: AtomicU64,
    pub light_review_latency: Histogram,
    pub heavy_review_latency: Histogram,
    pub end_to_end_episode_latency: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            articles_ingested: AtomicU64::new(0),
            articles_duplicate: AtomicU64::new(0),
            reviews_light: AtomicU64::new(0),
            reviews_heavy: AtomicU64::new(0),
            reviews_failed_fallback: AtomicU64::new(0),
            episodes_generated: AtomicU64::new(0),
            episodes_failed: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            active_leases: AtomicU64::new(0),
            collections_ready: AtomicU64::new(0),
            light_review_latency: Histogram::new(LATENCY_BUCKETS_MS),
            heavy_review_latency: Histogram::new(LATENCY_BUCKETS_MS),
            end_to_end_episode_latency: Histogram::new(LATENCY_BUCKETS_MS),
        }
    }

    pub fn set_gauge(&self, queue_depth: u64, active_leases: u64, collections_ready: u64) {
        self.queue_depth.store(queue_depth, Ordering::Relaxed);
        self.active_leases.store(active_leases, Ordering::Relaxed);
        self.collections_ready.store(collections_ready, Ordering::Relaxed);
    }

    /// Renders every metric in Prometheus text exposition format (§6 `GET /metrics`).
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        macro_rules! counter {
            ($name:expr, $help:expr, $field:expr) => {
                out.push_str(&format!("# HELP {} {}\n", $name, $help));
                out.push_str(&format!("# TYPE {} counter\n", $name));
                out.push_str(&format!("{} {}\n", $name, $field.load(Ordering::Relaxed)));
            };
        }
        macro_rules! gauge {
            ($name:expr, $help:expr, $field:expr) => {
                out.push_str(&format!("# HELP {} {}\n", $name, $help));
                out.push_str(&format!("# TYPE {} gauge\n", $name));
                out.push_str(&format!("{} {}\n", $name, $field.load(Ordering::Relaxed)));
            };
        }

        counter!("orchestrator_articles_ingested_total", "Articles accepted by intake", self.articles_ingested);
        counter!("orchestrator_articles_duplicate_total", "Articles suppressed as duplicates", self.articles_duplicate);
        counter!("orchestrator_reviews_light_total", "Articles accepted at the light review tier", self.reviews_light);
        counter!("orchestrator_reviews_heavy_total", "Articles accepted at the heavy review tier", self.reviews_heavy);
        counter!("orchestrator_reviews_failed_fallback_total", "Articles that fell back after both tiers failed", self.reviews_failed_fallback);
        counter!("orchestrator_episodes_generated_total", "Episodes completed successfully", self.episodes_generated);
        counter!("orchestrator_episodes_failed_total", "Episodes that failed generation", self.episodes_failed);
        gauge!("orchestrator_queue_depth", "Articles waiting for review", self.queue_depth);
        gauge!("orchestrator_active_leases", "Groups currently holding a generation lease", self.active_leases);
        gauge!("orchestrator_collections_ready", "Collections currently in Ready status", self.collections_ready);

        out.push_str("# HELP orchestrator_light_review_latency_ms Light review call latency\n");
        out.push_str("# TYPE orchestrator_light_review_latency_ms histogram\n");
        self.light_review_latency.render("orchestrator_light_review_latency_ms", &mut out);

        out.push_str("# HELP orchestrator_heavy_review_latency_ms Heavy review call latency\n");
        out.push_str("# TYPE orchestrator_heavy_review_latency_ms histogram\n");
        self.heavy_review_latency.render("orchestrator_heavy_review_latency_ms", &mut out);

        out.push_str("# HELP orchestrator_episode_latency_ms End-to-end episode generation latency\n");
        out.push_str("# TYPE orchestrator_episode_latency_ms histogram\n");
        self.end_to_end_episode_latency.render("orchestrator_episode_latency_ms", &mut out);

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

struct CachedProbe {
    state: HealthState,
    checked_at: Instant,
}

/// Caches each capability's last probe result for `ttl` so `/health` doesn't
/// hammer every downstream capability on every scrape (§4.9).
pub struct HealthRegistry {
    ttl: Duration,
    store_ok: Mutex<Option<CachedProbe>>,
    capabilities_ok: Mutex<std::collections::HashMap<String, CachedProbe>>,
}

impl HealthRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            store_ok: Mutex::new(None),
            capabilities_ok: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Runs `probe` only if the cached value is missing or stale, returning
    /// the (possibly cached) health state.
    pub async fn probe_store<F, Fut>(&self, probe: F) -> HealthState
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        if let Some(cached) = self.store_ok.lock().unwrap().as_ref() {
            if cached.checked_at.elapsed() < self.ttl {
                return cached.state;
            }
        }
        let state = if probe().await { HealthState::Healthy } else { HealthState::Unhealthy };
        *self.store_ok.lock().unwrap() = Some(CachedProbe { state, checked_at: Instant::now() });
        state
    }

    pub async fn probe_capability<F, Fut>(&self, name: &str, probe: F) -> HealthState
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        {
            let cache = self.capabilities_ok.lock().unwrap();
            if let Some(cached) = cache.get(name) {
                if cached.checked_at.elapsed() < self.ttl {
                    return cached.state;
                }
            }
        }
        let state = if probe().await { HealthState::Healthy } else { HealthState::Unhealthy };
        self.capabilities_ok
            .lock()
            .unwrap()
            .insert(name.to_string(), CachedProbe { state, checked_at: Instant::now() });
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_output_includes_every_named_series() {
        let registry = MetricsRegistry::new();
        registry.articles_ingested.fetch_add(5, Ordering::Relaxed);
        registry.light_review_latency.observe(Duration::from_millis(120));
        registry.set_gauge(3, 1, 2);

        let rendered = registry.render_prometheus();
        assert!(rendered.contains("orchestrator_articles_ingested_total 5"));
        assert!(rendered.contains("orchestrator_queue_depth 3"));
        assert!(rendered.contains("orchestrator_light_review_latency_ms_bucket"));
    }

    #[test]
    fn histogram_places_observation_in_correct_bucket() {
        let histogram = Histogram::new(&[100, 200]);
        histogram.observe(Duration::from_millis(150));
        let mut out = String::new();
        histogram.render("test_latency", &mut out);
        assert!(out.contains("test_latency_bucket{le=\"200\"} 1"));
        assert!(out.contains("test_latency_bucket{le=\"100\"} 0"));
    }

    #[tokio::test]
    async fn health_probe_caches_within_ttl() {
        let registry = HealthRegistry::new(Duration::from_secs(60));
        let calls = std::sync::Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            registry
                .probe_store(|| async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    true
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
