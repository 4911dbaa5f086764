//! Fingerprint Store (C1, §4.1): sliding-window dedup by content hash.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Outcome of a `seen_or_insert` test-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenResult {
    Fresh,
    Duplicate,
}

struct Entry {
    expires_at: DateTime<Utc>,
}

/// Concurrent, TTL'd fingerprint set. Backed by an in-process `DashMap`
/// (§9: "must not assume" the backing store — this is the single-node
/// implementation; a coordination-store-backed one would implement the same
/// shape behind a trait if this crate needed to be pluggable at that seam).
pub struct FingerprintStore {
    entries: DashMap<String, Entry>,
    ttl: Duration,
    dedup_enabled: bool,
    duplicates_seen: std::sync::atomic::AtomicU64,
}

impl FingerprintStore {
    pub fn new(ttl: Duration, dedup_enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            ttl,
            dedup_enabled,
            duplicates_seen: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Deterministic hash of normalized title ⊕ url ⊕ content prefix (§4.1).
    pub fn fingerprint(title: &str, url: &str, content: &str) -> String {
        const CONTENT_PREFIX_CHARS: usize = 512;
        let normalized = format!(
            "{}|{}|{}",
            normalize(title),
            normalize_url(url),
            normalize(&content.chars().take(CONTENT_PREFIX_CHARS).collect::<String>())
        );
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Atomic test-and-set. Returns `Fresh` always when dedup is disabled.
    pub fn seen_or_insert(&self, hash: &str) -> SeenResult {
        if !self.dedup_enabled {
            return SeenResult::Fresh;
        }
        let now = Utc::now();
        match self.entries.entry(hash.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occ) => {
                if occ.get().expires_at < now {
                    occ.insert(Entry {
                        expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or_default(),
                    });
                    SeenResult::Fresh
                } else {
                    self.duplicates_seen
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    SeenResult::Duplicate
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                vac.insert(Entry {
                    expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or_default(),
                });
                SeenResult::Fresh
            }
        }
    }

    /// Idempotent sweep removing expired entries.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| entry.expires_at >= now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn duplicates_seen(&self) -> u64 {
        self.duplicates_seen.load(std::sync::atomic::Ordering::Relaxed)
    }
}

fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let without_scheme = trimmed
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");
    without_scheme.to_lowercase()
}

/// Spawns the background purge loop; returns a handle that stops it on drop
/// of the returned `Notify`-triggering shutdown signal.
pub fn spawn_purge_loop(
    store: Arc<FingerprintStore>,
    interval: Duration,
    shutdown: Arc<tokio::sync::Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    store.purge_expired();
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_ttl_never_returns_fresh() {
        let store = FingerprintStore::new(Duration::from_secs(3600), true);
        let hash = FingerprintStore::fingerprint("Title", "https://example.com/a", "content");
        assert_eq!(store.seen_or_insert(&hash), SeenResult::Fresh);
        assert_eq!(store.seen_or_insert(&hash), SeenResult::Duplicate);
        assert_eq!(store.seen_or_insert(&hash), SeenResult::Duplicate);
        assert_eq!(store.duplicates_seen(), 2);
    }

    #[test]
    fn disabled_dedup_always_fresh() {
        let store = FingerprintStore::new(Duration::from_secs(3600), false);
        let hash = FingerprintStore::fingerprint("Title", "https://example.com/a", "content");
        assert_eq!(store.seen_or_insert(&hash), SeenResult::Fresh);
        assert_eq!(store.seen_or_insert(&hash), SeenResult::Fresh);
    }

    #[test]
    fn fingerprint_ignores_whitespace_and_case() {
        let a = FingerprintStore::fingerprint("Hello World", "https://EXAMPLE.com/x", "Some Content Here");
        let b = FingerprintStore::fingerprint("  hello   world  ", "http://example.com/x/", "some   content  here");
        assert_eq!(a, b);
    }

    #[test]
    fn purge_expired_is_idempotent() {
        let store = FingerprintStore::new(Duration::from_millis(1), true);
        let hash = FingerprintStore::fingerprint("t", "u", "c");
        store.seen_or_insert(&hash);
        std::thread::sleep(Duration::from_millis(5));
        store.purge_expired();
        store.purge_expired();
        assert!(store.is_empty());
    }

    #[test]
    fn expired_entry_arrival_is_fresh_again() {
        let store = FingerprintStore::new(Duration::from_millis(1), true);
        let hash = FingerprintStore::fingerprint("t", "u", "c");
        assert_eq!(store.seen_or_insert(&hash), SeenResult::Fresh);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.seen_or_insert(&hash), SeenResult::Fresh);
    }
}
