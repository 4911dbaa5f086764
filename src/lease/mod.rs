//! Group Lease Manager (C2, §4.2): one expiring, reentrant-by-owner mutex per group.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::LeaseError;
use crate::types::{GroupId, OwnerToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired,
    HeldByOther,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseResult {
    Released,
    NotOwner,
    Absent,
}

#[derive(Debug, Clone)]
pub struct LeaseStatus {
    pub holder: Option<OwnerToken>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
struct LeaseRecord {
    owner_token: OwnerToken,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// A reserved owner token used for the manual `/production/pause` surface (§6, §9).
pub const MAINTENANCE_OWNER: &str = "__maintenance__";

/// Global, advisory, expiring mutex per group. Backed by a `DashMap`, the same
/// concurrent-registry idiom used for the teacher's `running_agents` set.
pub struct LeaseManager {
    leases: DashMap<GroupId, LeaseRecord>,
    /// Set by `/production/pause` (§6) independent of any per-group lease, so
    /// a maintenance pause takes effect even when no group is currently known
    /// to the caller (e.g. before any `Group` row has been created).
    global_pause: AtomicBool,
    global_pause_expires_at: Mutex<Option<DateTime<Utc>>>,
}

impl LeaseManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            leases: DashMap::new(),
            global_pause: AtomicBool::new(false),
            global_pause_expires_at: Mutex::new(None),
        })
    }

    /// Atomic insert-if-absent-or-expired with expiry. Reentrant for the same
    /// `owner_token`, which re-acquires and extends the TTL.
    pub fn acquire(&self, group_id: GroupId, owner_token: &OwnerToken, ttl: Duration) -> AcquireResult {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        match self.leases.entry(group_id) {
            dashmap::mapref::entry::Entry::Occupied(mut occ) => {
                let held = occ.get();
                if held.expires_at < now || &held.owner_token == owner_token {
                    occ.insert(LeaseRecord {
                        owner_token: owner_token.clone(),
                        acquired_at: if &held.owner_token == owner_token && held.expires_at >= now {
                            held.acquired_at
                        } else {
                            now
                        },
                        expires_at,
                    });
                    AcquireResult::Acquired
                } else {
                    AcquireResult::HeldByOther
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                vac.insert(LeaseRecord {
                    owner_token: owner_token.clone(),
                    acquired_at: now,
                    expires_at,
                });
                AcquireResult::Acquired
            }
        }
    }

    pub fn release(&self, group_id: GroupId, owner_token: &OwnerToken) -> ReleaseResult {
        match self.leases.entry(group_id) {
            dashmap::mapref::entry::Entry::Occupied(occ) => {
                if &occ.get().owner_token == owner_token {
                    occ.remove();
                    ReleaseResult::Released
                } else {
                    ReleaseResult::NotOwner
                }
            }
            dashmap::mapref::entry::Entry::Vacant(_) => ReleaseResult::Absent,
        }
    }

    pub fn status(&self, group_id: GroupId) -> LeaseStatus {
        let now = Utc::now();
        match self.leases.get(&group_id) {
            Some(record) if record.expires_at >= now => LeaseStatus {
                holder: Some(record.owner_token.clone()),
                expires_at: Some(record.expires_at),
            },
            _ => LeaseStatus {
                holder: None,
                expires_at: None,
            },
        }
    }

    /// Used by C8 to decide whether to pause review dispatch (§4.8, §5).
    pub fn any_active(&self) -> bool {
        if self.global_pause_active() {
            return true;
        }
        let now = Utc::now();
        self.leases.iter().any(|entry| entry.expires_at >= now)
    }

    pub fn active_count(&self) -> usize {
        let now = Utc::now();
        let per_group = self.leases.iter().filter(|e| e.expires_at >= now).count();
        per_group + usize::from(self.global_pause_active())
    }

    fn global_pause_active(&self) -> bool {
        if !self.global_pause.load(Ordering::Acquire) {
            return false;
        }
        match *self.global_pause_expires_at.lock() {
            Some(expires_at) => Utc::now() < expires_at,
            None => true,
        }
    }

    /// Manually sets a group-wide pause for maintenance (§6 `/production/pause`),
    /// independent of any group's own lease, plus a best-effort per-group lease
    /// under `MAINTENANCE_OWNER` so `status(group_id)` reports a holder too.
    pub fn force_pause(&self, groups: &[GroupId], ttl: Duration) {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        *self.global_pause_expires_at.lock() = Some(expires_at);
        self.global_pause.store(true, Ordering::Release);

        let owner = OwnerToken(MAINTENANCE_OWNER.to_string());
        for &group_id in groups {
            self.acquire(group_id, &owner, ttl);
        }
    }

    pub fn force_resume(&self, groups: &[GroupId]) {
        self.global_pause.store(false, Ordering::Release);
        *self.global_pause_expires_at.lock() = None;

        let owner = OwnerToken(MAINTENANCE_OWNER.to_string());
        for &group_id in groups {
            self.release(group_id, &owner);
        }
    }

    pub fn checked_release(&self, group_id: GroupId, owner_token: &OwnerToken) -> Result<(), LeaseError> {
        match self.release(group_id, owner_token) {
            ReleaseResult::Released => Ok(()),
            ReleaseResult::NotOwner => Err(LeaseError::NotOwner { group_id }),
            ReleaseResult::Absent => Err(LeaseError::Absent { group_id }),
        }
    }

    /// Reaper sweep (§5): transitions are the caller's responsibility (episode
    /// reaper looks at Episode rows directly); this just drops expired leases
    /// so `status`/`any_active` reflect reality without waiting for a write.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        self.leases.retain(|_, record| record.expires_at >= now);
    }
}

pub fn spawn_reaper_loop(
    manager: Arc<LeaseManager>,
    interval: Duration,
    shutdown: Arc<tokio::sync::Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    manager.sweep_expired();
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    })
}
