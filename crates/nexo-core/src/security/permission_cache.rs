//! Shared ACL result cache.
//!
//! Keys are `(sorted group ids, model, operation)`, so actors with the same
//! effective groups share entries. Denials are cached as well as grants.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::acl::AccessOperation;

/// Cache key of one ACL decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclKey {
    pub groups: Vec<i64>,
    pub model: String,
    pub operation: AccessOperation,
}

impl AclKey {
    /// Build a key; `groups` is sorted and deduplicated.
    pub fn new(groups: &[i64], model: impl Into<String>, operation: AccessOperation) -> Self {
        let mut groups = groups.to_vec();
        groups.sort_unstable();
        groups.dedup();
        Self {
            groups,
            model: model.into(),
            operation,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    allowed: bool,
    expires_at: Instant,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    /// Number of full invalidations.
    pub generation: u64,
}

/// ACL decisions shared by every unit of work of a runtime.
#[derive(Debug)]
pub struct PermissionCache {
    entries: DashMap<AclKey, CachedDecision>,
    ttl: Duration,
    generation: AtomicU64,
    /// Last security generation seen in the shared cache.
    shared_generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            generation: AtomicU64::new(0),
            shared_generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached decision, if present and fresh.
    pub fn get(&self, key: &AclKey) -> Option<bool> {
        let decision = self
            .entries
            .get(key)
            .map(|entry| *entry)
            .filter(|d| Instant::now() < d.expires_at);
        match decision {
            Some(d) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(d.allowed)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Current invalidation generation. Read it before querying storage
    /// and pass it to [`insert`](Self::insert).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store a decision computed while `generation` was current. Dropped if
    /// an invalidation happened in between.
    pub fn insert(&self, key: AclKey, allowed: bool, generation: u64) {
        if self.generation() != generation {
            return;
        }
        self.entries.insert(
            key,
            CachedDecision {
                allowed,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Follow the security generation of the shared cache. A change made
    /// by any process since the last call drops every local decision.
    pub fn observe_shared(&self, shared: u64) {
        if self.shared_generation.swap(shared, Ordering::AcqRel) != shared {
            self.invalidate_all();
        }
    }

    /// Forget every decision.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
        tracing::debug!("permission cache invalidated");
    }

    pub fn stats(&self) -> PermissionCacheStats {
        PermissionCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            generation: self.generation(),
        }
    }
}
