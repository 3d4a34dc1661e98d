//! Permission cache with deterministic TTL
//!
//! Every read checks `expires_at` against the injected clock, so a stale entry
//! is never served whether or not a sweep has run. Sweeping only reclaims
//! memory.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::permissions::PermissionSet;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::directory::RoleGraph;
use crate::error::Result;
use crate::principal::PrincipalId;

/// Cached permission set for one principal
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Role the set was resolved from
    pub role: String,
    pub permissions: Arc<PermissionSet>,
    pub expires_at: DateTime<Utc>,
}

/// Thread-safe permission cache
///
/// Reads take no global lock. Writes replace a whole entry.
pub struct PermissionCache {
    entries: DashMap<PrincipalId, Arc<CacheEntry>>,
    graph: Arc<dyn RoleGraph>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    super_role: String,
    sweep_interval: Duration,
    last_sweep: Mutex<DateTime<Utc>>,
    /// Bumped on every invalidation; a resolve that overlaps one is not cached
    epoch: AtomicU64,
    all: Arc<PermissionSet>,
}

impl PermissionCache {
    pub fn new(
        graph: Arc<dyn RoleGraph>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
        super_role: impl Into<String>,
    ) -> Self {
        let now = clock.now();
        Self {
            entries: DashMap::new(),
            graph,
            clock,
            ttl: config.ttl(),
            super_role: super_role.into(),
            sweep_interval: config.sweep_interval(),
            last_sweep: Mutex::new(now),
            epoch: AtomicU64::new(0),
            all: Arc::new(PermissionSet::All),
        }
    }

    /// Permissions of `principal` holding `role`
    pub async fn get(&self, principal: &PrincipalId, role: &str) -> Result<Arc<PermissionSet>> {
        if role == self.super_role {
            return Ok(self.all.clone());
        }
        self.maybe_sweep();

        let now = self.clock.now();
        let cached = self.entries.get(principal).map(|e| e.value().clone());
        if let Some(entry) = cached {
            if entry.expires_at > now && entry.role == role {
                return Ok(entry.permissions.clone());
            }
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let permissions = Arc::new(self.graph.resolve(role).await?);

        if self.epoch.load(Ordering::Acquire) == epoch {
            self.entries.insert(
                principal.clone(),
                Arc::new(CacheEntry {
                    role: role.to_string(),
                    permissions: permissions.clone(),
                    expires_at: now + self.ttl,
                }),
            );
        } else {
            debug!(principal = %principal, "Invalidated during resolve, not caching");
        }
        Ok(permissions)
    }

    /// Drop the entry now; returns whether one existed
    pub fn invalidate(&self, principal: &PrincipalId) -> bool {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let removed = self.entries.remove(principal).is_some();
        debug!(principal = %principal, removed, "Permissions invalidated");
        removed
    }

    /// Drop every entry, e.g. after the role graph changed.
    /// Returns how many entries were dropped.
    pub fn invalidate_all(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let dropped = self.entries.len();
        self.entries.clear();
        info!(dropped, "All cached permissions invalidated");
        dropped
    }

    /// Remove expired entries
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        *self.last_sweep.lock().unwrap_or_else(|e| e.into_inner()) = now;

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Swept expired permission entries");
        }
        removed
    }

    /// Sweep if the interval has elapsed since the last one
    pub fn maybe_sweep(&self) {
        let now = self.clock.now();
        let due = {
            let last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            now - *last >= self.sweep_interval
        };
        if due {
            self.sweep_expired();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingGraph {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RoleGraph for CountingGraph {
        async fn resolve(&self, role: &str) -> Result<PermissionSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PermissionSet::from_iter([format!("{}:access", role)]))
        }
    }

    fn setup() -> (PermissionCache, Arc<CountingGraph>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap());
        let graph = Arc::new(CountingGraph::default());
        let config = CacheConfig {
            ttl_seconds: 300,
            sweep_interval_seconds: 3600,
        };
        let cache = PermissionCache::new(graph.clone(), Arc::new(clock.clone()), &config, "root");
        (cache, graph, clock)
    }

    fn calls(graph: &CountingGraph) -> usize {
        graph.calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_ttl_expiry_recomputes() {
        let (cache, graph, clock) = setup();
        let alice = PrincipalId::new("alice");

        let perms = cache.get(&alice, "user").await.unwrap();
        assert!(perms.contains("user:access"));
        assert_eq!(calls(&graph), 1);

        clock.advance(Duration::seconds(299));
        cache.get(&alice, "user").await.unwrap();
        assert_eq!(calls(&graph), 1);

        // Exactly at t0 + TTL the entry is stale
        clock.advance(Duration::seconds(1));
        cache.get(&alice, "user").await.unwrap();
        assert_eq!(calls(&graph), 2);

        clock.advance(Duration::seconds(301));
        cache.get(&alice, "user").await.unwrap();
        assert_eq!(calls(&graph), 3);
    }

    #[tokio::test]
    async fn test_super_role_bypasses_graph() {
        let (cache, graph, _) = setup();
        let perms = cache.get(&PrincipalId::new("admin"), "root").await.unwrap();
        assert!(perms.is_all());
        assert!(perms.contains("anything:at-all"));
        assert_eq!(calls(&graph), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_and_role_change() {
        let (cache, graph, _) = setup();
        let alice = PrincipalId::new("alice");

        cache.get(&alice, "user").await.unwrap();
        assert!(cache.invalidate(&alice));
        assert!(!cache.invalidate(&alice));
        cache.get(&alice, "user").await.unwrap();
        assert_eq!(calls(&graph), 2);

        let perms = cache.get(&alice, "operator").await.unwrap();
        assert!(perms.contains("operator:access"));
        assert!(!perms.contains("user:access"));
        assert_eq!(calls(&graph), 3);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (cache, _, clock) = setup();
        cache.get(&PrincipalId::new("alice"), "user").await.unwrap();
        clock.advance(Duration::seconds(200));
        cache.get(&PrincipalId::new("bob"), "user").await.unwrap();
        assert_eq!(cache.len(), 2);

        clock.advance(Duration::seconds(150));
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_all_forces_recompute() {
        let (cache, graph, _) = setup();
        cache.get(&PrincipalId::new("alice"), "user").await.unwrap();
        cache.get(&PrincipalId::new("bob"), "user").await.unwrap();
        assert_eq!(calls(&graph), 2);

        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.invalidate_all(), 0);

        cache.get(&PrincipalId::new("alice"), "user").await.unwrap();
        assert_eq!(calls(&graph), 3);
    }
}
