// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A registry of independently configured pools.
//!
//! The [`PoolCoordinator`] holds shared handles to pools under string ids,
//! aggregates their statistics, and applies capacity plans produced by a
//! [`RebalancePolicy`]. It never owns a pool's lifecycle: unregistering
//! hands the pool back without tearing it down.

use crate::pool::lock;
use crate::{BlockPool, PoolError, PoolStats};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Statistics summed across every registered pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct GlobalStats {
    /// Free blocks across all pools.
    pub total_free: usize,
    /// Checked-out blocks across all pools.
    pub total_checked_out: usize,
    /// Summed retention capacity.
    pub total_capacity: usize,
    /// Each pool's stats exactly as it reported them.
    pub pools: BTreeMap<String, PoolStats>,
}

impl GlobalStats {
    /// Returns a human-readable summary, one line per pool.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} pools: {} free / {} checked out (capacity {})",
            self.pools.len(),
            self.total_free,
            self.total_checked_out,
            self.total_capacity,
        );
        for (id, stats) in &self.pools {
            out.push_str(&format!("\n  {id}: {}", stats.summary()));
        }
        out
    }
}

/// Maps global statistics to target capacities for some pools.
///
/// Any `Fn(&GlobalStats) -> Vec<(String, usize)>` is a policy.
pub trait RebalancePolicy {
    /// Returns `(pool id, target capacity)` pairs to apply.
    fn plan(&self, stats: &GlobalStats) -> Vec<(String, usize)>;
}

impl<F> RebalancePolicy for F
where
    F: Fn(&GlobalStats) -> Vec<(String, usize)>,
{
    fn plan(&self, stats: &GlobalStats) -> Vec<(String, usize)> {
        self(stats)
    }
}

/// Registry of named pools.
///
/// # Example
/// ```
/// use block_pool::{BlockPool, CorePool, PoolCoordinator};
/// use std::sync::Arc;
///
/// let coordinator = PoolCoordinator::new();
/// coordinator
///     .register("frames", Arc::new(CorePool::with_system_substrate(4096, 2, 4).unwrap()))
///     .unwrap();
/// coordinator
///     .register("headers", Arc::new(CorePool::with_system_substrate(64, 8, 8).unwrap()))
///     .unwrap();
///
/// let stats = coordinator.global_stats();
/// assert_eq!(stats.total_free, 10);
/// assert_eq!(stats.pools.len(), 2);
/// ```
#[derive(Default)]
pub struct PoolCoordinator {
    pools: Mutex<BTreeMap<String, Arc<dyn BlockPool>>>,
}

impl PoolCoordinator {
    /// Creates an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `pool` under `id`. Fails with `DuplicateId` if taken.
    pub fn register(&self, id: impl Into<String>, pool: Arc<dyn BlockPool>) -> Result<(), PoolError> {
        let id = id.into();
        let mut pools = lock(&self.pools);
        if pools.contains_key(&id) {
            return Err(PoolError::DuplicateId(id));
        }
        tracing::info!("registered pool '{id}'");
        pools.insert(id, pool);
        Ok(())
    }

    /// Removes and returns the pool registered under `id`. The pool itself
    /// keeps running for whoever still holds it.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn BlockPool>> {
        let removed = lock(&self.pools).remove(id);
        if removed.is_some() {
            tracing::info!("unregistered pool '{id}'");
        }
        removed
    }

    /// The pool registered under `id`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn BlockPool>> {
        lock(&self.pools).get(id).cloned()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        lock(&self.pools).keys().cloned().collect()
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        lock(&self.pools).len()
    }

    /// Returns `true` if no pool is registered.
    pub fn is_empty(&self) -> bool {
        lock(&self.pools).is_empty()
    }

    /// Sums stats over all pools, with the per-pool breakdown.
    pub fn global_stats(&self) -> GlobalStats {
        // Pool stats take pool locks; never hold the registry lock meanwhile.
        let pools = self.snapshot();

        let mut global = GlobalStats::default();
        for (id, pool) in pools {
            let stats = pool.stats();
            global.total_free += stats.free;
            global.total_checked_out += stats.checked_out;
            global.total_capacity += stats.capacity;
            global.pools.insert(id, stats);
        }
        global
    }

    /// Asks `policy` for target capacities and applies them. Returns the
    /// capacity each targeted pool actually ended up with; ids that are not
    /// registered are skipped.
    pub fn rebalance(&self, policy: &dyn RebalancePolicy) -> Vec<(String, usize)> {
        let stats = self.global_stats();
        let plan = policy.plan(&stats);

        let mut applied = Vec::with_capacity(plan.len());
        for (id, target) in plan {
            let Some(pool) = self.get(&id) else {
                tracing::warn!("rebalance skipped unknown pool '{id}'");
                continue;
            };
            let capacity = pool.resize(target);
            tracing::debug!("rebalanced '{id}' to capacity {capacity} (target {target})");
            applied.push((id, capacity));
        }
        applied
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn BlockPool>)> {
        lock(&self.pools)
            .iter()
            .map(|(id, pool)| (id.clone(), Arc::clone(pool)))
            .collect()
    }
}

impl std::fmt::Debug for PoolCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolCoordinator")
            .field("pools", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CorePool, PoolMonitor, SizeClassRouter};

    fn core(size: usize, initial: usize, capacity: usize) -> Arc<dyn BlockPool> {
        Arc::new(CorePool::with_system_substrate(size, initial, capacity).unwrap())
    }

    #[test]
    fn test_register_and_duplicate() {
        let c = PoolCoordinator::new();
        assert!(c.is_empty());
        c.register("a", core(64, 1, 1)).unwrap();
        let err = c.register("a", core(64, 1, 1)).unwrap_err();
        assert!(matches!(err, PoolError::DuplicateId(ref id) if id == "a"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_global_stats_sums_and_breakdown() {
        let c = PoolCoordinator::new();
        let a = core(64, 3, 4);
        c.register("a", Arc::clone(&a)).unwrap();
        c.register(
            "b",
            Arc::new(SizeClassRouter::with_system_substrate(&[32, 128], 2, 2).unwrap()),
        )
        .unwrap();

        let h = a.acquire(64, "x").unwrap();
        let stats = c.global_stats();
        assert_eq!(stats.total_free, 2 + 4);
        assert_eq!(stats.total_checked_out, 1);
        assert_eq!(stats.total_capacity, 4 + 4);
        assert_eq!(stats.pools["a"], a.stats());
        assert_eq!(stats.pools["b"].free, 4);
        assert!(stats.summary().contains("2 pools"));

        a.release(h).unwrap();
    }

    #[test]
    fn test_unregister_leaves_pool_usable() {
        let c = PoolCoordinator::new();
        c.register("a", core(64, 1, 1)).unwrap();
        let pool = c.unregister("a").unwrap();
        assert!(c.unregister("a").is_none());
        assert!(c.is_empty());

        let h = pool.acquire(64, "after").unwrap();
        pool.release(h).unwrap();
        assert_eq!(pool.stats().acquisitions, 1);
    }

    #[test]
    fn test_ids_sorted() {
        let c = PoolCoordinator::new();
        c.register("zeta", core(8, 0, 1)).unwrap();
        c.register("alpha", core(8, 0, 1)).unwrap();
        assert_eq!(c.ids(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_rebalance_applies_policy() {
        let c = PoolCoordinator::new();
        c.register("busy", core(64, 0, 2)).unwrap();
        c.register("idle", core(64, 8, 8)).unwrap();

        // Move idle capacity to the busy pool.
        let policy = |stats: &GlobalStats| -> Vec<(String, usize)> {
            let total = stats.total_capacity;
            vec![
                ("busy".to_string(), total - 2),
                ("idle".to_string(), 2),
                ("ghost".to_string(), 1),
            ]
        };
        let applied = c.rebalance(&policy);
        assert_eq!(
            applied,
            vec![("busy".to_string(), 8), ("idle".to_string(), 2)]
        );

        let stats = c.global_stats();
        assert_eq!(stats.pools["busy"].capacity, 8);
        assert_eq!(stats.pools["idle"].free, 2);
    }

    #[test]
    fn test_monitored_pools_register() {
        let c = PoolCoordinator::new();
        let monitored = Arc::new(PoolMonitor::new(CorePool::with_system_substrate(64, 2, 2).unwrap()));
        c.register("m", monitored.clone()).unwrap();
        let h = monitored.acquire(64, "x").unwrap();
        assert_eq!(c.global_stats().total_checked_out, 1);
        monitored.release(h).unwrap();
    }
}
