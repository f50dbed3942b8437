// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Metrics collection and health reporting around any pool.
//!
//! A [`PoolMonitor`] forwards every call to the pool it wraps and records
//! what happened on the way back. It never changes a result: errors from
//! the inner pool reach the caller untouched and are not counted.
//!
//! Metrics sit behind their own mutex, taken after the inner call returns,
//! so readers such as the [`TuningController`](crate::TuningController)
//! never contend with pool locks.

use crate::health::{self, HealthReport, HealthThresholds};
use crate::pool::lock;
use crate::{BlockHandle, BlockPool, MetricsSnapshot, PoolError, PoolStats, SourceUsage};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Wraps a pool with metrics and health checks.
///
/// # Example
/// ```
/// use block_pool::{BlockPool, CorePool, PoolMonitor};
///
/// let monitor = PoolMonitor::new(CorePool::with_system_substrate(256, 4, 4).unwrap());
/// let h = monitor.acquire(256, "parser").unwrap();
/// monitor.release(h).unwrap();
///
/// assert_eq!(monitor.metrics().hits, 1);
/// assert!(monitor.health().is_healthy());
/// ```
pub struct PoolMonitor<P> {
    inner: P,
    metrics: Mutex<MetricsSnapshot>,
    thresholds: HealthThresholds,
}

impl<P: BlockPool> PoolMonitor<P> {
    /// Wraps `inner` with default health thresholds.
    pub fn new(inner: P) -> Self {
        Self::with_thresholds(inner, HealthThresholds::default())
    }

    /// Wraps `inner` with custom health thresholds.
    pub fn with_thresholds(inner: P, thresholds: HealthThresholds) -> Self {
        let in_flight = inner.stats().checked_out;
        Self {
            inner,
            metrics: Mutex::new(MetricsSnapshot {
                peak_checked_out: in_flight,
                ..MetricsSnapshot::default()
            }),
            thresholds,
        }
    }

    /// Copy of the accumulated metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.metrics).clone()
    }

    /// The thresholds used by [`health`](Self::health).
    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Classifies the pool from current metrics and stats.
    pub fn health(&self) -> HealthReport {
        let metrics = self.metrics();
        let stats = self.inner.stats();
        let usage = self.inner.source_usage();
        let report = health::evaluate(&metrics, &stats, &usage, &self.thresholds);
        if !report.is_healthy() {
            tracing::debug!("pool health {}: {:?}", report.status, report.issues);
        }
        report
    }

    /// Zeroes all metrics. The peak restarts at the blocks checked out now.
    pub fn reset_metrics(&self) {
        let in_flight = self.inner.stats().checked_out;
        lock(&self.metrics).reset(in_flight);
    }

    /// Starts a new tuning window: clears acquisition, release, hit and
    /// miss counts but keeps the utilization mean and peak.
    pub fn reset_window(&self) {
        lock(&self.metrics).reset_window();
    }

    /// The wrapped pool.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: BlockPool> BlockPool for PoolMonitor<P> {
    fn acquire(&self, size_hint: usize, source_label: &str) -> Result<BlockHandle, PoolError> {
        let handle = self.inner.acquire(size_hint, source_label)?;
        let stats = self.inner.stats();
        lock(&self.metrics).record_acquire(handle.origin(), stats.checked_out, stats.utilization());
        Ok(handle)
    }

    fn release(&self, handle: BlockHandle) -> Result<(), PoolError> {
        let held = handle.held_for();
        self.inner.release(handle)?;
        lock(&self.metrics).record_release(held);
        Ok(())
    }

    fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    fn free_for(&self, size_hint: usize) -> usize {
        self.inner.free_for(size_hint)
    }

    fn resize(&self, new_capacity: usize) -> usize {
        let applied = self.inner.resize(new_capacity);
        tracing::debug!("monitored pool resized to {applied} (requested {new_capacity})");
        applied
    }

    fn reclaim_idle(&self, retain_minimum: usize) -> usize {
        self.inner.reclaim_idle(retain_minimum)
    }

    fn source_usage(&self) -> BTreeMap<String, SourceUsage> {
        self.inner.source_usage()
    }
}

impl<P: BlockPool> std::fmt::Debug for PoolMonitor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMonitor")
            .field("stats", &self.inner.stats())
            .field("metrics", &self.metrics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BudgetEnforcer, CorePool, HealthStatus, MemoryBudget};

    fn monitored(initial: usize, capacity: usize) -> PoolMonitor<CorePool> {
        PoolMonitor::new(CorePool::with_system_substrate(128, initial, capacity).unwrap())
    }

    #[test]
    fn test_counts_hits_and_misses() {
        let m = monitored(2, 4);
        let handles: Vec<_> = (0..3).map(|_| m.acquire(128, "t").unwrap()).collect();
        let metrics = m.metrics();
        assert_eq!(metrics.acquisitions, 3);
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.peak_checked_out, 3);
        assert_eq!(metrics.samples, 3);

        for h in handles {
            m.release(h).unwrap();
        }
        assert_eq!(m.metrics().releases, 3);
    }

    #[test]
    fn test_errors_pass_through_uncounted() {
        let pool = CorePool::with_system_substrate(128, 0, 1).unwrap();
        let budget = BudgetEnforcer::new(pool, MemoryBudget::from_bytes(128), 128).unwrap();
        let m = PoolMonitor::new(budget);

        let h = m.acquire(128, "t").unwrap();
        assert!(matches!(
            m.acquire(128, "t"),
            Err(PoolError::BudgetExceeded { .. })
        ));
        assert_eq!(m.metrics().acquisitions, 1);

        let other = monitored(1, 1);
        let foreign = other.acquire(128, "x").unwrap();
        assert!(matches!(
            m.release(foreign),
            Err(PoolError::UnknownBlock { .. })
        ));
        assert_eq!(m.metrics().releases, 0);

        m.release(h).unwrap();
        assert_eq!(m.metrics().releases, 1);
    }

    #[test]
    fn test_reset_metrics_keeps_in_flight_peak() {
        let m = monitored(0, 4);
        let a = m.acquire(128, "t").unwrap();
        let b = m.acquire(128, "t").unwrap();
        m.release(a).unwrap();

        m.reset_metrics();
        let metrics = m.metrics();
        assert_eq!(metrics.acquisitions, 0);
        assert_eq!(metrics.releases, 0);
        assert_eq!(metrics.peak_checked_out, 1);

        m.release(b).unwrap();
    }

    #[test]
    fn test_reset_window_keeps_utilization() {
        let m = monitored(0, 2);
        let h = m.acquire(128, "t").unwrap();
        let before = m.metrics().avg_utilization;
        m.reset_window();
        let after = m.metrics();
        assert_eq!(after.acquisitions, 0);
        assert_eq!(after.avg_utilization, before);
        m.release(h).unwrap();
    }

    #[test]
    fn test_health_flags_cold_pool() {
        let m = monitored(0, 8);
        for _ in 0..4 {
            let h = m.acquire(128, "t").unwrap();
            m.release(h).unwrap();
        }
        // One miss then three hits: 75% hit rate.
        assert!(m.health().is_healthy());

        let cold = monitored(0, 0);
        let h = cold.acquire(128, "t").unwrap();
        cold.release(h).unwrap();
        let report = cold.health();
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(report.issues.iter().any(|i| i.contains("low hit rate")));
    }

    #[test]
    fn test_health_detects_leak() {
        let m = monitored(0, 256);
        for _ in 0..150 {
            let h = m.acquire(128, "leaky").unwrap();
            // Dropped without release.
            drop(h);
        }
        let report = m.health();
        assert_eq!(report.status, HealthStatus::Critical);
        assert!(report.recommendations.iter().any(|r| r.contains("leaky")));
        assert_eq!(m.stats().checked_out, 150);
    }

    #[test]
    fn test_resize_passes_through() {
        let m = monitored(1, 1);
        assert_eq!(m.resize(4), 4);
        assert_eq!(m.stats().free, 4);
        assert_eq!(m.reclaim_idle(1), 3);
    }
}
