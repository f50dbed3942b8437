// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool statistics and monitor metrics.
//!
//! [`PoolStats`] is the read-only snapshot every pool layer exposes.
//! [`MetricsSnapshot`] is what the [`PoolMonitor`](crate::PoolMonitor)
//! accumulates between resets; the rates derived from it are computed on
//! demand, never stored.

use crate::AcquireOrigin;
use std::ops::AddAssign;
use std::time::Duration;

/// Point-in-time counters for a pool (or the sum over several pools).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    /// Retention ceiling: the most free blocks the pool keeps idle.
    pub capacity: usize,
    /// Blocks sitting in the free list.
    pub free: usize,
    /// Blocks currently held by callers.
    pub checked_out: usize,
    /// Successful acquisitions.
    pub acquisitions: u64,
    /// Successful releases.
    pub releases: u64,
    /// Acquisitions served from the free list.
    pub hits: u64,
    /// Acquisitions that needed a fresh substrate block.
    pub misses: u64,
}

impl PoolStats {
    /// Blocks the pool is responsible for right now (`free + checked_out`).
    pub fn resident(&self) -> usize {
        self.free + self.checked_out
    }

    /// Fraction of acquisitions served from the free list, `0.0` if none.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }

    /// `checked_out / capacity`.
    ///
    /// Can exceed `1.0`: capacity bounds idle blocks, not checkouts. A
    /// zero-capacity pool reads `1.0` with blocks out and `0.0` without.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return if self.checked_out > 0 { 1.0 } else { 0.0 };
        }
        self.checked_out as f64 / self.capacity as f64
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Blocks: {} free / {} checked out (capacity {}), \
             {} acquisitions ({} hits, {} misses, {:.0}% hit rate), {} releases",
            self.free,
            self.checked_out,
            self.capacity,
            self.acquisitions,
            self.hits,
            self.misses,
            self.hit_ratio() * 100.0,
            self.releases,
        )
    }
}

impl AddAssign for PoolStats {
    fn add_assign(&mut self, other: Self) {
        self.capacity += other.capacity;
        self.free += other.free;
        self.checked_out += other.checked_out;
        self.acquisitions += other.acquisitions;
        self.releases += other.releases;
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

/// Per-source acquisition accounting, keyed by the label given to `acquire`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SourceUsage {
    /// Blocks this source has acquired.
    pub acquired: u64,
    /// Blocks this source has released.
    pub released: u64,
    /// Blocks this source holds right now.
    pub outstanding: usize,
    /// Sum of hold durations over all released blocks.
    pub total_hold: Duration,
}

impl SourceUsage {
    /// Mean hold duration over released blocks.
    pub fn avg_hold(&self) -> Duration {
        if self.released == 0 {
            return Duration::ZERO;
        }
        self.total_hold.div_f64(self.released as f64)
    }
}

impl AddAssign<&SourceUsage> for SourceUsage {
    fn add_assign(&mut self, other: &SourceUsage) {
        self.acquired += other.acquired;
        self.released += other.released;
        self.outstanding += other.outstanding;
        self.total_hold += other.total_hold;
    }
}

/// Metrics accumulated by a [`PoolMonitor`](crate::PoolMonitor).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Acquisitions in the current window.
    pub acquisitions: u64,
    /// Releases in the current window.
    pub releases: u64,
    /// Free-list hits in the current window.
    pub hits: u64,
    /// Substrate misses in the current window.
    pub misses: u64,
    /// Highest concurrent checkout count seen.
    pub peak_checked_out: usize,
    /// Sum of hold durations over releases in the current window.
    pub total_hold_time: Duration,
    /// Utilization samples folded into `avg_utilization`.
    pub samples: u64,
    /// Running mean of `checked_out / capacity`, sampled on every acquire.
    pub avg_utilization: f64,
}

impl MetricsSnapshot {
    /// `hits / acquisitions`, `0.0` if there were none.
    pub fn hit_rate(&self) -> f64 {
        if self.acquisitions == 0 {
            return 0.0;
        }
        self.hits as f64 / self.acquisitions as f64
    }

    /// `misses / acquisitions`, `0.0` if there were none.
    pub fn miss_rate(&self) -> f64 {
        if self.acquisitions == 0 {
            return 0.0;
        }
        self.misses as f64 / self.acquisitions as f64
    }

    /// Mean hold duration over recorded releases.
    pub fn avg_hold_time(&self) -> Duration {
        if self.releases == 0 {
            return Duration::ZERO;
        }
        self.total_hold_time.div_f64(self.releases as f64)
    }

    pub(crate) fn record_acquire(
        &mut self,
        origin: AcquireOrigin,
        checked_out: usize,
        utilization: f64,
    ) {
        self.acquisitions += 1;
        match origin {
            AcquireOrigin::Hit => self.hits += 1,
            AcquireOrigin::Miss => self.misses += 1,
        }
        self.peak_checked_out = self.peak_checked_out.max(checked_out);

        // Incremental mean: no history is kept.
        self.samples += 1;
        self.avg_utilization += (utilization - self.avg_utilization) / self.samples as f64;
    }

    pub(crate) fn record_release(&mut self, held: Duration) {
        self.releases += 1;
        self.total_hold_time += held;
    }

    /// Zeroes everything; the peak restarts from the current in-flight count.
    pub(crate) fn reset(&mut self, in_flight: usize) {
        *self = Self {
            peak_checked_out: in_flight,
            ..Self::default()
        };
    }

    /// Clears the tuning window. The utilization mean and the peak carry over.
    pub(crate) fn reset_window(&mut self) {
        self.acquisitions = 0;
        self.releases = 0;
        self.hits = 0;
        self.misses = 0;
        self.total_hold_time = Duration::ZERO;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Metrics: {} acquisitions ({:.0}% hit rate), {} releases, peak {} checked out, \
             avg hold {:.2}ms, avg utilization {:.0}%",
            self.acquisitions,
            self.hit_rate() * 100.0,
            self.releases,
            self.peak_checked_out,
            self.avg_hold_time().as_secs_f64() * 1000.0,
            self.avg_utilization * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = PoolStats::default();
        assert_eq!(s.resident(), 0);
        assert_eq!(s.hit_ratio(), 0.0);
        assert_eq!(s.utilization(), 0.0);
    }

    #[test]
    fn test_zero_capacity_with_checkouts_is_saturated() {
        let s = PoolStats {
            capacity: 0,
            checked_out: 3,
            ..Default::default()
        };
        assert_eq!(s.utilization(), 1.0);
    }

    #[test]
    fn test_add_assign() {
        let mut a = PoolStats {
            capacity: 4,
            free: 2,
            checked_out: 1,
            acquisitions: 3,
            releases: 2,
            hits: 2,
            misses: 1,
        };
        a += PoolStats {
            capacity: 6,
            free: 1,
            checked_out: 5,
            acquisitions: 5,
            releases: 0,
            hits: 0,
            misses: 5,
        };
        assert_eq!(a.capacity, 10);
        assert_eq!(a.resident(), 9);
        assert_eq!(a.acquisitions, 8);
        assert!((a.hit_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_utilization_above_one() {
        let s = PoolStats {
            capacity: 2,
            checked_out: 3,
            ..Default::default()
        };
        assert!((s.utilization() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_running_mean() {
        let mut m = MetricsSnapshot::default();
        m.record_acquire(AcquireOrigin::Miss, 1, 0.2);
        m.record_acquire(AcquireOrigin::Hit, 2, 0.4);
        m.record_acquire(AcquireOrigin::Hit, 3, 0.6);
        assert_eq!(m.samples, 3);
        assert!((m.avg_utilization - 0.4).abs() < 1e-9);
        assert_eq!(m.peak_checked_out, 3);
        assert!((m.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.miss_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_avg_hold_time() {
        let mut m = MetricsSnapshot::default();
        assert_eq!(m.avg_hold_time(), Duration::ZERO);
        m.record_release(Duration::from_millis(10));
        m.record_release(Duration::from_millis(30));
        assert_eq!(m.avg_hold_time(), Duration::from_millis(20));
    }

    #[test]
    fn test_reset_keeps_in_flight_peak() {
        let mut m = MetricsSnapshot::default();
        m.record_acquire(AcquireOrigin::Miss, 8, 0.8);
        m.reset(3);
        assert_eq!(m.acquisitions, 0);
        assert_eq!(m.samples, 0);
        assert_eq!(m.peak_checked_out, 3);
    }

    #[test]
    fn test_reset_window_keeps_utilization() {
        let mut m = MetricsSnapshot::default();
        m.record_acquire(AcquireOrigin::Miss, 1, 0.5);
        m.record_release(Duration::from_millis(4));
        m.reset_window();
        assert_eq!(m.acquisitions, 0);
        assert_eq!(m.misses, 0);
        assert_eq!(m.releases, 0);
        assert_eq!(m.samples, 1);
        assert!((m.avg_utilization - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_source_usage_avg_hold() {
        let mut u = SourceUsage {
            released: 2,
            total_hold: Duration::from_millis(8),
            ..Default::default()
        };
        assert_eq!(u.avg_hold(), Duration::from_millis(4));
        u += &SourceUsage {
            acquired: 1,
            outstanding: 1,
            ..Default::default()
        };
        assert_eq!(u.acquired, 1);
        assert_eq!(u.outstanding, 1);
    }

    #[test]
    fn test_summary() {
        let s = PoolStats {
            capacity: 5,
            free: 5,
            acquisitions: 7,
            releases: 7,
            hits: 5,
            misses: 2,
            ..Default::default()
        };
        let summary = s.summary();
        assert!(summary.contains("7 acquisitions"));
        assert!(summary.contains("5 hits"));
        assert!(summary.contains("2 misses"));
    }
}
