// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Health classification for monitored pools.
//!
//! Each rule is checked independently against the monitor's metrics and a
//! fresh [`PoolStats`]; the overall status is the worst one triggered.
//!
//! | Rule              | Condition                                         | Status   |
//! |-------------------|---------------------------------------------------|----------|
//! | low hit rate      | `hit_rate < low_hit_rate` (≥ 1 acquisition)       | Warning  |
//! | high miss rate    | `miss_rate > high_miss_rate` (≥ 1 acquisition)    | Warning  |
//! | high utilization  | `checked_out / capacity > high_utilization`       | Warning  |
//! | possible leak     | `acquisitions > leak_min_acquisitions` and        | Critical |
//! |                   | `releases < acquisitions × leak_release_ratio`    |          |

use crate::{MetricsSnapshot, PoolStats, SourceUsage};
use std::collections::BTreeMap;

/// Overall verdict, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub enum HealthStatus {
    /// No rule fired.
    Healthy,
    /// The pool works but is sized or used poorly.
    Warning,
    /// Blocks are likely leaking.
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Rule thresholds. Every field falls back to its default when missing
/// from a config file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Warn when the hit rate drops below this.
    pub low_hit_rate: f64,
    /// Warn when the miss rate rises above this.
    pub high_miss_rate: f64,
    /// Warn when `checked_out / capacity` rises above this.
    pub high_utilization: f64,
    /// The leak rule only applies after this many acquisitions.
    pub leak_min_acquisitions: u64,
    /// Leak suspected when `releases < acquisitions * leak_release_ratio`.
    pub leak_release_ratio: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            low_hit_rate: 0.5,
            high_miss_rate: 0.3,
            high_utilization: 0.9,
            leak_min_acquisitions: 100,
            leak_release_ratio: 0.5,
        }
    }
}

/// Result of a health check.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HealthReport {
    /// Worst status among triggered rules.
    pub status: HealthStatus,
    /// One entry per triggered rule.
    pub issues: Vec<String>,
    /// Remediation hints, parallel to `issues`.
    pub recommendations: Vec<String>,
}

impl HealthReport {
    fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            issues: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    fn flag(&mut self, status: HealthStatus, issue: String, recommendation: String) {
        self.status = self.status.max(status);
        self.issues.push(issue);
        self.recommendations.push(recommendation);
    }

    /// Returns `true` if no rule triggered.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return format!("Health: {}", self.status);
        }
        let details: Vec<String> = self
            .issues
            .iter()
            .zip(&self.recommendations)
            .map(|(issue, fix)| format!("  - {issue} ({fix})"))
            .collect();
        format!("Health: {}\n{}", self.status, details.join("\n"))
    }
}

/// Classifies a pool from its metrics window, current stats and per-source
/// usage.
pub(crate) fn evaluate(
    metrics: &MetricsSnapshot,
    stats: &PoolStats,
    usage: &BTreeMap<String, SourceUsage>,
    thresholds: &HealthThresholds,
) -> HealthReport {
    let mut report = HealthReport::healthy();

    if metrics.acquisitions > 0 {
        let hit_rate = metrics.hit_rate();
        if hit_rate < thresholds.low_hit_rate {
            report.flag(
                HealthStatus::Warning,
                format!("low hit rate: {:.0}%", hit_rate * 100.0),
                "raise the initial count or retention so more requests reuse free blocks"
                    .to_string(),
            );
        }

        let miss_rate = metrics.miss_rate();
        if miss_rate > thresholds.high_miss_rate {
            report.flag(
                HealthStatus::Warning,
                format!("high miss rate: {:.0}%", miss_rate * 100.0),
                "pre-populate more blocks or enable self-tuning".to_string(),
            );
        }
    }

    let utilization = stats.utilization();
    if utilization > thresholds.high_utilization {
        report.flag(
            HealthStatus::Warning,
            format!(
                "high utilization: {} of {} blocks checked out",
                stats.checked_out, stats.capacity
            ),
            "increase capacity or max_capacity".to_string(),
        );
    }

    let leak_floor = metrics.acquisitions as f64 * thresholds.leak_release_ratio;
    if metrics.acquisitions > thresholds.leak_min_acquisitions
        && (metrics.releases as f64) < leak_floor
    {
        let suspect = usage
            .iter()
            .filter(|(_, u)| u.outstanding > 0)
            .max_by_key(|(_, u)| u.outstanding);
        let hint = match suspect {
            Some((label, u)) => format!(
                "check that '{label}' releases its blocks ({} outstanding)",
                u.outstanding
            ),
            None => "check that every acquired block is released".to_string(),
        };
        report.flag(
            HealthStatus::Critical,
            format!(
                "possible leak: {} releases for {} acquisitions",
                metrics.releases, metrics.acquisitions
            ),
            hint,
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(acquisitions: u64, hits: u64, releases: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            acquisitions,
            hits,
            misses: acquisitions - hits,
            releases,
            ..Default::default()
        }
    }

    fn stats(capacity: usize, checked_out: usize) -> PoolStats {
        PoolStats {
            capacity,
            checked_out,
            ..Default::default()
        }
    }

    fn check(m: &MetricsSnapshot, s: &PoolStats) -> HealthReport {
        evaluate(m, s, &BTreeMap::new(), &HealthThresholds::default())
    }

    #[test]
    fn test_idle_pool_healthy() {
        let report = check(&MetricsSnapshot::default(), &stats(8, 0));
        assert!(report.is_healthy());
        assert!(report.issues.is_empty());
        assert_eq!(report.summary(), "Health: HEALTHY");
    }

    #[test]
    fn test_good_pool_healthy() {
        let report = check(&metrics(100, 90, 100), &stats(10, 2));
        assert!(report.is_healthy());
    }

    #[test]
    fn test_low_hit_rate_and_high_miss_rate() {
        let report = check(&metrics(10, 4, 10), &stats(10, 1));
        assert_eq!(report.status, HealthStatus::Warning);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues[0].contains("low hit rate"));
        assert!(report.issues[1].contains("high miss rate"));
        assert_eq!(report.recommendations.len(), 2);
    }

    #[test]
    fn test_high_utilization() {
        let report = check(&metrics(10, 10, 0), &stats(10, 10));
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(report.issues.iter().any(|i| i.contains("high utilization")));
    }

    #[test]
    fn test_high_utilization_without_retention() {
        let report = check(&metrics(10, 10, 0), &stats(0, 2));
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(report.issues.iter().any(|i| i.contains("high utilization")));
    }

    #[test]
    fn test_leak_is_critical_and_names_source() {
        let mut usage = BTreeMap::new();
        usage.insert(
            "decoder".to_string(),
            SourceUsage {
                acquired: 150,
                outstanding: 140,
                ..Default::default()
            },
        );
        usage.insert(
            "encoder".to_string(),
            SourceUsage {
                acquired: 50,
                released: 48,
                outstanding: 2,
                ..Default::default()
            },
        );
        let report = evaluate(
            &metrics(200, 190, 50),
            &stats(1000, 142),
            &usage,
            &HealthThresholds::default(),
        );
        assert_eq!(report.status, HealthStatus::Critical);
        let leak = report
            .issues
            .iter()
            .position(|i| i.contains("possible leak"))
            .unwrap();
        assert!(report.recommendations[leak].contains("decoder"));
    }

    #[test]
    fn test_leak_needs_enough_acquisitions() {
        let report = check(&metrics(100, 100, 0), &stats(1000, 100));
        assert!(report.is_healthy());
    }

    #[test]
    fn test_custom_thresholds() {
        let strict = HealthThresholds {
            low_hit_rate: 0.95,
            ..Default::default()
        };
        let report = evaluate(
            &metrics(100, 90, 100),
            &stats(10, 1),
            &BTreeMap::new(),
            &strict,
        );
        assert_eq!(report.status, HealthStatus::Warning);
    }

    #[test]
    fn test_status_ordering() {
        assert!(HealthStatus::Critical > HealthStatus::Warning);
        assert!(HealthStatus::Warning > HealthStatus::Healthy);
    }

    #[test]
    fn test_thresholds_partial_toml() {
        let t: HealthThresholds = toml::from_str("low_hit_rate = 0.8").unwrap();
        assert_eq!(t.low_hit_rate, 0.8);
        assert_eq!(t.leak_min_acquisitions, 100);
    }
}
