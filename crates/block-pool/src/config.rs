// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! size_classes = [512, 4096, 65536]
//! initial_count_per_class = 8
//! retention_per_class = 16
//! memory_budget = "64M"
//!
//! [tuning]
//! min_capacity = 4
//! max_capacity = 256
//! period_ms = 5000
//!
//! [health]
//! low_hit_rate = 0.5
//! ```
//!
//! [`PoolConfig::build`] assembles the layers bottom-up:
//!
//! ```text
//!   ManagedPool
//!     ├── TuningController      (if [tuning])
//!     └── PoolMonitor
//!           └── BudgetEnforcer  (if memory_budget)
//!                 └── SizeClassRouter
//!                       └── CorePool × size_classes.len()
//! ```

use crate::{
    BlockHandle, BlockPool, BudgetEnforcer, HealthReport, HealthThresholds, MemoryBudget,
    MetricsSnapshot, PoolError, PoolMonitor, PoolStats, SizeClassRouter, SourceUsage, Substrate,
    SystemSubstrate, TuningConfig, TuningController,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Configuration for a managed pool.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoolConfig {
    /// Block sizes in bytes; sorted and de-duplicated on build.
    pub size_classes: Vec<usize>,
    /// Blocks pre-populated in every class.
    #[serde(default = "default_initial_count")]
    pub initial_count_per_class: usize,
    /// Most free blocks each class retains (defaults to the initial count).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_per_class: Option<usize>,
    /// Hard memory ceiling (human-readable, e.g. `"64M"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_budget: Option<String>,
    /// Self-tuning bounds and period; no controller when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning: Option<TuningConfig>,
    /// Health rule thresholds.
    #[serde(default)]
    pub health: HealthThresholds,
}

fn default_initial_count() -> usize {
    8
}

impl PoolConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, PoolError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PoolError::InvalidConfig(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PoolError> {
        toml::from_str(toml_str)
            .map_err(|e| PoolError::InvalidConfig(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, PoolError> {
        toml::to_string_pretty(self)
            .map_err(|e| PoolError::InvalidConfig(format!("TOML serialise error: {e}")))
    }

    /// Parses the memory budget string, if one is set.
    pub fn parse_budget(&self) -> Result<Option<MemoryBudget>, PoolError> {
        self.memory_budget
            .as_deref()
            .map(MemoryBudget::parse)
            .transpose()
    }

    /// Free blocks each class retains.
    pub fn retention(&self) -> usize {
        self.retention_per_class
            .unwrap_or(self.initial_count_per_class)
    }

    /// Checks everything that can be checked without allocating.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.size_classes.is_empty() {
            return Err(PoolError::InvalidConfig(
                "size_classes must list at least one size".to_string(),
            ));
        }
        if self.size_classes.contains(&0) {
            return Err(PoolError::InvalidConfig(
                "size_classes must not contain 0".to_string(),
            ));
        }
        if self.initial_count_per_class > self.retention() {
            tracing::warn!(
                "initial_count_per_class {} exceeds retention {}; prefill will be clamped",
                self.initial_count_per_class,
                self.retention(),
            );
        }
        let budget = self.parse_budget()?;
        if let Some(tuning) = &self.tuning {
            tuning.validate()?;
            if let Some(budget) = budget {
                let largest = self.size_classes.iter().copied().max().unwrap_or(0);
                let ceiling = budget.blocks_of(largest);
                if tuning.min_capacity > ceiling {
                    return Err(PoolError::InvalidConfig(format!(
                        "tuning min_capacity {} exceeds the {ceiling}-block budget ceiling",
                        tuning.min_capacity
                    )));
                }
            }
        }
        Ok(())
    }

    /// Builds the configured stack on the global allocator.
    pub fn build(&self) -> Result<ManagedPool, PoolError> {
        self.build_with_substrate(Arc::new(SystemSubstrate))
    }

    /// Builds the configured stack on `substrate`.
    pub fn build_with_substrate(
        &self,
        substrate: Arc<dyn Substrate>,
    ) -> Result<ManagedPool, PoolError> {
        self.validate()?;

        let router = Arc::new(SizeClassRouter::new(
            &self.size_classes,
            self.initial_count_per_class,
            self.retention(),
            substrate,
        )?);

        let budget = match self.parse_budget()? {
            Some(budget) => {
                // Size the ceiling by the largest class so it holds for any mix.
                let block_size = router.size_classes().last().copied().unwrap_or(0);
                Some(Arc::new(BudgetEnforcer::new(
                    Arc::clone(&router),
                    budget,
                    block_size,
                )?))
            }
            None => None,
        };

        let chain = match &budget {
            Some(enforcer) => Box::new(Arc::clone(enforcer)) as Box<dyn BlockPool>,
            None => Box::new(Arc::clone(&router)) as Box<dyn BlockPool>,
        };
        let monitor = Arc::new(PoolMonitor::with_thresholds(chain, self.health.clone()));

        let controller = match &self.tuning {
            Some(tuning) => Some(Arc::new(TuningController::new(
                Arc::clone(&monitor),
                tuning.clone(),
            )?)),
            None => None,
        };

        tracing::info!(
            "managed pool built: classes {:?}, budget {}, tuning {}",
            router.size_classes(),
            self.memory_budget.as_deref().unwrap_or("none"),
            if controller.is_some() { "on" } else { "off" },
        );

        Ok(ManagedPool {
            monitor,
            router,
            budget,
            controller,
        })
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size_classes: vec![512, 4096, 65536],
            initial_count_per_class: default_initial_count(),
            retention_per_class: None,
            memory_budget: None,
            tuning: None,
            health: HealthThresholds::default(),
        }
    }
}

/// The layered pool a [`PoolConfig`] builds.
///
/// Implements [`BlockPool`] by delegating to the monitor at the top of the
/// stack, and keeps handles to the lower layers for reporting.
pub struct ManagedPool {
    monitor: Arc<PoolMonitor<Box<dyn BlockPool>>>,
    router: Arc<SizeClassRouter>,
    budget: Option<Arc<BudgetEnforcer<Arc<SizeClassRouter>>>>,
    controller: Option<Arc<TuningController<Box<dyn BlockPool>>>>,
}

impl ManagedPool {
    /// Health of the whole stack.
    pub fn health(&self) -> HealthReport {
        self.monitor.health()
    }

    /// Monitor metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.monitor.metrics()
    }

    /// Per-class statistics from the router.
    pub fn class_stats(&self) -> Vec<(usize, PoolStats)> {
        self.router.class_stats()
    }

    /// Budget ceiling in blocks, if a budget is configured.
    pub fn ceiling(&self) -> Option<usize> {
        self.budget.as_ref().map(|b| b.ceiling())
    }

    /// Requests refused by the budget so far.
    pub fn rejections(&self) -> u64 {
        self.budget.as_ref().map_or(0, |b| b.rejections())
    }

    /// The monitor at the top of the stack.
    pub fn monitor(&self) -> &Arc<PoolMonitor<Box<dyn BlockPool>>> {
        &self.monitor
    }

    /// The tuning controller, if configured.
    pub fn controller(&self) -> Option<&Arc<TuningController<Box<dyn BlockPool>>>> {
        self.controller.as_ref()
    }

    /// Starts the controller's periodic loop on the current tokio runtime.
    /// Returns `None` when tuning is not configured.
    pub fn spawn_controller(&self) -> Option<tokio::task::JoinHandle<()>> {
        self.controller
            .as_ref()
            .map(|controller| Arc::clone(controller).spawn())
    }
}

impl BlockPool for ManagedPool {
    fn acquire(&self, size_hint: usize, source_label: &str) -> Result<BlockHandle, PoolError> {
        self.monitor.acquire(size_hint, source_label)
    }

    fn release(&self, handle: BlockHandle) -> Result<(), PoolError> {
        self.monitor.release(handle)
    }

    fn stats(&self) -> PoolStats {
        self.monitor.stats()
    }

    fn free_for(&self, size_hint: usize) -> usize {
        self.monitor.free_for(size_hint)
    }

    fn resize(&self, new_capacity: usize) -> usize {
        self.monitor.resize(new_capacity)
    }

    fn reclaim_idle(&self, retain_minimum: usize) -> usize {
        self.monitor.reclaim_idle(retain_minimum)
    }

    fn source_usage(&self) -> BTreeMap<String, SourceUsage> {
        self.monitor.source_usage()
    }
}

impl std::fmt::Debug for ManagedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPool")
            .field("router", &self.router)
            .field("ceiling", &self.ceiling())
            .field("tuning", &self.controller.is_some())
            .finish()
    }
}
