// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Self-tuning of pool capacity from monitor metrics.
//!
//! A [`TuningController`] looks at one metrics window per tick and moves the
//! pool's capacity within `[min_capacity, max_capacity]`:
//!
//! ```text
//!   hit_rate < grow_below_hit_rate  and  current < max
//!       → grow:   min(max, ceil(current × grow_factor))
//!   else avg_utilization < shrink_below_utilization  and  current > min
//!       → shrink: max(min, floor(current × shrink_factor))
//!   else
//!       → hold
//! ```
//!
//! Growing pre-allocates free blocks; shrinking only drops free blocks.
//! After every tick the monitor's window is reset, while its utilization
//! running mean carries over.
//!
//! # Example
//! ```
//! use block_pool::{BlockPool, CorePool, PoolMonitor, TuningConfig, TuningController};
//! use std::sync::Arc;
//!
//! let monitor = Arc::new(PoolMonitor::new(CorePool::with_system_substrate(64, 0, 4).unwrap()));
//! let config = TuningConfig { min_capacity: 2, max_capacity: 16, ..Default::default() };
//! let controller = TuningController::new(Arc::clone(&monitor), config).unwrap();
//!
//! // All misses: the controller grows the pool.
//! let h = monitor.acquire(64, "demo").unwrap();
//! monitor.release(h).unwrap();
//! controller.tick();
//! assert_eq!(controller.state().current_capacity, 6);
//! ```

use crate::pool::lock;
use crate::{BlockPool, MetricsSnapshot, PoolError, PoolMonitor};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Controller bounds, period and rule parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Lower capacity bound.
    pub min_capacity: usize,
    /// Upper capacity bound.
    pub max_capacity: usize,
    /// Tick period in milliseconds.
    pub period_ms: u64,
    /// Grow when the window's hit rate is below this.
    pub grow_below_hit_rate: f64,
    /// Shrink when the utilization mean is below this.
    pub shrink_below_utilization: f64,
    /// Multiplier applied on growth (> 1).
    pub grow_factor: f64,
    /// Multiplier applied on shrink (in `(0, 1)`).
    pub shrink_factor: f64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            min_capacity: 1,
            max_capacity: 1024,
            period_ms: 5000,
            grow_below_hit_rate: 0.7,
            shrink_below_utilization: 0.3,
            grow_factor: 1.5,
            shrink_factor: 0.7,
        }
    }
}

impl TuningConfig {
    /// Tick period as a [`Duration`].
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Checks bounds, period and factors.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_capacity > self.max_capacity {
            return Err(PoolError::InvalidConfig(format!(
                "tuning min_capacity {} exceeds max_capacity {}",
                self.min_capacity, self.max_capacity
            )));
        }
        if self.period_ms == 0 {
            return Err(PoolError::InvalidConfig(
                "tuning period_ms must be non-zero".to_string(),
            ));
        }
        if self.grow_factor.is_nan() || self.grow_factor <= 1.0 {
            return Err(PoolError::InvalidConfig(format!(
                "tuning grow_factor must be above 1, got {}",
                self.grow_factor
            )));
        }
        if !(0.0..1.0).contains(&self.shrink_factor) || self.shrink_factor == 0.0 {
            return Err(PoolError::InvalidConfig(format!(
                "tuning shrink_factor must be between 0 and 1, got {}",
                self.shrink_factor
            )));
        }
        for (name, value) in [
            ("grow_below_hit_rate", self.grow_below_hit_rate),
            ("shrink_below_utilization", self.shrink_below_utilization),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PoolError::InvalidConfig(format!(
                    "tuning {name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TuningDecision {
    /// Capacity went up from `from` to `to`.
    Grow { from: usize, to: usize },
    /// Capacity went down from `from` to `to`.
    Shrink { from: usize, to: usize },
    /// Capacity stayed where it was.
    Hold { capacity: usize },
}

impl std::fmt::Display for TuningDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grow { from, to } => write!(f, "grow {from} -> {to}"),
            Self::Shrink { from, to } => write!(f, "shrink {from} -> {to}"),
            Self::Hold { capacity } => write!(f, "hold at {capacity}"),
        }
    }
}

/// Controller state.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ControllerState {
    /// Capacity the pool reported after the last resize. Stays within
    /// `[min_capacity, max_capacity]` unless a budget refused the growth.
    pub current_capacity: usize,
    /// Lower capacity bound.
    pub min_capacity: usize,
    /// Upper capacity bound.
    pub max_capacity: usize,
    /// The window the last tick decided on.
    pub last_tuning_metrics: Option<MetricsSnapshot>,
    /// Ticks run so far.
    pub ticks: u64,
}

/// Periodically resizes a monitored pool.
pub struct TuningController<P> {
    monitor: Arc<PoolMonitor<P>>,
    config: TuningConfig,
    state: Mutex<ControllerState>,
}

impl<P: BlockPool> TuningController<P> {
    /// Creates a controller over `monitor`.
    ///
    /// If the pool's capacity lies outside the bounds, it is resized to the
    /// nearest bound first.
    pub fn new(monitor: Arc<PoolMonitor<P>>, config: TuningConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let capacity = monitor.stats().capacity;
        let clamped = capacity.clamp(config.min_capacity, config.max_capacity);
        let current = if clamped == capacity {
            capacity
        } else {
            monitor.resize(clamped)
        };

        tracing::info!(
            "tuning controller started at capacity {current}, bounds [{}, {}], period {:?}",
            config.min_capacity,
            config.max_capacity,
            config.period(),
        );

        if current < config.min_capacity {
            tracing::warn!(
                "pool reached capacity {current}, below tuning minimum {}",
                config.min_capacity
            );
        }

        let state = ControllerState {
            current_capacity: current,
            min_capacity: config.min_capacity,
            max_capacity: config.max_capacity,
            last_tuning_metrics: None,
            ticks: 0,
        };

        Ok(Self {
            monitor,
            config,
            state: Mutex::new(state),
        })
    }

    /// Copy of the current state.
    pub fn state(&self) -> ControllerState {
        lock(&self.state).clone()
    }

    /// The controller's configuration.
    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    /// The monitored pool.
    pub fn monitor(&self) -> &Arc<PoolMonitor<P>> {
        &self.monitor
    }

    /// Runs one tuning step and returns what it did.
    pub fn tick(&self) -> TuningDecision {
        let metrics = self.monitor.metrics();
        let mut state = lock(&self.state);
        let from = state.current_capacity;

        let decision = match self.plan(from, &metrics) {
            Some(target) => {
                // A lower layer may stop short of the target; track what it applied.
                let applied = self.monitor.resize(target);
                state.current_capacity = applied;
                if applied > from {
                    TuningDecision::Grow { from, to: applied }
                } else if applied < from {
                    TuningDecision::Shrink { from, to: applied }
                } else {
                    TuningDecision::Hold { capacity: from }
                }
            }
            None => TuningDecision::Hold { capacity: from },
        };

        match decision {
            TuningDecision::Hold { .. } => tracing::debug!(
                "tuning: {decision} (hit rate {:.2}, utilization {:.2})",
                metrics.hit_rate(),
                metrics.avg_utilization,
            ),
            _ => tracing::info!(
                "tuning: {decision} (hit rate {:.2}, utilization {:.2})",
                metrics.hit_rate(),
                metrics.avg_utilization,
            ),
        }

        state.last_tuning_metrics = Some(metrics);
        state.ticks += 1;
        drop(state);

        self.monitor.reset_window();
        decision
    }

    /// Target capacity for this window, or `None` to hold.
    fn plan(&self, current: usize, metrics: &MetricsSnapshot) -> Option<usize> {
        let cfg = &self.config;

        if metrics.acquisitions > 0
            && metrics.hit_rate() < cfg.grow_below_hit_rate
            && current < cfg.max_capacity
        {
            let scaled = (current as f64 * cfg.grow_factor).ceil() as usize;
            // A pool at zero would never leave it by scaling alone.
            return Some(scaled.max(current + 1).min(cfg.max_capacity));
        }

        if metrics.samples > 0
            && metrics.avg_utilization < cfg.shrink_below_utilization
            && current > cfg.min_capacity
        {
            let scaled = (current as f64 * cfg.shrink_factor).floor() as usize;
            return Some(scaled.max(cfg.min_capacity));
        }

        None
    }
}

impl<P: BlockPool + 'static> TuningController<P> {
    /// Runs [`tick`](Self::tick) every `period` on the current tokio
    /// runtime until the returned task is aborted.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = self.config.period();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                self.tick();
            }
        })
    }
}

impl<P> std::fmt::Debug for TuningController<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TuningController")
            .field("config", &self.config)
            .field("state", &*lock(&self.state))
            .finish()
    }
}
