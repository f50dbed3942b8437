// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # block-pool
//!
//! A pool of reusable, fixed-size byte blocks for allocation-heavy
//! services: network buffers, decode scratch space, frame storage. Blocks
//! are handed out, written, handed back, zeroed and reused instead of
//! round-tripping through the allocator.
//!
//! # Key Components
//!
//! - [`CorePool`]: a single size class with its free list, checkout map and
//!   retention capacity.
//! - [`SizeClassRouter`]: several core pools, best-fit routing by
//!   requested size.
//! - [`BudgetEnforcer`]: a hard ceiling on resident blocks derived from a
//!   [`MemoryBudget`].
//! - [`PoolMonitor`]: hit/miss/hold-time metrics and [`HealthReport`]s.
//! - [`TuningController`]: periodically grows or shrinks capacity from
//!   monitor metrics.
//! - [`PoolCoordinator`]: a registry of pools with aggregate statistics.
//! - [`PoolConfig`]: TOML configuration that assembles the stack into a
//!   [`ManagedPool`].
//!
//! Every layer implements [`BlockPool`], so layers compose in any order.
//!
//! # Ownership Model
//!
//! ```text
//! pool.acquire(size, "source")
//!       │
//!       ▼
//!   BlockHandle  ◄─── owns the block; move-only, no Clone
//!       │
//!       │  pool.release(handle)
//!       ▼
//!   checked_out ──► zeroed ──► free list (or back to the substrate)
//! ```
//!
//! Release is explicit. A handle dropped without release logs a warning
//! and its block stays checked out, where the monitor's leak rule finds it.
//!
//! # Example
//! ```
//! use block_pool::{BlockPool, PoolConfig};
//!
//! let config = PoolConfig::from_toml(r#"
//!     size_classes = [256, 4096]
//!     initial_count_per_class = 4
//!     memory_budget = "1M"
//! "#).unwrap();
//! let pool = config.build().unwrap();
//!
//! let mut block = pool.acquire(1500, "rx").unwrap();
//! assert_eq!(block.len(), 4096);
//! block.as_mut_slice()[..5].copy_from_slice(b"hello");
//! pool.release(block).unwrap();
//!
//! println!("{}", pool.stats().summary());
//! println!("{}", pool.health().summary());
//! ```

mod block;
mod budget;
mod config;
mod coordinator;
mod error;
mod health;
mod monitor;
mod pool;
mod router;
mod stats;
mod substrate;
mod tuning;

pub use block::{AcquireOrigin, BlockHandle, BlockId, CheckoutInfo};
pub use budget::{BudgetEnforcer, MemoryBudget};
pub use config::{ManagedPool, PoolConfig};
pub use coordinator::{GlobalStats, PoolCoordinator, RebalancePolicy};
pub use error::PoolError;
pub use health::{HealthReport, HealthStatus, HealthThresholds};
pub use monitor::PoolMonitor;
pub use pool::{BlockPool, CorePool};
pub use router::SizeClassRouter;
pub use stats::{MetricsSnapshot, PoolStats, SourceUsage};
pub use substrate::{Substrate, SystemSubstrate, TrackingSubstrate};
pub use tuning::{ControllerState, TuningConfig, TuningController, TuningDecision};
