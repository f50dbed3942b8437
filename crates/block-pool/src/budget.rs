// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory budgets and the enforcer that turns them into a block ceiling.
//!
//! A [`MemoryBudget`] is a byte count with human-readable parsing for
//! config files. A [`BudgetEnforcer`] wraps any [`BlockPool`] and divides
//! the budget by a block size once, at construction, to get a hard ceiling
//! on resident blocks (`free + checked_out`). It is the one layer allowed
//! to refuse a request outright.

use crate::pool::lock;
use crate::{BlockHandle, BlockPool, PoolError, PoolStats, SourceUsage};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A hard memory ceiling in bytes.
///
/// # Parsing
/// Supports human-readable strings with binary suffixes:
/// - `"512M"` or `"512MB"` → 512 × 1024² bytes
/// - `"1G"` or `"1GB"` → 1 × 1024³ bytes
/// - `"2048K"` or `"2048KB"` → 2048 × 1024 bytes
/// - `"1073741824"` → raw byte count
///
/// # Examples
/// ```
/// use block_pool::MemoryBudget;
///
/// let b = MemoryBudget::from_mb(64);
/// assert_eq!(b.as_mb(), 64);
///
/// let b = MemoryBudget::parse("1G").unwrap();
/// assert_eq!(b.as_mb(), 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    /// Budget in bytes.
    bytes: usize,
}

impl MemoryBudget {
    /// Creates a budget from a byte count.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Creates a budget from kilobytes.
    pub fn from_kb(kb: usize) -> Self {
        Self { bytes: kb * 1024 }
    }

    /// Creates a budget from megabytes.
    pub fn from_mb(mb: usize) -> Self {
        Self {
            bytes: mb * 1024 * 1024,
        }
    }

    /// Returns the budget in bytes.
    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Returns the budget in megabytes (truncated).
    pub fn as_mb(&self) -> usize {
        self.bytes / (1024 * 1024)
    }

    /// How many whole blocks of `block_size` bytes fit in the budget.
    pub fn blocks_of(&self, block_size: usize) -> usize {
        if block_size == 0 {
            return 0;
        }
        self.bytes / block_size
    }

    /// Parses a human-readable budget string.
    ///
    /// Accepted formats: `"512M"`, `"512MB"`, `"1G"`, `"1GB"`, `"64K"`,
    /// `"64KB"`, `"100B"`, or a plain byte count. Case-insensitive.
    pub fn parse(s: &str) -> Result<Self, PoolError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PoolError::InvalidConfig("empty memory budget".to_string()));
        }

        let upper = s.to_uppercase();
        let (num_str, multiplier) = if upper.ends_with("GB") {
            (&s[..s.len() - 2], 1024 * 1024 * 1024)
        } else if upper.ends_with('G') {
            (&s[..s.len() - 1], 1024 * 1024 * 1024)
        } else if upper.ends_with("MB") {
            (&s[..s.len() - 2], 1024 * 1024)
        } else if upper.ends_with('M') {
            (&s[..s.len() - 1], 1024 * 1024)
        } else if upper.ends_with("KB") {
            (&s[..s.len() - 2], 1024)
        } else if upper.ends_with('K') {
            (&s[..s.len() - 1], 1024)
        } else if upper.ends_with('B') {
            (&s[..s.len() - 1], 1)
        } else {
            (s, 1)
        };

        let value: usize = num_str.trim().parse().map_err(|_| {
            PoolError::InvalidConfig(format!(
                "invalid memory budget '{s}': expected a number with an optional K, M or G suffix"
            ))
        })?;

        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| PoolError::InvalidConfig(format!("memory budget overflow: '{s}'")))?;

        if bytes == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "memory budget must be non-zero: '{s}'"
            )));
        }

        Ok(Self { bytes })
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes >= 1024 * 1024 * 1024 && self.bytes % (1024 * 1024 * 1024) == 0 {
            write!(f, "{} GB", self.bytes / (1024 * 1024 * 1024))
        } else if self.bytes >= 1024 * 1024 && self.bytes % (1024 * 1024) == 0 {
            write!(f, "{} MB", self.bytes / (1024 * 1024))
        } else if self.bytes >= 1024 && self.bytes % 1024 == 0 {
            write!(f, "{} KB", self.bytes / 1024)
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}

/// Wraps a pool with a hard ceiling on resident blocks.
///
/// A request is refused with [`PoolError::BudgetExceeded`] when it would
/// need a fresh block and `free + checked_out` already equals the ceiling.
/// Requests a free block can serve are always admitted, since they do not
/// change the resident count.
///
/// # Example
/// ```
/// use block_pool::{BlockPool, BudgetEnforcer, CorePool, MemoryBudget, PoolError};
///
/// let pool = CorePool::with_system_substrate(1024, 0, 2).unwrap();
/// let budget = BudgetEnforcer::new(pool, MemoryBudget::from_kb(2), 1024).unwrap();
/// assert_eq!(budget.ceiling(), 2);
///
/// let a = budget.acquire(1024, "io").unwrap();
/// let b = budget.acquire(1024, "io").unwrap();
/// assert!(matches!(budget.acquire(1024, "io"), Err(PoolError::BudgetExceeded { .. })));
///
/// budget.release(a).unwrap();
/// let c = budget.acquire(1024, "io").unwrap();
/// # budget.release(b).unwrap();
/// # budget.release(c).unwrap();
/// ```
pub struct BudgetEnforcer<P> {
    inner: P,
    budget: MemoryBudget,
    block_size: usize,
    ceiling: usize,
    /// Serialises the resident check with the operations that can grow
    /// the resident count (acquire, resize).
    admission: Mutex<()>,
    rejections: AtomicU64,
}

impl<P: BlockPool> BudgetEnforcer<P> {
    /// Wraps `inner` with `ceiling = floor(budget / block_size)`.
    ///
    /// Fails if the budget cannot hold a single block, or if `inner`
    /// already holds more blocks than the ceiling allows.
    pub fn new(inner: P, budget: MemoryBudget, block_size: usize) -> Result<Self, PoolError> {
        if block_size == 0 {
            return Err(PoolError::InvalidConfig(
                "budget block size must be non-zero".to_string(),
            ));
        }

        let ceiling = budget.blocks_of(block_size);
        if ceiling == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "memory budget {budget} cannot hold a single {block_size}-byte block"
            )));
        }

        let resident = inner.stats().resident();
        if resident > ceiling {
            return Err(PoolError::InvalidConfig(format!(
                "pool already holds {resident} blocks, above the budget ceiling of {ceiling}"
            )));
        }

        tracing::info!("memory budget {budget}: ceiling of {ceiling} blocks of {block_size} bytes");

        Ok(Self {
            inner,
            budget,
            block_size,
            ceiling,
            admission: Mutex::new(()),
            rejections: AtomicU64::new(0),
        })
    }

    /// Maximum resident blocks.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// The configured budget.
    pub fn budget(&self) -> MemoryBudget {
        self.budget
    }

    /// Block size the ceiling was computed from.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Requests refused with `BudgetExceeded` so far.
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Blocks that could still be allocated before hitting the ceiling.
    pub fn headroom(&self) -> usize {
        self.ceiling.saturating_sub(self.inner.stats().resident())
    }

    /// The wrapped pool.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: BlockPool> BlockPool for BudgetEnforcer<P> {
    fn acquire(&self, size_hint: usize, source_label: &str) -> Result<BlockHandle, PoolError> {
        let _admission = lock(&self.admission);

        if self.inner.free_for(size_hint) == 0 {
            let resident = self.inner.stats().resident();
            if resident >= self.ceiling {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "budget ceiling reached ({resident}/{}): refusing '{source_label}'",
                    self.ceiling,
                );
                return Err(PoolError::BudgetExceeded {
                    ceiling: self.ceiling,
                    resident,
                });
            }
        }

        self.inner.acquire(size_hint, source_label)
    }

    /// Releases never raise the resident count, so they skip admission.
    fn release(&self, handle: BlockHandle) -> Result<(), PoolError> {
        self.inner.release(handle)
    }

    fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    fn free_for(&self, size_hint: usize) -> usize {
        self.inner.free_for(size_hint)
    }

    /// Growth is clamped so that resident blocks stay within the ceiling.
    fn resize(&self, new_capacity: usize) -> usize {
        let _admission = lock(&self.admission);
        let stats = self.inner.stats();

        let target = if new_capacity > stats.capacity {
            let headroom = self.ceiling.saturating_sub(stats.resident());
            let growth = (new_capacity - stats.capacity).min(headroom);
            if growth < new_capacity - stats.capacity {
                tracing::debug!(
                    "budget limits growth to {growth} blocks (requested {})",
                    new_capacity - stats.capacity,
                );
            }
            stats.capacity + growth
        } else {
            new_capacity
        };

        self.inner.resize(target)
    }

    fn reclaim_idle(&self, retain_minimum: usize) -> usize {
        self.inner.reclaim_idle(retain_minimum)
    }

    fn source_usage(&self) -> BTreeMap<String, SourceUsage> {
        self.inner.source_usage()
    }
}

impl<P> fmt::Debug for BudgetEnforcer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetEnforcer")
            .field("budget", &self.budget)
            .field("block_size", &self.block_size)
            .field("ceiling", &self.ceiling)
            .field("rejections", &self.rejections.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CorePool, SizeClassRouter};

    fn enforcer(block: usize, blocks: usize, initial: usize) -> BudgetEnforcer<CorePool> {
        let pool = CorePool::with_system_substrate(block, initial, blocks).unwrap();
        BudgetEnforcer::new(pool, MemoryBudget::from_bytes(block * blocks), block).unwrap()
    }

    #[test]
    fn test_from_mb() {
        let b = MemoryBudget::from_mb(512);
        assert_eq!(b.as_bytes(), 512 * 1024 * 1024);
        assert_eq!(b.as_mb(), 512);
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(MemoryBudget::parse("512M").unwrap().as_mb(), 512);
        assert_eq!(MemoryBudget::parse("512mb").unwrap().as_mb(), 512);
        assert_eq!(MemoryBudget::parse("1G").unwrap().as_mb(), 1024);
        assert_eq!(MemoryBudget::parse("2gb").unwrap().as_mb(), 2048);
        assert_eq!(MemoryBudget::parse("64K").unwrap().as_bytes(), 64 * 1024);
        assert_eq!(MemoryBudget::parse("100B").unwrap().as_bytes(), 100);
        assert_eq!(MemoryBudget::parse("1048576").unwrap().as_mb(), 1);
        assert_eq!(MemoryBudget::parse("  8M  ").unwrap().as_mb(), 8);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(MemoryBudget::parse("").is_err());
        assert!(MemoryBudget::parse("abc").is_err());
        assert!(MemoryBudget::parse("0M").is_err());
        assert!(matches!(
            MemoryBudget::parse("lots"),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(MemoryBudget::from_mb(1024).to_string(), "1 GB");
        assert_eq!(MemoryBudget::from_mb(512).to_string(), "512 MB");
        assert_eq!(MemoryBudget::from_bytes(2048).to_string(), "2 KB");
        assert_eq!(MemoryBudget::from_bytes(100).to_string(), "100 B");
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = MemoryBudget::from_mb(256);
        let json = serde_json::to_string(&b).unwrap();
        let back: MemoryBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
    }

    #[test]
    fn test_ceiling() {
        let e = enforcer(1024, 10, 0);
        assert_eq!(e.ceiling(), 10);
        assert_eq!(e.headroom(), 10);
        assert_eq!(e.block_size(), 1024);
    }

    #[test]
    fn test_budget_too_small() {
        let pool = CorePool::with_system_substrate(1024, 0, 1).unwrap();
        let result = BudgetEnforcer::new(pool, MemoryBudget::from_bytes(1023), 1024);
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_initial_population_over_ceiling() {
        let pool = CorePool::with_system_substrate(1024, 4, 4).unwrap();
        let result = BudgetEnforcer::new(pool, MemoryBudget::from_bytes(2048), 1024);
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_eleventh_acquire_rejected() {
        let e = enforcer(512, 10, 0);
        let mut held: Vec<_> = (0..10).map(|_| e.acquire(512, "hold").unwrap()).collect();

        let err = e.acquire(512, "hold").unwrap_err();
        assert!(matches!(
            err,
            PoolError::BudgetExceeded {
                ceiling: 10,
                resident: 10
            }
        ));
        assert_eq!(e.rejections(), 1);
        assert_eq!(e.stats().checked_out, 10);

        e.release(held.pop().unwrap()).unwrap();
        let eleventh = e.acquire(512, "hold").unwrap();
        held.push(eleventh);
        assert!(e.stats().resident() <= e.ceiling());

        for h in held {
            e.release(h).unwrap();
        }
    }

    #[test]
    fn test_resize_clamped_to_ceiling() {
        let e = enforcer(256, 4, 1);
        let h = e.acquire(256, "r").unwrap();
        // One block resident, so only three more fit.
        assert_eq!(e.resize(100), 7);
        let stats = e.stats();
        assert!(stats.resident() <= e.ceiling());
        assert_eq!(stats.resident(), 4);
        e.release(h).unwrap();
    }

    #[test]
    fn test_reclaim_idle() {
        let e = enforcer(64, 8, 6);
        assert_eq!(e.reclaim_idle(2), 4);
        assert_eq!(e.stats().free, 2);
        assert_eq!(e.headroom(), 6);
    }

    #[test]
    fn test_router_inner_admits_free_class() {
        let router = SizeClassRouter::with_system_substrate(&[64, 256], 1, 2).unwrap();
        let e = BudgetEnforcer::new(router, MemoryBudget::from_bytes(2 * 256), 256).unwrap();
        // Two resident blocks already; the 64-byte class still has a free one.
        let a = e.acquire(64, "x").unwrap();
        assert!(matches!(
            e.acquire(64, "x"),
            Err(PoolError::BudgetExceeded { .. })
        ));
        let b = e.acquire(256, "x").unwrap();
        e.release(a).unwrap();
        e.release(b).unwrap();
    }

    #[test]
    fn test_concurrent_ceiling_holds() {
        let e = enforcer(128, 6, 0);
        std::thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| {
                    for _ in 0..200 {
                        if let Ok(h) = e.acquire(128, "c") {
                            assert!(e.stats().resident() <= e.ceiling());
                            e.release(h).unwrap();
                        }
                    }
                });
            }
        });
        assert!(e.stats().resident() <= e.ceiling());
        assert_eq!(e.stats().checked_out, 0);
    }
}
