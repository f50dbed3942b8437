// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Best-fit routing across several size classes.
//!
//! A [`SizeClassRouter`] owns one [`CorePool`] per configured size and sends
//! each request to the smallest class that can hold it. Requests larger than
//! the largest class fall back to the largest class instead of failing.
//! Each class keeps its own lock; the router only adds a reverse index
//! `BlockId -> size class` so callers can release without knowing where a
//! block came from.

use crate::pool::lock;
use crate::{BlockHandle, BlockId, BlockPool, CorePool, PoolError, PoolStats, SourceUsage, Substrate};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Routes requests to the best-fitting of several [`CorePool`]s.
///
/// # Example
/// ```
/// use block_pool::{BlockPool, SizeClassRouter};
///
/// let router = SizeClassRouter::with_system_substrate(&[64, 256, 1024], 2, 2).unwrap();
/// let h = router.acquire(100, "decoder").unwrap();
/// assert_eq!(h.size_class(), 256);
/// router.release(h).unwrap();
/// ```
pub struct SizeClassRouter {
    /// One pool per class, ascending by size.
    classes: Vec<CorePool>,
    /// Which class each checked-out block belongs to.
    index: Mutex<HashMap<BlockId, usize>>,
}

impl SizeClassRouter {
    /// Creates a router over `sizes`, each class pre-populated with
    /// `initial_count` blocks and retaining at most `capacity_per_class`.
    ///
    /// Sizes are sorted and de-duplicated. An empty list or a zero size is
    /// rejected.
    pub fn new(
        sizes: &[usize],
        initial_count: usize,
        capacity_per_class: usize,
        substrate: Arc<dyn Substrate>,
    ) -> Result<Self, PoolError> {
        let mut sizes = sizes.to_vec();
        sizes.sort_unstable();
        sizes.dedup();

        if sizes.is_empty() {
            return Err(PoolError::InvalidConfig(
                "at least one size class is required".to_string(),
            ));
        }

        let classes = sizes
            .iter()
            .map(|&size| CorePool::new(size, initial_count, capacity_per_class, Arc::clone(&substrate)))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!("size-class router created with classes {sizes:?}");

        Ok(Self {
            classes,
            index: Mutex::new(HashMap::new()),
        })
    }

    /// Creates a router backed by the global allocator.
    pub fn with_system_substrate(
        sizes: &[usize],
        initial_count: usize,
        capacity_per_class: usize,
    ) -> Result<Self, PoolError> {
        Self::new(
            sizes,
            initial_count,
            capacity_per_class,
            Arc::new(crate::SystemSubstrate),
        )
    }

    /// The configured size classes, ascending.
    pub fn size_classes(&self) -> Vec<usize> {
        self.classes.iter().map(CorePool::size_class).collect()
    }

    /// The size class that would serve a request of `requested` bytes.
    pub fn select_class(&self, requested: usize) -> usize {
        self.pool_for(requested).size_class()
    }

    /// Per-class statistics, ascending by size.
    pub fn class_stats(&self) -> Vec<(usize, PoolStats)> {
        self.classes
            .iter()
            .map(|pool| (pool.size_class(), pool.stats()))
            .collect()
    }

    /// The pool backing a given size class, if configured.
    pub fn class(&self, size_class: usize) -> Option<&CorePool> {
        self.classes
            .binary_search_by_key(&size_class, CorePool::size_class)
            .ok()
            .map(|i| &self.classes[i])
    }

    /// Best fit: smallest class `>= requested`, else the largest class.
    fn pool_for(&self, requested: usize) -> &CorePool {
        let i = self
            .classes
            .partition_point(|pool| pool.size_class() < requested)
            .min(self.classes.len() - 1);
        &self.classes[i]
    }
}

impl BlockPool for SizeClassRouter {
    fn acquire(&self, size_hint: usize, source_label: &str) -> Result<BlockHandle, PoolError> {
        let pool = self.pool_for(size_hint);
        if size_hint > pool.size_class() {
            tracing::debug!(
                "request for {size_hint} bytes exceeds largest class; serving {} bytes",
                pool.size_class(),
            );
        }
        let handle = pool.acquire(size_hint, source_label)?;
        lock(&self.index).insert(handle.id(), pool.size_class());
        Ok(handle)
    }

    fn release(&self, handle: BlockHandle) -> Result<(), PoolError> {
        let id = handle.id();
        let Some(size_class) = lock(&self.index).remove(&id) else {
            tracing::warn!("router rejected release of block {id}: no size class recorded");
            return Err(PoolError::UnknownBlock { id });
        };
        match self.class(size_class) {
            Some(pool) => pool.release(handle),
            None => Err(PoolError::UnknownBlock { id }),
        }
    }

    fn stats(&self) -> PoolStats {
        let mut total = PoolStats::default();
        for pool in &self.classes {
            total += pool.stats();
        }
        total
    }

    fn free_for(&self, size_hint: usize) -> usize {
        self.pool_for(size_hint).free_for(size_hint)
    }

    /// Splits the new total capacity across classes in proportion to their
    /// current capacities.
    fn resize(&self, new_capacity: usize) -> usize {
        let current: Vec<usize> = self.classes.iter().map(|p| p.stats().capacity).collect();
        let targets = distribute(new_capacity, &current);
        self.classes
            .iter()
            .zip(targets)
            .map(|(pool, target)| pool.resize(target))
            .sum()
    }

    /// Applies `retain_minimum` to every class independently.
    fn reclaim_idle(&self, retain_minimum: usize) -> usize {
        self.classes
            .iter()
            .map(|pool| pool.reclaim_idle(retain_minimum))
            .sum()
    }

    fn source_usage(&self) -> BTreeMap<String, SourceUsage> {
        let mut merged: BTreeMap<String, SourceUsage> = BTreeMap::new();
        for pool in &self.classes {
            for (label, usage) in pool.source_usage() {
                *merged.entry(label).or_default() += &usage;
            }
        }
        merged
    }
}

/// Splits `total` across slots weighted by `weights`; evenly when every
/// weight is zero. The parts always sum to `total`.
fn distribute(total: usize, weights: &[usize]) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }

    let sum: usize = weights.iter().sum();
    let mut parts: Vec<usize> = if sum == 0 {
        vec![total / n; n]
    } else {
        weights
            .iter()
            .map(|&w| ((w as u128 * total as u128) / sum as u128) as usize)
            .collect()
    };

    let assigned: usize = parts.iter().sum();
    for part in parts.iter_mut().take(total - assigned) {
        *part += 1;
    }
    parts
}

impl std::fmt::Debug for SizeClassRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeClassRouter")
            .field("size_classes", &self.size_classes())
            .field("stats", &self.stats())
            .finish()
    }
}
