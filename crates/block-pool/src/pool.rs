// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`BlockPool`] trait and the single-size-class [`CorePool`].
//!
//! Every layer of the stack (router, budget enforcer, monitor) implements
//! [`BlockPool`], so any subset of layers composes over any other.
//!
//! # Ownership
//! A [`CorePool`] keeps two sets behind one mutex:
//!
//! ```text
//!   free: Vec<Block>            checked_out: HashMap<BlockId, CheckoutInfo>
//!        │   acquire()                 ▲
//!        └────────────────────────────-┘   (block moves into a BlockHandle)
//!        ▲   release()                 │
//!        └─────────────────────────────┘   (zeroed, or freed past capacity)
//! ```
//!
//! Both transitions happen under the lock, so a block is never in both sets
//! and two callers never receive the same block.
//!
//! # Capacity
//! `capacity` is the retention ceiling of the free list. Checkouts are not
//! bounded here; a hard ceiling on resident blocks is the job of the
//! [`BudgetEnforcer`](crate::BudgetEnforcer).

use crate::block::{Block, CheckoutInfo};
use crate::{
    AcquireOrigin, BlockHandle, BlockId, PoolError, PoolStats, SourceUsage, Substrate,
    SystemSubstrate,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// The call contract shared by every pool layer.
pub trait BlockPool: Send + Sync {
    /// Checks out a block suitable for `size_hint` bytes on behalf of
    /// `source_label`.
    fn acquire(&self, size_hint: usize, source_label: &str) -> Result<BlockHandle, PoolError>;

    /// Returns a block to the pool it was checked out from.
    fn release(&self, handle: BlockHandle) -> Result<(), PoolError>;

    /// Read-only snapshot of the pool's counters.
    fn stats(&self) -> PoolStats;

    /// Free blocks that could serve `size_hint` without touching the substrate.
    fn free_for(&self, size_hint: usize) -> usize;

    /// Moves the retention ceiling to `new_capacity` and returns the
    /// capacity actually applied. Growing pre-allocates free blocks,
    /// shrinking drops free blocks; checked-out blocks are never touched.
    fn resize(&self, new_capacity: usize) -> usize;

    /// Drops free blocks down to `retain_minimum`; returns how many were
    /// dropped.
    fn reclaim_idle(&self, retain_minimum: usize) -> usize;

    /// Per-source acquisition accounting.
    fn source_usage(&self) -> BTreeMap<String, SourceUsage>;
}

impl<P: BlockPool + ?Sized> BlockPool for Arc<P> {
    fn acquire(&self, size_hint: usize, source_label: &str) -> Result<BlockHandle, PoolError> {
        (**self).acquire(size_hint, source_label)
    }

    fn release(&self, handle: BlockHandle) -> Result<(), PoolError> {
        (**self).release(handle)
    }

    fn stats(&self) -> PoolStats {
        (**self).stats()
    }

    fn free_for(&self, size_hint: usize) -> usize {
        (**self).free_for(size_hint)
    }

    fn resize(&self, new_capacity: usize) -> usize {
        (**self).resize(new_capacity)
    }

    fn reclaim_idle(&self, retain_minimum: usize) -> usize {
        (**self).reclaim_idle(retain_minimum)
    }

    fn source_usage(&self) -> BTreeMap<String, SourceUsage> {
        (**self).source_usage()
    }
}

impl<P: BlockPool + ?Sized> BlockPool for Box<P> {
    fn acquire(&self, size_hint: usize, source_label: &str) -> Result<BlockHandle, PoolError> {
        (**self).acquire(size_hint, source_label)
    }

    fn release(&self, handle: BlockHandle) -> Result<(), PoolError> {
        (**self).release(handle)
    }

    fn stats(&self) -> PoolStats {
        (**self).stats()
    }

    fn free_for(&self, size_hint: usize) -> usize {
        (**self).free_for(size_hint)
    }

    fn resize(&self, new_capacity: usize) -> usize {
        (**self).resize(new_capacity)
    }

    fn reclaim_idle(&self, retain_minimum: usize) -> usize {
        (**self).reclaim_idle(retain_minimum)
    }

    fn source_usage(&self) -> BTreeMap<String, SourceUsage> {
        (**self).source_usage()
    }
}

/// Locks a pool mutex. Critical sections never panic halfway through a
/// mutation, so a poisoned lock still guards consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutable state of a [`CorePool`], guarded by a single mutex.
struct PoolState {
    capacity: usize,
    free: Vec<Block>,
    checked_out: HashMap<BlockId, CheckoutInfo>,
    acquisitions: u64,
    releases: u64,
    hits: u64,
    misses: u64,
    sources: HashMap<String, SourceUsage>,
}

/// A free list of blocks of one size class.
///
/// # Example
/// ```
/// use block_pool::{BlockPool, CorePool};
///
/// let pool = CorePool::with_system_substrate(1024, 4, 4).unwrap();
/// let handle = pool.acquire(1024, "socket-rx").unwrap();
/// assert_eq!(handle.len(), 1024);
/// assert_eq!(pool.stats().checked_out, 1);
///
/// pool.release(handle).unwrap();
/// assert_eq!(pool.stats().free, 4);
/// ```
pub struct CorePool {
    size_class: usize,
    state: Mutex<PoolState>,
    substrate: Arc<dyn Substrate>,
}

impl CorePool {
    /// Creates a pool of `size_class`-byte blocks, pre-populated with
    /// `initial_count` free blocks (clamped to `capacity`).
    pub fn new(
        size_class: usize,
        initial_count: usize,
        capacity: usize,
        substrate: Arc<dyn Substrate>,
    ) -> Result<Self, PoolError> {
        if size_class == 0 {
            return Err(PoolError::InvalidConfig(
                "size class must be at least one byte".to_string(),
            ));
        }
        if initial_count > capacity {
            tracing::warn!(
                "initial count {initial_count} exceeds capacity {capacity} for {size_class}-byte pool; clamping"
            );
        }

        let prefill = initial_count.min(capacity);
        let mut free = Vec::with_capacity(prefill);
        for _ in 0..prefill {
            match substrate.allocate(size_class) {
                Ok(bytes) => free.push(Block::new(size_class, bytes)),
                Err(e) => {
                    for block in free {
                        substrate.free(block.bytes);
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!("created {size_class}-byte pool: {prefill} free, capacity {capacity}");

        Ok(Self {
            size_class,
            state: Mutex::new(PoolState {
                capacity,
                free,
                checked_out: HashMap::new(),
                acquisitions: 0,
                releases: 0,
                hits: 0,
                misses: 0,
                sources: HashMap::new(),
            }),
            substrate,
        })
    }

    /// Creates a pool backed by the global allocator.
    pub fn with_system_substrate(
        size_class: usize,
        initial_count: usize,
        capacity: usize,
    ) -> Result<Self, PoolError> {
        Self::new(size_class, initial_count, capacity, Arc::new(SystemSubstrate))
    }

    /// Returns the block size this pool serves.
    pub fn size_class(&self) -> usize {
        self.size_class
    }

    /// Ids of the blocks in the free list.
    pub fn free_ids(&self) -> Vec<BlockId> {
        lock(&self.state).free.iter().map(|b| b.id).collect()
    }

    /// Ids of the blocks currently checked out.
    pub fn checked_out_ids(&self) -> Vec<BlockId> {
        lock(&self.state).checked_out.keys().copied().collect()
    }

    /// Checkout record for a block, if it is checked out from this pool.
    pub fn checkout_info(&self, id: BlockId) -> Option<CheckoutInfo> {
        lock(&self.state).checked_out.get(&id).cloned()
    }
}

impl BlockPool for CorePool {
    /// Pops a free block (hit) or allocates a fresh one (miss). The size
    /// hint is not consulted: every block here is `size_class` bytes.
    fn acquire(&self, _size_hint: usize, source_label: &str) -> Result<BlockHandle, PoolError> {
        let mut state = lock(&self.state);

        let (block, origin) = match state.free.pop() {
            Some(block) => (block, AcquireOrigin::Hit),
            None => {
                let bytes = self.substrate.allocate(self.size_class)?;
                tracing::debug!(
                    "{}-byte pool miss: allocated fresh block for '{source_label}'",
                    self.size_class,
                );
                (Block::new(self.size_class, bytes), AcquireOrigin::Miss)
            }
        };

        let acquired_at = Instant::now();
        state.checked_out.insert(
            block.id,
            CheckoutInfo {
                source_label: source_label.to_owned(),
                acquired_at,
            },
        );
        state.acquisitions += 1;
        match origin {
            AcquireOrigin::Hit => state.hits += 1,
            AcquireOrigin::Miss => state.misses += 1,
        }
        let usage = state.sources.entry(source_label.to_owned()).or_default();
        usage.acquired += 1;
        usage.outstanding += 1;

        Ok(BlockHandle::new(block, origin, acquired_at))
    }

    /// Zeroes the block and puts it back on the free list, or returns it to
    /// the substrate when the free list is already at capacity.
    fn release(&self, handle: BlockHandle) -> Result<(), PoolError> {
        let id = handle.id();
        let mut state = lock(&self.state);

        let Some(info) = state.checked_out.remove(&id) else {
            drop(state);
            tracing::warn!(
                "{}-byte pool rejected release of block {id}: not checked out here",
                self.size_class,
            );
            return Err(PoolError::UnknownBlock { id });
        };
        let Some(mut block) = handle.into_block() else {
            state.checked_out.insert(id, info);
            return Err(PoolError::UnknownBlock { id });
        };

        let held = info.acquired_at.elapsed();
        state.releases += 1;
        if let Some(usage) = state.sources.get_mut(&info.source_label) {
            usage.released += 1;
            usage.outstanding = usage.outstanding.saturating_sub(1);
            usage.total_hold += held;
        }

        block.zero();
        if state.free.len() >= state.capacity {
            drop(state);
            tracing::debug!(
                "{}-byte pool at retention ceiling: returning block {id} to substrate",
                self.size_class,
            );
            self.substrate.free(block.bytes);
        } else {
            state.free.push(block);
        }
        Ok(())
    }

    fn stats(&self) -> PoolStats {
        let state = lock(&self.state);
        PoolStats {
            capacity: state.capacity,
            free: state.free.len(),
            checked_out: state.checked_out.len(),
            acquisitions: state.acquisitions,
            releases: state.releases,
            hits: state.hits,
            misses: state.misses,
        }
    }

    fn free_for(&self, _size_hint: usize) -> usize {
        lock(&self.state).free.len()
    }

    fn resize(&self, new_capacity: usize) -> usize {
        let mut state = lock(&self.state);
        let current = state.capacity;

        if new_capacity > current {
            let mut added = 0;
            for _ in current..new_capacity {
                match self.substrate.allocate(self.size_class) {
                    Ok(bytes) => {
                        state.free.push(Block::new(self.size_class, bytes));
                        added += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "{}-byte pool grew by {added} of {} blocks: {e}",
                            self.size_class,
                            new_capacity - current,
                        );
                        break;
                    }
                }
            }
            state.capacity = current + added;
            state.capacity
        } else if new_capacity < current {
            let excess = (current - new_capacity).min(state.free.len());
            let keep = state.free.len() - excess;
            let dropped: Vec<Block> = state.free.drain(keep..).collect();
            state.capacity = new_capacity;
            drop(state);
            for block in dropped {
                self.substrate.free(block.bytes);
            }
            new_capacity
        } else {
            current
        }
    }

    fn reclaim_idle(&self, retain_minimum: usize) -> usize {
        let mut state = lock(&self.state);
        if state.free.len() <= retain_minimum {
            return 0;
        }
        let reclaimed = state.free.split_off(retain_minimum);
        drop(state);

        let count = reclaimed.len();
        for block in reclaimed {
            self.substrate.free(block.bytes);
        }
        tracing::debug!("{}-byte pool reclaimed {count} idle blocks", self.size_class);
        count
    }

    fn source_usage(&self) -> BTreeMap<String, SourceUsage> {
        lock(&self.state)
            .sources
            .iter()
            .map(|(label, usage)| (label.clone(), usage.clone()))
            .collect()
    }
}

impl Drop for CorePool {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for block in state.free.drain(..) {
            self.substrate.free(block.bytes);
        }
        if !state.checked_out.is_empty() {
            tracing::warn!(
                "{}-byte pool torn down with {} blocks still checked out",
                self.size_class,
                state.checked_out.len(),
            );
        }
    }
}

impl std::fmt::Debug for CorePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CorePool")
            .field("size_class", &self.size_class)
            .field("capacity", &stats.capacity)
            .field("free", &stats.free)
            .field("checked_out", &stats.checked_out)
            .finish()
    }
}
