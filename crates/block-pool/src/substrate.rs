// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The raw allocation primitive underneath every pool.
//!
//! Pools never call the global allocator directly. They ask a
//! [`Substrate`] for zeroed memory on a miss and hand memory back to it
//! when a block is dropped from circulation (retention overflow, shrink,
//! reclaim, teardown).

use crate::PoolError;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Source of zeroed byte regions.
pub trait Substrate: Send + Sync + fmt::Debug {
    /// Returns a zeroed region of exactly `size` bytes.
    fn allocate(&self, size: usize) -> Result<Box<[u8]>, PoolError>;

    /// Takes back a region previously produced by [`allocate`](Self::allocate).
    fn free(&self, bytes: Box<[u8]>) {
        drop(bytes);
    }
}

/// The global allocator, with allocation failure reported as an error
/// rather than an abort.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSubstrate;

impl Substrate for SystemSubstrate {
    fn allocate(&self, size: usize) -> Result<Box<[u8]>, PoolError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|e| PoolError::AllocationFailure {
                size,
                reason: e.to_string(),
            })?;
        bytes.resize(size, 0);
        Ok(bytes.into_boxed_slice())
    }
}

/// A substrate that counts traffic and can cap the number of live regions.
///
/// Useful for diagnostics and for exercising allocation-failure paths:
/// once `limit` regions are outstanding, further allocations fail.
#[derive(Debug, Default)]
pub struct TrackingSubstrate {
    limit: Option<usize>,
    live: AtomicUsize,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl TrackingSubstrate {
    /// Creates an unlimited tracking substrate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a substrate that fails once `limit` regions are live.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Regions currently handed out and not yet freed.
    ///
    /// A block whose handle is dropped without release is freed by the
    /// global allocator and never reaches [`Substrate::free`], so it stays
    /// counted here. Its pool keeps it checked out as well, which keeps
    /// `live()` equal to the pools' resident blocks.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Total successful allocations.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Acquire)
    }

    /// Total regions returned.
    pub fn frees(&self) -> u64 {
        self.frees.load(Ordering::Acquire)
    }
}

impl Substrate for TrackingSubstrate {
    fn allocate(&self, size: usize) -> Result<Box<[u8]>, PoolError> {
        if let Some(limit) = self.limit {
            let reserved = self
                .live
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                    (live < limit).then_some(live + 1)
                });
            if reserved.is_err() {
                return Err(PoolError::AllocationFailure {
                    size,
                    reason: format!("substrate limit of {limit} live blocks reached"),
                });
            }
        } else {
            self.live.fetch_add(1, Ordering::AcqRel);
        }

        match SystemSubstrate.allocate(size) {
            Ok(bytes) => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                Ok(bytes)
            }
            Err(e) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    fn free(&self, bytes: Box<[u8]>) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.frees.fetch_add(1, Ordering::Relaxed);
        drop(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_allocate_zeroed() {
        let bytes = SystemSubstrate.allocate(128).unwrap();
        assert_eq!(bytes.len(), 128);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tracking_counts() {
        let s = TrackingSubstrate::new();
        let a = s.allocate(16).unwrap();
        let b = s.allocate(16).unwrap();
        assert_eq!(s.live(), 2);
        s.free(a);
        assert_eq!(s.live(), 1);
        assert_eq!(s.allocations(), 2);
        assert_eq!(s.frees(), 1);
        s.free(b);
        assert_eq!(s.live(), 0);
    }

    #[test]
    fn test_leaked_block_stays_live() {
        use crate::{BlockPool, CorePool};
        use std::sync::Arc;

        let s = Arc::new(TrackingSubstrate::new());
        let pool = CorePool::new(32, 2, 2, s.clone()).unwrap();
        let kept = pool.acquire(32, "kept").unwrap();
        drop(pool.acquire(32, "leaky").unwrap());

        assert_eq!(s.live(), 2);
        assert_eq!(s.frees(), 0);
        assert_eq!(pool.stats().resident(), s.live());

        pool.release(kept).unwrap();
        assert_eq!(pool.stats().checked_out, 1);
        assert_eq!(pool.stats().resident(), s.live());
    }

    #[test]
    fn test_tracking_limit() {
        let s = TrackingSubstrate::with_limit(1);
        let a = s.allocate(8).unwrap();
        let err = s.allocate(8).unwrap_err();
        assert!(matches!(err, PoolError::AllocationFailure { size: 8, .. }));
        s.free(a);
        assert!(s.allocate(8).is_ok());
    }
}
