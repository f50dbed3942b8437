// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Blocks and the move-only handles that carry them to callers.
//!
//! A [`BlockHandle`] is the only way a caller can hold a block. It cannot
//! be cloned, so a block checked out from a pool has exactly one holder.
//! Handing it back is explicit: pass the handle to
//! [`BlockPool::release`](crate::BlockPool::release). A handle that is
//! dropped instead is a leak; its drop logs a warning and the owning pool
//! keeps the block recorded as checked out.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of block ids. Ids are unique for the life of the process, so a
/// handle from one pool is always foreign to every other pool.
static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct BlockId(u64);

impl BlockId {
    pub(crate) fn next() -> Self {
        Self(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The unit of reuse: a fixed-length byte region plus its bookkeeping.
pub(crate) struct Block {
    pub(crate) id: BlockId,
    pub(crate) size_class: usize,
    pub(crate) bytes: Box<[u8]>,
}

impl Block {
    /// Wraps freshly allocated substrate memory under a new id.
    pub(crate) fn new(size_class: usize, bytes: Box<[u8]>) -> Self {
        Self {
            id: BlockId::next(),
            size_class,
            bytes,
        }
    }

    /// Clears the contents so the next holder never sees a prior holder's data.
    pub(crate) fn zero(&mut self) {
        self.bytes.fill(0);
    }
}

/// How an acquisition was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquireOrigin {
    /// Reused a block from the free list.
    Hit,
    /// Allocated a fresh block from the substrate.
    Miss,
}

/// Bookkeeping recorded by a pool for every checked-out block.
#[derive(Debug, Clone)]
pub struct CheckoutInfo {
    /// Label the caller passed to `acquire`.
    pub source_label: String,
    /// When the block was handed out.
    pub acquired_at: Instant,
}

/// An owning handle to a checked-out block.
///
/// # Example
/// ```
/// use block_pool::{BlockPool, CorePool};
///
/// let pool = CorePool::with_system_substrate(1024, 2, 2).unwrap();
/// let mut handle = pool.acquire(1024, "frames").unwrap();
/// handle.as_mut_slice()[0] = 7;
/// pool.release(handle).unwrap();
/// // handle.as_slice();   // compile error: moved into `release`
/// ```
pub struct BlockHandle {
    /// `None` only after the block has been taken back by its pool.
    block: Option<Block>,
    origin: AcquireOrigin,
    acquired_at: Instant,
}

impl BlockHandle {
    pub(crate) fn new(block: Block, origin: AcquireOrigin, acquired_at: Instant) -> Self {
        Self {
            block: Some(block),
            origin,
            acquired_at,
        }
    }

    /// Hands the block back to the pool that is releasing it.
    pub(crate) fn into_block(mut self) -> Option<Block> {
        self.block.take()
    }

    /// Returns the block's identity.
    pub fn id(&self) -> BlockId {
        self.block.as_ref().map(|b| b.id).unwrap_or(BlockId(0))
    }

    /// Returns the size class the block belongs to.
    pub fn size_class(&self) -> usize {
        self.block.as_ref().map(|b| b.size_class).unwrap_or(0)
    }

    /// Returns the block length in bytes (always equal to the size class).
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Returns `true` if the block holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an immutable view of the block's bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.block.as_ref().map(|b| &b.bytes[..]).unwrap_or(&[])
    }

    /// Returns a mutable view of the block's bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.block.as_mut() {
            Some(b) => &mut b.bytes[..],
            None => &mut [],
        }
    }

    /// Whether the acquisition reused a free block or allocated a fresh one.
    pub fn origin(&self) -> AcquireOrigin {
        self.origin
    }

    /// When the block was checked out.
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// How long the block has been held so far.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl AsRef<[u8]> for BlockHandle {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for BlockHandle {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

/// A handle dropped without release frees its bytes through the global
/// allocator, bypassing the pool's [`Substrate`](crate::Substrate). The pool
/// still counts the block as checked out.
impl Drop for BlockHandle {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            tracing::warn!(
                "block {} ({} bytes) dropped without release; it stays checked out in its pool",
                block.id,
                block.size_class,
            );
        }
    }
}

impl fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHandle")
            .field("id", &self.id())
            .field("size_class", &self.size_class())
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(size: usize) -> BlockHandle {
        let block = Block::new(size, vec![0u8; size].into_boxed_slice());
        BlockHandle::new(block, AcquireOrigin::Miss, Instant::now())
    }

    #[test]
    fn test_ids_are_unique() {
        let a = BlockId::next();
        let b = BlockId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_handle_accessors() {
        let mut h = handle(64);
        assert_eq!(h.len(), 64);
        assert_eq!(h.size_class(), 64);
        assert_eq!(h.origin(), AcquireOrigin::Miss);
        h.as_mut_slice()[3] = 9;
        assert_eq!(h.as_slice()[3], 9);
        assert_eq!(h.as_ref()[3], 9);
        let _ = h.into_block();
    }

    #[test]
    fn test_into_block_keeps_identity() {
        let h = handle(16);
        let id = h.id();
        let block = h.into_block().unwrap();
        assert_eq!(block.id, id);
        assert_eq!(block.size_class, 16);
    }

    #[test]
    fn test_zero_clears_bytes() {
        let mut block = Block::new(8, vec![0xAB; 8].into_boxed_slice());
        block.zero();
        assert!(block.bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_display_id() {
        let id = BlockId(42);
        assert_eq!(id.to_string(), "#42");
        assert_eq!(id.as_u64(), 42);
    }

    #[test]
    fn test_debug_format() {
        let h = handle(32);
        let debug = format!("{h:?}");
        assert!(debug.contains("BlockHandle"));
        assert!(debug.contains("size_class"));
        let _ = h.into_block();
    }
}
