// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for block pool management.

use crate::BlockId;

/// Errors returned by pool operations.
///
/// Every error goes back to the immediate caller. None of them leave a pool
/// in a state where it cannot serve further requests.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The substrate could not produce a fresh block.
    #[error("substrate failed to allocate a {size}-byte block: {reason}")]
    AllocationFailure { size: usize, reason: String },

    /// Serving the request would push resident blocks past the budget ceiling.
    #[error("memory budget exceeded: {resident} blocks resident, ceiling is {ceiling}")]
    BudgetExceeded { ceiling: usize, resident: usize },

    /// The handle is not checked out from this pool (double release or
    /// foreign block).
    #[error("block {id} is not checked out from this pool")]
    UnknownBlock { id: BlockId },

    /// A coordinator already has a pool registered under this id.
    #[error("pool id '{0}' is already registered")]
    DuplicateId(String),

    /// Construction-time validation failed.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Returns `true` for errors a caller is expected to back off and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PoolError::BudgetExceeded { .. } | PoolError::AllocationFailure { .. }
        )
    }
}
