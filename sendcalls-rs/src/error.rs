//! Error types for batch submission.

use crate::encoder::EncodingError;
use ethers::types::{Address, H256};

/// Errors returned by [`crate::BatchSubmitter::submit`].
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// A call description could not be turned into call data.
    #[error("failed to encode call {index}: {source}")]
    Encoding {
        index: usize,
        #[source]
        source: EncodingError,
    },

    /// The request cannot be submitted as given.
    #[error("invalid batch request: {0}")]
    Configuration(String),

    /// `wallet_sendCalls` failed and the sequential fallback is disabled.
    #[error("wallet_sendCalls not supported: {0}")]
    UnsupportedOperation(String),

    /// `wallet_sendCalls` failed while mandatory capabilities were requested.
    #[error(
        "non-optional capabilities not supported when falling back to eth_sendTransaction ({}): {reason}",
        .capabilities.join(", ")
    )]
    Capability {
        capabilities: Vec<String>,
        reason: String,
    },

    /// `wallet_sendCalls` failed for a multi-call batch that must execute atomically.
    #[error("atomic execution of {calls} calls cannot be satisfied when falling back to eth_sendTransaction: {reason}")]
    Atomicity { calls: usize, reason: String },

    /// A fallback transaction failed after earlier ones may already be on-chain.
    #[error(
        "transaction {} of {total} failed after {completed} succeeded: {reason}",
        .failed_index + 1
    )]
    PartialBatchFailure {
        /// Calls sent and confirmed before the failing one.
        completed: usize,
        failed_index: usize,
        total: usize,
        to: Address,
        /// Every hash that reached the node, including the failing call if it was sent.
        sent: Vec<H256>,
        reason: String,
    },
}

/// Discriminant of [`BatchError`], for callers that map failures to display text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchErrorKind {
    Encoding,
    Configuration,
    UnsupportedOperation,
    Capability,
    Atomicity,
    PartialBatchFailure,
}

impl BatchError {
    pub fn kind(&self) -> BatchErrorKind {
        match self {
            BatchError::Encoding { .. } => BatchErrorKind::Encoding,
            BatchError::Configuration(_) => BatchErrorKind::Configuration,
            BatchError::UnsupportedOperation(_) => BatchErrorKind::UnsupportedOperation,
            BatchError::Capability { .. } => BatchErrorKind::Capability,
            BatchError::Atomicity { .. } => BatchErrorKind::Atomicity,
            BatchError::PartialBatchFailure { .. } => BatchErrorKind::PartialBatchFailure,
        }
    }

    /// True when some transactions of the batch may already be on-chain.
    pub fn has_onchain_effects(&self) -> bool {
        matches!(self, BatchError::PartialBatchFailure { sent, .. } if !sent.is_empty())
    }
}
