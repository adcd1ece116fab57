//! Narrow interfaces to the wallet collaborators.
//!
//! The submitter never needs a full client library, only these few operations.

use crate::types::NormalizedCall;
use async_trait::async_trait;
use ethers::types::{Address, H256};
use serde_json::Value;

/// JSON-RPC method not found.
const METHOD_NOT_FOUND: i64 = -32601;

/// EIP-1193 / EIP-5792 codes meaning "this wallet cannot do that", as opposed to a rejection.
const UNSUPPORTED_CODES: [i64; 6] = [METHOD_NOT_FOUND, 4200, 5700, 5710, 5750, 5760];

/// A failure reported by a collaborator, with the JSON-RPC code when one is available.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RpcFailure {
    pub code: Option<i64>,
    pub message: String,
}

impl RpcFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Whether the failure means the method or feature is unavailable.
    pub fn is_unsupported(&self) -> bool {
        if let Some(code) = self.code {
            if UNSUPPORTED_CODES.contains(&code) {
                return true;
            }
        }
        let msg = self.message.to_lowercase();
        msg.contains("method not found")
            || msg.contains("not supported")
            || msg.contains("does not exist")
            || msg.contains("not available")
    }
}

/// Raw JSON-RPC access plus network lookup.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcFailure>;

    /// `None` when the transport is not connected to a network.
    async fn chain_id(&self) -> Result<Option<u64>, RpcFailure>;
}

/// An account able to send transactions one at a time.
#[async_trait]
pub trait CallSigner: Send + Sync {
    type Transport: RpcTransport;

    fn transport(&self) -> &Self::Transport;

    async fn address(&self) -> Result<Address, RpcFailure>;

    /// Sends one transaction and returns its hash without waiting for inclusion.
    async fn send_transaction(&self, call: &NormalizedCall) -> Result<H256, RpcFailure>;

    /// Blocks until the transaction is mined. Fails if it was dropped or reverted.
    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<(), RpcFailure>;
}
