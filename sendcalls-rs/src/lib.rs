//! Batched contract-call submission for Circles subscriptions.
//!
//! A batch is first offered to the wallet as one EIP-5792 `wallet_sendCalls` request. If the wallet
//! cannot take it, and the request allows it, the calls are sent one by one with
//! `eth_sendTransaction` and a bundle id is synthesized from the resulting hashes.

pub mod bundle;
pub mod calls;
pub mod encoder;
pub mod encoding;
pub mod error;
pub mod ethers_signer;
pub mod signer;
pub mod submitter;
pub mod types;

#[cfg(test)]
mod testing;

pub use bundle::{BundleId, FallbackBundle};
pub use encoder::{normalize, EncodingError};
pub use error::{BatchError, BatchErrorKind};
pub use ethers_signer::EthersSigner;
pub use signer::{CallSigner, RpcFailure, RpcTransport};
pub use submitter::{fallback_decision, AtomicOutcome, BatchSubmitter};
pub use types::{
    Amount, BatchRequest, BatchResult, CallDescription, Capabilities, Capability, NormalizedCall,
};
