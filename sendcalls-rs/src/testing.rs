//! Scriptable in-memory signer used by the submitter tests.

use crate::signer::{CallSigner, RpcFailure, RpcTransport};
use crate::types::NormalizedCall;
use async_trait::async_trait;
use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use serde_json::Value;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Request { method: String, params: Value },
    Send(NormalizedCall),
    Confirm(H256),
}

pub struct MockSigner {
    pub address: Address,
    pub chain_id: Option<u64>,
    pub atomic_response: Result<Value, RpcFailure>,
    /// Index of the fallback send that fails.
    pub fail_send_at: Option<usize>,
    /// Index of the fallback confirmation that fails.
    pub fail_confirm_at: Option<usize>,
    events: Mutex<Vec<Event>>,
}

impl MockSigner {
    /// Wallet without `wallet_sendCalls` on chain 100.
    pub fn new() -> Self {
        Self {
            address: Address::repeat_byte(0x5a),
            chain_id: Some(100),
            atomic_response: Err(RpcFailure::with_code(-32601, "Method not found")),
            fail_send_at: None,
            fail_confirm_at: None,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn with_atomic_response(mut self, response: Result<Value, RpcFailure>) -> Self {
        self.atomic_response = response;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<NormalizedCall> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Send(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Request { method, params } => Some((method, params)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn count_sends(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Send(_)))
            .count()
    }

    fn count_confirms(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Confirm(_)))
            .count()
    }
}

#[async_trait]
impl RpcTransport for MockSigner {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        self.record(Event::Request {
            method: method.to_string(),
            params,
        });
        match method {
            "wallet_sendCalls" | "wallet_getCapabilities" => self.atomic_response.clone(),
            other => Err(RpcFailure::with_code(-32601, format!("{other} not mocked"))),
        }
    }

    async fn chain_id(&self) -> Result<Option<u64>, RpcFailure> {
        Ok(self.chain_id)
    }
}

#[async_trait]
impl CallSigner for MockSigner {
    type Transport = Self;

    fn transport(&self) -> &Self::Transport {
        self
    }

    async fn address(&self) -> Result<Address, RpcFailure> {
        Ok(self.address)
    }

    async fn send_transaction(&self, call: &NormalizedCall) -> Result<H256, RpcFailure> {
        let nonce = self.count_sends();
        self.record(Event::Send(call.clone()));
        if self.fail_send_at == Some(nonce) {
            return Err(RpcFailure::new("insufficient funds for gas * price + value"));
        }

        // Deterministic per (account, nonce, call).
        let mut preimage = Vec::new();
        preimage.extend_from_slice(self.address.as_bytes());
        preimage.extend_from_slice(&(nonce as u64).to_be_bytes());
        preimage.extend_from_slice(call.to.as_bytes());
        if let Some(data) = call.data.as_ref() {
            preimage.extend_from_slice(data);
        }
        Ok(H256::from(keccak256(preimage)))
    }

    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<(), RpcFailure> {
        let index = self.count_confirms();
        self.record(Event::Confirm(tx_hash));
        if self.fail_confirm_at == Some(index) {
            return Err(RpcFailure::new("transaction reverted"));
        }
        Ok(())
    }
}
