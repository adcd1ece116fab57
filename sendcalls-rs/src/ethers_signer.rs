use crate::encoding::fmt_h256;
use crate::signer::{CallSigner, RpcFailure, RpcTransport};
use crate::types::NormalizedCall;
use async_trait::async_trait;
use ethers::providers::{Middleware, MiddlewareError, PendingTransaction, ProviderError, RpcError};
use ethers::types::{Address, TransactionRequest, H256, U256, U64};
use serde_json::Value;
use std::sync::Arc;

/// [`CallSigner`] backed by an ethers middleware stack
/// (typically `SignerMiddleware<Provider<Http>, LocalWallet>`).
#[derive(Debug)]
pub struct EthersSigner<M> {
    client: Arc<M>,
    from: Option<Address>,
}

impl<M> Clone for EthersSigner<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            from: self.from,
        }
    }
}

impl<M: Middleware> EthersSigner<M> {
    /// Uses the middleware's default sender as the account.
    pub fn new(client: Arc<M>) -> Self {
        Self { client, from: None }
    }

    /// Overrides the sending account.
    ///
    /// With `SignerMiddleware`, only the wallet's own address is signed locally. Any other `from`
    /// is forwarded as `eth_sendTransaction` to the inner provider, which must control it.
    pub fn with_address(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

fn middleware_failure<E: MiddlewareError>(err: E) -> RpcFailure {
    match MiddlewareError::as_error_response(&err) {
        Some(resp) => RpcFailure::with_code(resp.code, resp.message.clone()),
        None => RpcFailure::new(err.to_string()),
    }
}

fn provider_failure(err: ProviderError) -> RpcFailure {
    match RpcError::as_error_response(&err) {
        Some(resp) => RpcFailure::with_code(resp.code, resp.message.clone()),
        None => RpcFailure::new(err.to_string()),
    }
}

#[async_trait]
impl<M> RpcTransport for EthersSigner<M>
where
    M: Middleware + 'static,
{
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        self.client
            .provider()
            .request::<Value, Value>(method, params)
            .await
            .map_err(provider_failure)
    }

    async fn chain_id(&self) -> Result<Option<u64>, RpcFailure> {
        let id = self.client.get_chainid().await.map_err(middleware_failure)?;
        if id.is_zero() || id > U256::from(u64::MAX) {
            return Ok(None);
        }
        Ok(Some(id.as_u64()))
    }
}

#[async_trait]
impl<M> CallSigner for EthersSigner<M>
where
    M: Middleware + 'static,
{
    type Transport = Self;

    fn transport(&self) -> &Self::Transport {
        self
    }

    async fn address(&self) -> Result<Address, RpcFailure> {
        self.from
            .or_else(|| self.client.default_sender())
            .ok_or_else(|| RpcFailure::new("signer has no sender address"))
    }

    async fn send_transaction(&self, call: &NormalizedCall) -> Result<H256, RpcFailure> {
        let from = self.address().await?;
        let mut tx = TransactionRequest::new().from(from).to(call.to);
        if let Some(data) = call.data.clone() {
            tx = tx.data(data);
        }
        if let Some(value) = call.value {
            tx = tx.value(value);
        }

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(middleware_failure)?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<(), RpcFailure> {
        let receipt = PendingTransaction::new(tx_hash, self.client.provider())
            .await
            .map_err(provider_failure)?;

        match receipt {
            None => Err(RpcFailure::new(format!(
                "transaction {} dropped from mempool",
                fmt_h256(tx_hash)
            ))),
            Some(r) if r.status == Some(U64::zero()) => Err(RpcFailure::new(format!(
                "transaction {} reverted in block {:?}",
                fmt_h256(tx_hash),
                r.block_number
            ))),
            Some(_) => Ok(()),
        }
    }
}
