use crate::bundle::{BundleId, FallbackBundle};
use crate::encoder::normalize;
use crate::encoding::{call_to_json, fmt_address, fmt_h256, fmt_u256};
use crate::error::BatchError;
use crate::signer::{CallSigner, RpcFailure, RpcTransport};
use crate::types::{BatchRequest, BatchResult, NormalizedCall};
use ethers::types::{Address, H256, U256};
use serde_json::Value;
use std::time::Duration;

pub const WALLET_SEND_CALLS: &str = "wallet_sendCalls";
pub const WALLET_GET_CAPABILITIES: &str = "wallet_getCapabilities";

/// Result of the `wallet_sendCalls` attempt, consumed by [`fallback_decision`].
#[derive(Clone, Debug, PartialEq)]
pub enum AtomicOutcome {
    Submitted(BatchResult),
    /// The wallet does not offer the method or a requested feature.
    Unsupported(RpcFailure),
    /// Any other failure, including a response of unexpected shape.
    Failed(RpcFailure),
}

/// Submits call batches for one signer: `wallet_sendCalls` first, then (if allowed) one
/// `eth_sendTransaction` per call.
///
/// Holds no state between submissions.
#[derive(Debug, Clone)]
pub struct BatchSubmitter<S> {
    signer: S,
}

impl<S: CallSigner> BatchSubmitter<S> {
    pub fn new(signer: S) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    pub async fn submit(&self, request: BatchRequest) -> Result<BatchResult, BatchError> {
        if request.calls.is_empty() {
            return Err(BatchError::Configuration("batch has no calls".to_string()));
        }

        // Encode everything before touching the network so a bad call leaves no partial state.
        let calls = request
            .calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                normalize(call).map_err(|source| BatchError::Encoding { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (chain_id, account) = self.resolve_context(&request).await?;

        tracing::info!(
            chain_id,
            account = %fmt_address(account),
            calls = calls.len(),
            force_atomic = request.force_atomic,
            fallback = request.fallback,
            "submitting call batch"
        );

        let failure = match self
            .attempt_atomic(&request, chain_id, account, &calls)
            .await
        {
            AtomicOutcome::Submitted(result) => {
                tracing::info!(id = %result.id, "wallet_sendCalls accepted batch");
                return Ok(result);
            }
            AtomicOutcome::Unsupported(failure) => {
                tracing::warn!(outcome = "unsupported", error = %failure, "wallet_sendCalls failed");
                failure
            }
            AtomicOutcome::Failed(failure) => {
                tracing::warn!(outcome = "failed", error = %failure, "wallet_sendCalls failed");
                failure
            }
        };

        fallback_decision(&request, calls.len(), &failure)?;

        tracing::info!(
            calls = calls.len(),
            delay_ms = request.fallback_delay.as_millis() as u64,
            "falling back to individual transactions"
        );
        self.submit_sequential(&calls, chain_id, request.fallback_delay)
            .await
    }

    /// Queries `wallet_getCapabilities`. Any successful response counts as support.
    pub async fn supports_atomic_batches(&self, account: Address) -> bool {
        let params = serde_json::json!([fmt_address(account)]);
        match self
            .signer
            .transport()
            .request(WALLET_GET_CAPABILITIES, params)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "wallet_getCapabilities failed");
                false
            }
        }
    }

    async fn resolve_context(&self, request: &BatchRequest) -> Result<(u64, Address), BatchError> {
        futures::try_join!(self.resolve_chain_id(request), self.resolve_account(request))
    }

    async fn resolve_chain_id(&self, request: &BatchRequest) -> Result<u64, BatchError> {
        let resolved = match request.chain_id {
            Some(id) => Some(id),
            None => self.signer.transport().chain_id().await.map_err(|e| {
                BatchError::Configuration(format!("could not determine chain id: {e}"))
            })?,
        };
        resolved
            .filter(|id| *id != 0)
            .ok_or_else(|| BatchError::Configuration("could not determine chain id".into()))
    }

    async fn resolve_account(&self, request: &BatchRequest) -> Result<Address, BatchError> {
        match request.account {
            Some(account) => Ok(account),
            None => self.signer.address().await.map_err(|e| {
                BatchError::Configuration(format!("could not resolve account address: {e}"))
            }),
        }
    }

    async fn attempt_atomic(
        &self,
        request: &BatchRequest,
        chain_id: u64,
        account: Address,
        calls: &[NormalizedCall],
    ) -> AtomicOutcome {
        let params = send_calls_params(request, chain_id, account, calls);
        tracing::debug!(%params, "wallet_sendCalls");

        match self
            .signer
            .transport()
            .request(WALLET_SEND_CALLS, params)
            .await
        {
            Ok(res) => match parse_send_calls_result(&res) {
                Ok(result) => AtomicOutcome::Submitted(result),
                Err(failure) => AtomicOutcome::Failed(failure),
            },
            Err(failure) if failure.is_unsupported() => AtomicOutcome::Unsupported(failure),
            Err(failure) => AtomicOutcome::Failed(failure),
        }
    }

    async fn submit_sequential(
        &self,
        calls: &[NormalizedCall],
        chain_id: u64,
        delay: Duration,
    ) -> Result<BatchResult, BatchError> {
        let total = calls.len();
        let mut sent = Vec::with_capacity(total);

        for (index, call) in calls.iter().enumerate() {
            tracing::info!(
                index,
                total,
                to = %fmt_address(call.to),
                "sending fallback transaction"
            );

            let tx_hash = self
                .signer
                .send_transaction(call)
                .await
                .map_err(|e| partial_failure(index, total, call, &sent, e))?;
            sent.push(tx_hash);
            tracing::info!(index, tx_hash = %fmt_h256(tx_hash), "fallback transaction sent");

            // The last transaction is reported once sent; earlier ones must be mined first so the
            // next send sees the right nonce and state.
            if index + 1 == total {
                break;
            }

            self.signer
                .wait_for_confirmation(tx_hash)
                .await
                .map_err(|e| partial_failure(index, total, call, &sent, e))?;
            tracing::debug!(index, tx_hash = %fmt_h256(tx_hash), "fallback transaction mined");

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let bundle = FallbackBundle::new(sent, chain_id);
        let id = bundle.id();
        tracing::info!(%id, transactions = total, "all fallback transactions sent");

        Ok(BatchResult {
            id,
            capabilities: None,
            tx_hashes: Some(bundle.tx_hashes),
        })
    }
}

/// Decides whether a failed atomic attempt may continue sequentially.
pub fn fallback_decision(
    request: &BatchRequest,
    call_count: usize,
    failure: &RpcFailure,
) -> Result<(), BatchError> {
    // Sequential execution cannot honour a mandatory capability (e.g. paymaster sponsorship).
    let mandatory = request.mandatory_capabilities();
    if !mandatory.is_empty() {
        return Err(BatchError::Capability {
            capabilities: mandatory,
            reason: failure.to_string(),
        });
    }

    if !request.fallback {
        return Err(BatchError::UnsupportedOperation(failure.to_string()));
    }

    if request.force_atomic && call_count > 1 {
        return Err(BatchError::Atomicity {
            calls: call_count,
            reason: failure.to_string(),
        });
    }

    Ok(())
}

fn send_calls_params(
    request: &BatchRequest,
    chain_id: u64,
    account: Address,
    calls: &[NormalizedCall],
) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("from".to_string(), Value::String(fmt_address(account)));
    obj.insert(
        "chainId".to_string(),
        Value::String(fmt_u256(U256::from(chain_id))),
    );
    obj.insert(
        "calls".to_string(),
        Value::Array(calls.iter().map(call_to_json).collect()),
    );
    if let Some(caps) = request.capabilities.as_ref() {
        obj.insert(
            "capabilities".to_string(),
            serde_json::to_value(caps).unwrap_or(Value::Null),
        );
    }
    obj.insert(
        "atomicRequired".to_string(),
        Value::Bool(request.force_atomic),
    );
    if let Some(id) = request.id.as_ref() {
        obj.insert("id".to_string(), Value::String(id.clone()));
    }
    obj.insert(
        "version".to_string(),
        Value::String(request.version.clone()),
    );
    Value::Array(vec![Value::Object(obj)])
}

fn parse_send_calls_result(res: &Value) -> Result<BatchResult, RpcFailure> {
    // Older wallets return the bundle id as a bare string; EIP-5792 v2 returns
    // `{ id, capabilities? }`. Accept both shapes.
    if let Some(id) = res.as_str().filter(|s| !s.is_empty()) {
        return Ok(BatchResult {
            id: BundleId::new(id),
            capabilities: None,
            tx_hashes: None,
        });
    }

    if let Some(id) = res
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        let capabilities = res.get("capabilities").filter(|v| !v.is_null()).cloned();
        return Ok(BatchResult {
            id: BundleId::new(id),
            capabilities,
            tx_hashes: None,
        });
    }

    Err(RpcFailure::new(format!(
        "unexpected wallet_sendCalls result shape (expected string or {{id: ...}}): {}",
        res
    )))
}

fn partial_failure(
    index: usize,
    total: usize,
    call: &NormalizedCall,
    sent: &[H256],
    err: RpcFailure,
) -> BatchError {
    tracing::error!(
        index,
        total,
        to = %fmt_address(call.to),
        sent = sent.len(),
        error = %err,
        "fallback transaction failed"
    );
    BatchError::PartialBatchFailure {
        completed: index,
        failed_index: index,
        total,
        to: call.to,
        sent: sent.to_vec(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchErrorKind;
    use crate::testing::{Event, MockSigner};
    use crate::types::{Capabilities, Capability, CallDescription};
    use ethers::abi::parse_abi;
    use serde_json::json;

    const BUNDLE: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn call(n: u8) -> CallDescription {
        CallDescription::raw(Address::repeat_byte(n), vec![n, n, n, n])
    }

    fn request(n: u8) -> BatchRequest {
        BatchRequest::new((1..=n).map(call).collect()).fallback_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn atomic_string_response_is_bundle_id() {
        let submitter =
            BatchSubmitter::new(MockSigner::new().with_atomic_response(Ok(json!(BUNDLE))));
        let res = submitter.submit(request(2)).await.unwrap();

        assert_eq!(res.id.as_str(), BUNDLE);
        assert!(res.tx_hashes.is_none());
        assert!(!res.id.is_fallback());
        assert!(submitter.signer().sends().is_empty());
    }

    #[tokio::test]
    async fn atomic_params_follow_wallet_send_calls_shape() {
        let submitter =
            BatchSubmitter::new(MockSigner::new().with_atomic_response(Ok(json!(BUNDLE))));
        submitter
            .submit(request(1).with_value_on_first(16))
            .await
            .unwrap();

        let requests = submitter.signer().requests();
        assert_eq!(requests.len(), 1);
        let (method, params) = &requests[0];
        assert_eq!(method, WALLET_SEND_CALLS);
        assert_eq!(
            params,
            &json!([{
                "from": format!("0x{}", "5a".repeat(20)),
                "chainId": "0x64",
                "calls": [{
                    "to": format!("0x{}", "01".repeat(20)),
                    "data": "0x01010101",
                    "value": "0x10",
                }],
                "atomicRequired": false,
                "version": "2.0.0",
            }])
        );
    }

    #[tokio::test]
    async fn atomic_params_carry_capabilities_and_id() {
        let submitter =
            BatchSubmitter::new(MockSigner::new().with_atomic_response(Ok(json!(BUNDLE))));
        let req = request(1)
            .on_chain(8453)
            .force_atomic(true)
            .with_id("my-bundle")
            .with_capability(
                "paymasterService",
                Capability::required().with_param("url", json!("https://pm")),
            );
        submitter.submit(req).await.unwrap();

        let (_, params) = &submitter.signer().requests()[0];
        let p = &params[0];
        assert_eq!(p["chainId"], "0x2105");
        assert_eq!(p["atomicRequired"], true);
        assert_eq!(p["id"], "my-bundle");
        assert_eq!(
            p["capabilities"],
            json!({ "paymasterService": { "optional": false, "url": "https://pm" } })
        );
    }

    #[tokio::test]
    async fn atomic_structured_response_echoes_capabilities() {
        let response = json!({ "id": BUNDLE, "capabilities": { "paymasterService": { "sponsored": true } } });
        let submitter = BatchSubmitter::new(MockSigner::new().with_atomic_response(Ok(response)));
        let res = submitter.submit(request(2)).await.unwrap();

        assert_eq!(res.id.as_str(), BUNDLE);
        assert_eq!(
            res.capabilities,
            Some(json!({ "paymasterService": { "sponsored": true } }))
        );
    }

    #[tokio::test]
    async fn malformed_atomic_response_falls_back() {
        let submitter =
            BatchSubmitter::new(MockSigner::new().with_atomic_response(Ok(json!({ "foo": 1 }))));
        let res = submitter.submit(request(1)).await.unwrap();
        assert!(res.id.is_fallback());
        assert_eq!(submitter.signer().sends().len(), 1);
    }

    #[tokio::test]
    async fn single_call_fallback_sends_once() {
        let submitter = BatchSubmitter::new(MockSigner::new());
        let res = submitter.submit(request(1)).await.unwrap();

        assert_eq!(submitter.signer().sends().len(), 1);
        assert_eq!(res.tx_hashes.as_ref().map(Vec::len), Some(1));
        assert!(res.id.is_fallback());
        // the last (only) transaction is not awaited
        assert!(!submitter
            .signer()
            .events()
            .iter()
            .any(|e| matches!(e, Event::Confirm(_))));
    }

    #[tokio::test]
    async fn fallback_confirms_all_but_last_in_order() {
        let submitter = BatchSubmitter::new(MockSigner::new());
        let res = submitter.submit(request(3)).await.unwrap();
        let hashes = res.tx_hashes.clone().unwrap();

        let order: Vec<String> = submitter
            .signer()
            .events()
            .into_iter()
            .map(|e| match e {
                Event::Request { method, .. } => method,
                Event::Send(call) => format!("send:{}", call.to.as_bytes()[0]),
                Event::Confirm(h) => {
                    format!("confirm:{}", hashes.iter().position(|x| *x == h).unwrap())
                }
            })
            .collect();
        assert_eq!(
            order,
            vec![
                "wallet_sendCalls",
                "send:1",
                "confirm:0",
                "send:2",
                "confirm:1",
                "send:3",
            ]
        );

        let decoded = FallbackBundle::decode(res.id.as_str()).unwrap();
        assert_eq!(decoded.tx_hashes, hashes);
        assert_eq!(decoded.chain_id, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_delay_runs_between_calls_only() {
        let delay = Duration::from_secs(5);

        let submitter = BatchSubmitter::new(MockSigner::new());
        let started = tokio::time::Instant::now();
        let res = submitter
            .submit(request(3).fallback_delay(delay))
            .await
            .unwrap();
        // two gaps for three calls, none after the last
        assert_eq!(started.elapsed(), delay * 2);
        assert_eq!(res.tx_hashes.map(|h| h.len()), Some(3));

        let submitter = BatchSubmitter::new(MockSigner::new());
        let started = tokio::time::Instant::now();
        submitter
            .submit(request(1).fallback_delay(delay))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn second_send_failure_reports_partial_batch() {
        let mut signer = MockSigner::new();
        signer.fail_send_at = Some(1);
        let submitter = BatchSubmitter::new(signer);

        let err = submitter.submit(request(3)).await.unwrap_err();
        match &err {
            BatchError::PartialBatchFailure {
                completed,
                failed_index,
                total,
                to,
                sent,
                ..
            } => {
                assert_eq!(*completed, 1);
                assert_eq!(*failed_index, 1);
                assert_eq!(*total, 3);
                assert_eq!(*to, Address::repeat_byte(2));
                assert_eq!(sent.len(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.has_onchain_effects());
        // no third send
        assert_eq!(submitter.signer().sends().len(), 2);
    }

    #[tokio::test]
    async fn confirmation_failure_stops_the_loop() {
        let mut signer = MockSigner::new();
        signer.fail_confirm_at = Some(0);
        let submitter = BatchSubmitter::new(signer);

        let err = submitter.submit(request(2)).await.unwrap_err();
        match err {
            BatchError::PartialBatchFailure {
                completed,
                failed_index,
                sent,
                ..
            } => {
                assert_eq!(completed, 0);
                assert_eq!(failed_index, 0);
                // the reverted transaction did reach the chain
                assert_eq!(sent.len(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(submitter.signer().sends().len(), 1);
    }

    #[tokio::test]
    async fn force_atomic_multi_call_never_falls_back() {
        let submitter = BatchSubmitter::new(MockSigner::new());
        let err = submitter
            .submit(request(2).force_atomic(true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BatchErrorKind::Atomicity);
        assert!(submitter.signer().sends().is_empty());
    }

    #[tokio::test]
    async fn force_atomic_single_call_may_fall_back() {
        let submitter = BatchSubmitter::new(MockSigner::new());
        let res = submitter
            .submit(request(1).force_atomic(true))
            .await
            .unwrap();
        assert_eq!(res.tx_hashes.map(|h| h.len()), Some(1));
    }

    #[tokio::test]
    async fn mandatory_capability_blocks_fallback_either_way() {
        for fallback in [true, false] {
            let submitter = BatchSubmitter::new(MockSigner::new());
            let req = request(1)
                .fallback(fallback)
                .with_capability("foo", Capability::required());
            let err = submitter.submit(req).await.unwrap_err();
            assert_eq!(err.kind(), BatchErrorKind::Capability, "fallback={fallback}");
            assert!(submitter.signer().sends().is_empty());
        }
    }

    #[tokio::test]
    async fn optional_or_empty_capabilities_allow_fallback() {
        let submitter = BatchSubmitter::new(MockSigner::new());
        let req = request(2).with_capability("auxiliaryFunds", Capability::optional());
        assert!(submitter.submit(req).await.is_ok());

        let submitter = BatchSubmitter::new(MockSigner::new());
        let req = request(2).with_capabilities(Capabilities::new());
        assert!(submitter.submit(req).await.is_ok());
    }

    #[tokio::test]
    async fn disabled_fallback_is_unsupported_operation() {
        let submitter = BatchSubmitter::new(MockSigner::new());
        let err = submitter
            .submit(request(2).fallback(false))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BatchErrorKind::UnsupportedOperation);
        assert!(err.to_string().contains("Method not found"));
        assert!(submitter.signer().sends().is_empty());
    }

    #[tokio::test]
    async fn rejected_atomic_attempt_still_follows_fallback_rules() {
        let signer = MockSigner::new()
            .with_atomic_response(Err(RpcFailure::with_code(4001, "User rejected the request")));
        let submitter = BatchSubmitter::new(signer);
        let err = submitter
            .submit(request(1).fallback(false))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::UnsupportedOperation(ref m) if m.contains("User rejected")));
    }

    #[tokio::test]
    async fn fallback_ids_are_deterministic_and_distinct_from_atomic_ids() {
        let first = BatchSubmitter::new(MockSigner::new())
            .submit(request(3))
            .await
            .unwrap();
        let second = BatchSubmitter::new(MockSigner::new())
            .submit(request(3))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.id.is_fallback());

        let atomic =
            BatchSubmitter::new(MockSigner::new().with_atomic_response(Ok(json!(BUNDLE))))
                .submit(request(3))
                .await
                .unwrap();
        assert_ne!(atomic.id, first.id);
        assert!(!atomic.id.is_fallback());
    }

    #[tokio::test]
    async fn empty_batch_is_configuration_error() {
        let submitter = BatchSubmitter::new(MockSigner::new());
        let err = submitter
            .submit(BatchRequest::new(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BatchErrorKind::Configuration);
        assert!(submitter.signer().events().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_chain_is_configuration_error() {
        let mut signer = MockSigner::new();
        signer.chain_id = None;
        let submitter = BatchSubmitter::new(signer);
        let err = submitter.submit(request(1)).await.unwrap_err();
        assert_eq!(err.kind(), BatchErrorKind::Configuration);
        assert!(submitter.signer().requests().is_empty());

        // an explicit chain id needs no network lookup
        let mut signer = MockSigner::new();
        signer.chain_id = None;
        let submitter = BatchSubmitter::new(signer);
        assert!(submitter.submit(request(1).on_chain(100)).await.is_ok());
    }

    #[tokio::test]
    async fn encoding_failure_aborts_before_any_request() {
        let abi = parse_abi(&["function enableModule(address module)"]).unwrap();
        let bad = CallDescription::contract(Address::zero(), abi, "disableModule", vec![]);
        let submitter = BatchSubmitter::new(MockSigner::new());

        let err = submitter
            .submit(BatchRequest::new(vec![call(1), bad]))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Encoding { index: 1, .. }));
        assert!(submitter.signer().events().is_empty());
    }

    #[tokio::test]
    async fn explicit_account_is_used_as_sender() {
        let submitter =
            BatchSubmitter::new(MockSigner::new().with_atomic_response(Ok(json!(BUNDLE))));
        let safe = Address::repeat_byte(0xcc);
        submitter
            .submit(request(1).from_account(safe))
            .await
            .unwrap();
        let (_, params) = &submitter.signer().requests()[0];
        assert_eq!(params[0]["from"], fmt_address(safe));
    }

    #[tokio::test]
    async fn capability_check_reports_support() {
        let account = Address::repeat_byte(0x5a);
        let yes = BatchSubmitter::new(MockSigner::new().with_atomic_response(Ok(json!({}))));
        assert!(yes.supports_atomic_batches(account).await);

        let no = BatchSubmitter::new(MockSigner::new());
        assert!(!no.supports_atomic_batches(account).await);
        assert_eq!(no.signer().requests()[0].0, WALLET_GET_CAPABILITIES);
    }

    #[test]
    fn parse_result_rejects_unknown_shape() {
        assert!(parse_send_calls_result(&json!({ "foo": "bar" })).is_err());
        assert!(parse_send_calls_result(&json!("")).is_err());
        assert!(parse_send_calls_result(&json!(null)).is_err());
    }

    trait FirstValue {
        fn with_value_on_first(self, wei: u64) -> Self;
    }

    impl FirstValue for BatchRequest {
        fn with_value_on_first(mut self, wei: u64) -> Self {
            if let Some(first) = self.calls.first_mut() {
                first.value = Some(wei.into());
            }
            self
        }
    }
}
