use circles_sendcalls::encoding::fmt_h256;
use circles_sendcalls::{BatchError, BatchErrorKind};

/// Short operator-facing text for a failed submission.
pub fn describe_failure(err: &BatchError) -> String {
    match err.kind() {
        BatchErrorKind::UnsupportedOperation => {
            "wallet does not support batch transactions and sequential fallback is disabled \
             (drop --no-fallback to send them individually)"
                .to_string()
        }
        BatchErrorKind::Capability => {
            format!("{err} (mark the capability optional or use a wallet that supports it)")
        }
        BatchErrorKind::Atomicity => {
            format!("{err} (drop --force-atomic or use a wallet that supports wallet_sendCalls)")
        }
        BatchErrorKind::PartialBatchFailure => {
            let cause = describe_reason(&err.to_string());
            match err {
                BatchError::PartialBatchFailure { sent, .. } if !sent.is_empty() => {
                    let hashes: Vec<String> = sent.iter().map(|h| fmt_h256(*h)).collect();
                    format!("{cause}; already sent: {}", hashes.join(", "))
                }
                _ => cause,
            }
        }
        BatchErrorKind::Encoding | BatchErrorKind::Configuration => err.to_string(),
    }
}

fn describe_reason(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("user rejected") || lower.contains("user denied") {
        return "transaction was rejected by user".to_string();
    }
    if lower.contains("insufficient funds") {
        return "insufficient funds for transaction".to_string();
    }
    if lower.contains("execution reverted") || lower.contains("reverted") {
        return format!("transaction failed, contract execution reverted ({message})");
    }
    format!("transaction failed: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256};

    fn partial(reason: &str, sent: Vec<H256>) -> BatchError {
        BatchError::PartialBatchFailure {
            completed: sent.len(),
            failed_index: sent.len(),
            total: 3,
            to: Address::zero(),
            sent,
            reason: reason.to_string(),
        }
    }

    #[test]
    fn insufficient_funds_is_shortened() {
        let msg = describe_failure(&partial("insufficient funds for gas * price + value", vec![]));
        assert_eq!(msg, "insufficient funds for transaction");
    }

    #[test]
    fn partial_failure_lists_sent_hashes() {
        let msg = describe_failure(&partial("User rejected the request", vec![H256::repeat_byte(1)]));
        assert!(msg.starts_with("transaction was rejected by user; already sent: 0x0101"));
    }

    #[test]
    fn unsupported_suggests_fallback() {
        let msg = describe_failure(&BatchError::UnsupportedOperation("Method not found".into()));
        assert!(msg.contains("--no-fallback"));
    }

    #[test]
    fn configuration_passes_through() {
        let err = BatchError::Configuration("batch has no calls".into());
        assert_eq!(describe_failure(&err), err.to_string());
    }
}
