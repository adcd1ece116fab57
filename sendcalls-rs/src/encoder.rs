use crate::types::{Amount, CallDescription, NormalizedCall};
use ethers::types::{Bytes, U256};

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// Unknown function name or arguments that do not match the fragment.
    #[error(transparent)]
    Abi(#[from] ethers::abi::Error),

    #[error(transparent)]
    AbiParse(#[from] ethers::abi::ParseError),

    #[error("invalid amount {0:?}: {1}")]
    InvalidAmount(String, String),
}

/// Turns a call description into the `{to, data, value}` triple sent to the wallet.
///
/// Pure: the same description always yields the same bytes.
pub fn normalize(call: &CallDescription) -> Result<NormalizedCall, EncodingError> {
    let mut data = match (call.data.as_ref(), call.abi.as_ref(), call.function.as_deref()) {
        (Some(raw), _, _) => Some(raw.clone()),
        (None, Some(abi), Some(name)) => {
            let args = call.args.as_deref().unwrap_or_default();
            let encoded = abi.function(name)?.encode_input(args)?;
            Some(Bytes::from(encoded))
        }
        _ => None,
    };

    // The suffix is plain concatenation; the target contract must tolerate trailing bytes.
    if let (Some(base), Some(suffix)) = (data.as_ref(), call.data_suffix.as_ref()) {
        let mut framed = Vec::with_capacity(base.len() + suffix.len());
        framed.extend_from_slice(base);
        framed.extend_from_slice(suffix);
        data = Some(Bytes::from(framed));
    }

    let value = call.value.as_ref().map(parse_amount).transpose()?;

    Ok(NormalizedCall {
        to: call.to,
        data,
        value,
    })
}

fn parse_amount(amount: &Amount) -> Result<U256, EncodingError> {
    match amount {
        Amount::Wei(v) => Ok(*v),
        Amount::Numeric(s) => {
            let trimmed = s.trim();
            let parsed = match trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
            {
                Some(digits)
                    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) =>
                {
                    Err("expected hex digits after 0x".to_string())
                }
                Some(digits) => U256::from_str_radix(digits, 16).map_err(|e| e.to_string()),
                None => U256::from_dec_str(trimmed).map_err(|e| e.to_string()),
            };
            parsed.map_err(|e| EncodingError::InvalidAmount(s.clone(), e))
        }
    }
}
