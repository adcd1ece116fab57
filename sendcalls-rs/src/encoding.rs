use crate::types::NormalizedCall;
use ethers::types::{Address, H256, U256};
use serde_json::Value;

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &[u8]) -> String {
    format!("0x{}", hex::encode(b))
}

/// Shape of one entry in `wallet_sendCalls` `calls[]`.
///
/// Absent `data` / `value` are omitted rather than zero-filled so the wallet (or the signing
/// layer on the fallback path) applies its own defaults.
pub fn call_to_json(call: &NormalizedCall) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("to".to_string(), Value::String(fmt_address(call.to)));
    if let Some(data) = call.data.as_ref() {
        obj.insert("data".to_string(), Value::String(fmt_bytes(data)));
    }
    if let Some(value) = call.value {
        obj.insert("value".to_string(), Value::String(fmt_u256(value)));
    }
    Value::Object(obj)
}

pub fn parse_h256(s: &str) -> Result<H256, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| format!("invalid hex: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("expected 32-byte hex, got {} bytes", bytes.len()));
    }
    Ok(H256::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    #[test]
    fn quantity_encoding_has_no_leading_zeros() {
        assert_eq!(fmt_u256(U256::zero()), "0x0");
        assert_eq!(fmt_u256(U256::from(100u64)), "0x64");
        assert_eq!(fmt_u256(U256::from(256u64)), "0x100");
    }

    #[test]
    fn parse_h256_rejects_wrong_length() {
        assert!(parse_h256("0x1234").is_err());
        let h = parse_h256(&format!("0x{}", "11".repeat(32))).unwrap();
        assert_eq!(h, H256::repeat_byte(0x11));
    }

    #[test]
    fn call_json_omits_absent_fields() {
        let call = NormalizedCall {
            to: Address::repeat_byte(0xaa),
            data: None,
            value: None,
        };
        let json = call_to_json(&call);
        assert_eq!(
            json,
            serde_json::json!({ "to": format!("0x{}", "aa".repeat(20)) })
        );

        let call = NormalizedCall {
            to: Address::repeat_byte(0xaa),
            data: Some(Bytes::from(vec![0xde, 0xad])),
            value: Some(U256::from(16u64)),
        };
        let json = call_to_json(&call);
        assert_eq!(json["data"], "0xdead");
        assert_eq!(json["value"], "0x10");
    }
}
