//! Bundle identifiers.
//!
//! Wallets that implement `wallet_sendCalls` hand back their own opaque id. When the batch runs
//! through the sequential fallback instead, an id is synthesized with the same convention viem
//! uses, so wallets and tooling that follow it can recognize and decode it:
//!
//! ```text
//! tx_hash[0] (32) | ... | tx_hash[n-1] (32) | chain_id (32, left-padded) | 0x5792..5792 (32)
//! ```

use crate::encoding::fmt_bytes;
use ethers::types::H256;
use serde::Serialize;
use std::fmt;

const SLOT: usize = 32;

/// Trailing marker of synthesized ids.
pub const FALLBACK_MAGIC: [u8; SLOT] = {
    let mut out = [0u8; SLOT];
    let mut i = 0;
    while i < SLOT {
        out[i] = if i % 2 == 0 { 0x57 } else { 0x92 };
        i += 1;
    }
    out
};

/// Opaque tracking key for one batch submission.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BundleId(String);

impl BundleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id was synthesized by the sequential fallback.
    pub fn is_fallback(&self) -> bool {
        FallbackBundle::decode(&self.0).is_some()
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contents of a synthesized fallback id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackBundle {
    pub tx_hashes: Vec<H256>,
    pub chain_id: u64,
}

impl FallbackBundle {
    pub fn new(tx_hashes: Vec<H256>, chain_id: u64) -> Self {
        Self {
            tx_hashes,
            chain_id,
        }
    }

    pub fn id(&self) -> BundleId {
        let mut out = Vec::with_capacity((self.tx_hashes.len() + 2) * SLOT);
        for hash in &self.tx_hashes {
            out.extend_from_slice(hash.as_bytes());
        }
        let mut chain_slot = [0u8; SLOT];
        chain_slot[SLOT - 8..].copy_from_slice(&self.chain_id.to_be_bytes());
        out.extend_from_slice(&chain_slot);
        out.extend_from_slice(&FALLBACK_MAGIC);
        BundleId(fmt_bytes(&out))
    }

    /// Returns `None` for anything that is not a synthesized id, including wallet-native ids.
    pub fn decode(id: &str) -> Option<Self> {
        let hex_str = id.strip_prefix("0x")?;
        let bytes = hex::decode(hex_str).ok()?;
        if bytes.len() % SLOT != 0 || bytes.len() < 3 * SLOT {
            return None;
        }

        let (body, magic) = bytes.split_at(bytes.len() - SLOT);
        if magic != FALLBACK_MAGIC.as_slice() {
            return None;
        }

        let (hashes, chain_slot) = body.split_at(body.len() - SLOT);
        // chain ids wider than u64 are not produced by `id()`
        if chain_slot[..SLOT - 8].iter().any(|b| *b != 0) {
            return None;
        }
        let mut chain_id = [0u8; 8];
        chain_id.copy_from_slice(&chain_slot[SLOT - 8..]);

        Some(Self {
            tx_hashes: hashes.chunks(SLOT).map(H256::from_slice).collect(),
            chain_id: u64::from_be_bytes(chain_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_matches_pinned_constant() {
        assert_eq!(
            fmt_bytes(&FALLBACK_MAGIC),
            "0x5792579257925792579257925792579257925792579257925792579257925792"
        );
    }

    #[test]
    fn id_layout_is_slots_then_chain_then_magic() {
        let bundle = FallbackBundle::new(vec![H256::repeat_byte(0x11)], 100);
        let id = bundle.id();
        let expected = format!(
            "0x{}{}{}",
            "11".repeat(32),
            format!("{:0>64}", "64"),
            "5792".repeat(16)
        );
        assert_eq!(id.as_str(), expected);
        assert!(id.is_fallback());
    }

    #[test]
    fn decode_recovers_hashes_and_chain() {
        let hashes = vec![H256::repeat_byte(0x01), H256::repeat_byte(0x02)];
        let bundle = FallbackBundle::new(hashes.clone(), 8453);
        let decoded = FallbackBundle::decode(bundle.id().as_str()).unwrap();
        assert_eq!(decoded.tx_hashes, hashes);
        assert_eq!(decoded.chain_id, 8453);
    }

    #[test]
    fn wallet_native_ids_are_not_fallback() {
        let native = format!("0x{:0>64}", "aa");
        assert!(!BundleId::new(native).is_fallback());
        assert!(!BundleId::new("bundle-42").is_fallback());
        assert!(!BundleId::new("").is_fallback());
    }

    #[test]
    fn decode_rejects_missing_hashes_and_bad_magic() {
        // chain slot + magic only
        let no_hashes = format!("0x{:0>64}{}", "64", "5792".repeat(16));
        assert!(FallbackBundle::decode(&no_hashes).is_none());

        let bad_magic = format!("0x{}{:0>64}{}", "11".repeat(32), "64", "5793".repeat(16));
        assert!(FallbackBundle::decode(&bad_magic).is_none());

        let misaligned = format!("0x{}{:0>64}{}", "11".repeat(31), "64", "5792".repeat(16));
        assert!(FallbackBundle::decode(&misaligned).is_none());
    }
}
