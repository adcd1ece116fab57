use crate::bundle::BundleId;
use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Delay between fallback transactions when the caller does not pick one.
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_millis(100);

/// EIP-5792 `wallet_sendCalls` version sent when the caller does not pick one.
pub const DEFAULT_VERSION: &str = "2.0.0";

/// Native-currency amount attached to a call, in wei.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Amount {
    Wei(U256),
    /// Decimal (`"1000"`) or `0x`-prefixed hex (`"0x3e8"`) string, parsed during normalization.
    Numeric(String),
}

impl From<U256> for Amount {
    fn from(v: U256) -> Self {
        Amount::Wei(v)
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Amount::Wei(U256::from(v))
    }
}

impl From<&str> for Amount {
    fn from(v: &str) -> Self {
        Amount::Numeric(v.to_string())
    }
}

impl From<String> for Amount {
    fn from(v: String) -> Self {
        Amount::Numeric(v)
    }
}

/// Caller intent for one on-chain invocation.
///
/// The payload comes either from `data` (used verbatim) or from `abi` + `function` + `args`.
/// With neither, the call is a plain value transfer.
#[derive(Clone, Debug)]
pub struct CallDescription {
    pub to: Address,
    pub data: Option<Bytes>,
    pub abi: Option<Abi>,
    pub function: Option<String>,
    pub args: Option<Vec<Token>>,
    pub value: Option<Amount>,
    /// Attribution bytes appended after the encoded payload.
    pub data_suffix: Option<Bytes>,
}

impl CallDescription {
    /// Value-only call (no payload).
    pub fn new(to: Address) -> Self {
        Self {
            to,
            data: None,
            abi: None,
            function: None,
            args: None,
            value: None,
            data_suffix: None,
        }
    }

    pub fn raw(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::new(to)
        }
    }

    pub fn contract(
        to: Address,
        abi: Abi,
        function: impl Into<String>,
        args: Vec<Token>,
    ) -> Self {
        Self {
            abi: Some(abi),
            function: Some(function.into()),
            args: Some(args),
            ..Self::new(to)
        }
    }

    pub fn with_value(mut self, value: impl Into<Amount>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_data_suffix(mut self, suffix: impl Into<Bytes>) -> Self {
        self.data_suffix = Some(suffix.into());
        self
    }
}

/// `{to, data, value}` triple produced by [`crate::normalize`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedCall {
    pub to: Address,
    pub data: Option<Bytes>,
    pub value: Option<U256>,
}

/// One entry of an EIP-5792 capabilities map.
///
/// A missing `optional` flag deserializes as `false`: the capability is mandatory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(default)]
    pub optional: bool,
    #[serde(flatten)]
    pub params: serde_json::Map<String, Value>,
}

impl Capability {
    pub fn optional() -> Self {
        Self {
            optional: true,
            params: serde_json::Map::new(),
        }
    }

    pub fn required() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

pub type Capabilities = BTreeMap<String, Capability>;

/// A full submission unit: ordered calls plus execution policy.
#[derive(Clone, Debug)]
pub struct BatchRequest {
    pub calls: Vec<CallDescription>,
    /// Resolved from the signer's network when absent.
    pub chain_id: Option<u64>,
    /// Resolved from the signer when absent.
    pub account: Option<Address>,
    pub capabilities: Option<Capabilities>,
    pub force_atomic: bool,
    /// Allow sequential `eth_sendTransaction` submission when `wallet_sendCalls` fails.
    pub fallback: bool,
    pub fallback_delay: Duration,
    pub id: Option<String>,
    pub version: String,
}

impl BatchRequest {
    pub fn new(calls: Vec<CallDescription>) -> Self {
        Self {
            calls,
            chain_id: None,
            account: None,
            capabilities: None,
            force_atomic: false,
            fallback: true,
            fallback_delay: DEFAULT_FALLBACK_DELAY,
            id: None,
            version: DEFAULT_VERSION.to_string(),
        }
    }

    pub fn on_chain(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn from_account(mut self, account: Address) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_capability(mut self, name: impl Into<String>, capability: Capability) -> Self {
        self.capabilities
            .get_or_insert_with(Capabilities::new)
            .insert(name.into(), capability);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn force_atomic(mut self, force_atomic: bool) -> Self {
        self.force_atomic = force_atomic;
        self
    }

    pub fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Names of capabilities not marked optional. An empty map yields none.
    pub fn mandatory_capabilities(&self) -> Vec<String> {
        self.capabilities
            .iter()
            .flatten()
            .filter(|(_, cap)| !cap.optional)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Outcome of a batch submission, whichever path executed it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub id: BundleId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
    /// Per-call transaction hashes; only set by the sequential fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hashes: Option<Vec<H256>>,
}
