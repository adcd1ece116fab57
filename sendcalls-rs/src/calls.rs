//! Call builders for the Circles subscription flow.
//!
//! A Safe subscribes by enabling the subscription module and then calling `subscribe` on it.
//! Redemption also needs the module approved as an operator on the Hub (ERC-1155).

use crate::encoder::EncodingError;
use crate::types::CallDescription;
use ethers::abi::{AbiParser, Token};
use ethers::types::{Address, Bytes, U256};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionCategory {
    Trusted = 0,
    Untrusted = 1,
    Group = 2,
}

impl FromStr for SubscriptionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trusted" | "0" => Ok(Self::Trusted),
            "untrusted" | "1" => Ok(Self::Untrusted),
            "group" | "2" => Ok(Self::Group),
            other => Err(format!(
                "unknown category {other:?} (expected trusted, untrusted or group)"
            )),
        }
    }
}

/// Redemption period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    /// 30 days.
    Monthly,
    /// 365 days.
    Yearly,
    Seconds(u64),
}

impl Frequency {
    pub fn seconds(self) -> u64 {
        match self {
            Frequency::Hourly => 3_600,
            Frequency::Daily => 86_400,
            Frequency::Weekly => 604_800,
            Frequency::Monthly => 2_592_000,
            Frequency::Yearly => 31_536_000,
            Frequency::Seconds(s) => s,
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let f = match s.to_ascii_lowercase().as_str() {
            "hourly" => Frequency::Hourly,
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            "yearly" => Frequency::Yearly,
            other => {
                let secs: u64 = other
                    .parse()
                    .map_err(|_| format!("invalid frequency {s:?} (preset name or seconds)"))?;
                if secs == 0 {
                    return Err("frequency must be greater than zero".to_string());
                }
                Frequency::Seconds(secs)
            }
        };
        Ok(f)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Hourly => write!(f, "hourly"),
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::Yearly => write!(f, "yearly"),
            Frequency::Seconds(s) => write!(f, "every {s}s"),
        }
    }
}

/// `Safe.enableModule(module)`, sent to the Safe itself.
pub fn enable_module(safe: Address, module: Address) -> Result<CallDescription, EncodingError> {
    let abi = AbiParser::default().parse(&["function enableModule(address module)"])?;
    Ok(CallDescription::contract(
        safe,
        abi,
        "enableModule",
        vec![Token::Address(module)],
    ))
}

pub fn subscribe(
    module: Address,
    recipient: Address,
    amount: U256,
    frequency: Frequency,
    category: SubscriptionCategory,
) -> Result<CallDescription, EncodingError> {
    let abi = AbiParser::default().parse(&[
        "function subscribe(address recipient, uint256 amount, uint256 frequency, uint8 category) returns (bytes32 id)",
    ])?;
    Ok(CallDescription::contract(
        module,
        abi,
        "subscribe",
        vec![
            Token::Address(recipient),
            Token::Uint(amount),
            Token::Uint(U256::from(frequency.seconds())),
            Token::Uint(U256::from(category as u8)),
        ],
    ))
}

pub fn unsubscribe(module: Address, id: [u8; 32]) -> Result<CallDescription, EncodingError> {
    let abi = AbiParser::default().parse(&["function unsubscribe(bytes32 id)"])?;
    Ok(CallDescription::contract(
        module,
        abi,
        "unsubscribe",
        vec![Token::FixedBytes(id.to_vec())],
    ))
}

/// `SubscriptionModule.redeem(id, data)`. `data` is usually empty.
pub fn redeem(
    module: Address,
    id: [u8; 32],
    data: impl Into<Bytes>,
) -> Result<CallDescription, EncodingError> {
    let abi = AbiParser::default().parse(&["function redeem(bytes32 id, bytes data)"])?;
    Ok(CallDescription::contract(
        module,
        abi,
        "redeem",
        vec![Token::FixedBytes(id.to_vec()), Token::Bytes(data.into().to_vec())],
    ))
}

pub fn update_recipient(
    module: Address,
    id: [u8; 32],
    new_recipient: Address,
) -> Result<CallDescription, EncodingError> {
    let abi = AbiParser::default()
        .parse(&["function updateRecipient(bytes32 id, address newRecipient)"])?;
    Ok(CallDescription::contract(
        module,
        abi,
        "updateRecipient",
        vec![Token::FixedBytes(id.to_vec()), Token::Address(new_recipient)],
    ))
}

/// `Hub.setApprovalForAll(operator, approved)`.
pub fn set_hub_approval(
    hub: Address,
    operator: Address,
    approved: bool,
) -> Result<CallDescription, EncodingError> {
    let abi = AbiParser::default()
        .parse(&["function setApprovalForAll(address operator, bool approved)"])?;
    Ok(CallDescription::contract(
        hub,
        abi,
        "setApprovalForAll",
        vec![Token::Address(operator), Token::Bool(approved)],
    ))
}

/// Everything needed to put a new subscription on chain in one batch.
#[derive(Clone, Debug)]
pub struct SubscriptionPlan {
    pub safe: Address,
    pub module: Address,
    pub hub: Address,
    pub recipient: Address,
    /// Amount per period, in token base units.
    pub amount: U256,
    pub frequency: Frequency,
    pub category: SubscriptionCategory,
    /// Skip `enableModule` (the Safe reverts when enabling an already enabled module).
    pub module_enabled: bool,
    /// Append `setApprovalForAll(module, true)` on the Hub.
    pub approve_hub: bool,
}

/// `[enableModule?, subscribe, setApprovalForAll?]`.
///
/// The module is enabled before it is used.
pub fn subscription_batch(plan: &SubscriptionPlan) -> Result<Vec<CallDescription>, EncodingError> {
    let mut calls = Vec::with_capacity(3);
    if !plan.module_enabled {
        calls.push(enable_module(plan.safe, plan.module)?);
    }
    calls.push(subscribe(
        plan.module,
        plan.recipient,
        plan.amount,
        plan.frequency,
        plan.category,
    )?);
    if plan.approve_hub {
        calls.push(set_hub_approval(plan.hub, plan.module, true)?);
    }
    Ok(calls)
}
