//! Call intents and their ABI encoding
//!
//! Defines the contract calls the relayer knows how to produce: ERC-20
//! `approve` and the vault's `deposit` / `cooldownShares`.

use crate::tx::{FeeBid, OperationRequest};

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use serde::Deserialize;
use std::fmt;

/// Token amount: an exact integer or `"max"` (2^256 - 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "AmountRepr")]
pub struct Amount(U256);

#[derive(Deserialize)]
#[serde(untagged)]
enum AmountRepr {
    Integer(u64),
    Text(String),
}

impl TryFrom<AmountRepr> for Amount {
    type Error = String;

    fn try_from(repr: AmountRepr) -> Result<Self, Self::Error> {
        match repr {
            AmountRepr::Integer(n) => Ok(Amount(U256::from(n))),
            AmountRepr::Text(s) if s.eq_ignore_ascii_case("max") => Ok(Amount(U256::MAX)),
            AmountRepr::Text(s) => U256::from_dec_str(s.trim())
                .map(Amount)
                .map_err(|e| format!("invalid amount {:?}: {}", s, e)),
        }
    }
}

impl Amount {
    pub fn new(value: U256) -> Self {
        Amount(value)
    }

    pub fn value(&self) -> U256 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == U256::MAX {
            write!(f, "UINT256_MAX")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Contract call to perform for an account
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallIntent {
    /// `approve(address spender, uint256 amount)` on `token`
    Approve {
        token: Address,
        spender: Address,
        amount: Amount,
    },
    /// `deposit(uint256 assets, address receiver)` on `vault`
    Deposit {
        vault: Address,
        assets: Amount,
        /// Defaults to the signing account
        #[serde(default)]
        receiver: Option<Address>,
    },
    /// `cooldownShares(uint256 shares, address owner)` on `vault`
    CooldownShares {
        vault: Address,
        shares: Amount,
        /// Defaults to the signing account
        #[serde(default)]
        owner: Option<Address>,
    },
}

impl CallIntent {
    pub fn kind(&self) -> &'static str {
        match self {
            CallIntent::Approve { .. } => "approve",
            CallIntent::Deposit { .. } => "deposit",
            CallIntent::CooldownShares { .. } => "cooldown_shares",
        }
    }

    /// Contract the call is sent to
    pub fn target(&self) -> Address {
        match self {
            CallIntent::Approve { token, .. } => *token,
            CallIntent::Deposit { vault, .. } | CallIntent::CooldownShares { vault, .. } => *vault,
        }
    }

    /// ABI-encoded call data for `account`
    pub fn call_data(&self, account: Address) -> Bytes {
        match self {
            CallIntent::Approve {
                spender, amount, ..
            } => encode_call(
                "approve(address,uint256)",
                &[Token::Address(*spender), Token::Uint(amount.value())],
            ),
            CallIntent::Deposit {
                assets, receiver, ..
            } => encode_call(
                "deposit(uint256,address)",
                &[
                    Token::Uint(assets.value()),
                    Token::Address(receiver.unwrap_or(account)),
                ],
            ),
            CallIntent::CooldownShares { shares, owner, .. } => encode_call(
                "cooldownShares(uint256,address)",
                &[
                    Token::Uint(shares.value()),
                    Token::Address(owner.unwrap_or(account)),
                ],
            ),
        }
    }

    pub fn label(&self, account: Address) -> String {
        match self {
            CallIntent::Approve {
                token,
                spender,
                amount,
            } => format!("approve({:?} -> {:?}, {})", token, spender, amount),
            CallIntent::Deposit {
                assets, receiver, ..
            } => format!("vault.deposit({}, {:?})", assets, receiver.unwrap_or(account)),
            CallIntent::CooldownShares { shares, owner, .. } => format!(
                "vault.cooldownShares({}, owner={:?})",
                shares,
                owner.unwrap_or(account)
            ),
        }
    }

    /// Gas limit used when estimation fails
    pub fn default_gas_fallback(&self) -> u64 {
        match self {
            CallIntent::Approve { .. } | CallIntent::Deposit { .. } => 120_000,
            CallIntent::CooldownShares { .. } => 140_000,
        }
    }
}

fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(args));
    data.into()
}

/// One configured operation
#[derive(Debug, Clone, Deserialize)]
pub struct OperationConfig {
    #[serde(flatten)]
    pub intent: CallIntent,
    /// Overrides the per-kind fallback gas limit
    #[serde(default)]
    pub gas_fallback: Option<u64>,
}

impl OperationConfig {
    pub fn to_request(&self, account: Address, fee_bid: FeeBid) -> OperationRequest {
        let fallback = self
            .gas_fallback
            .unwrap_or_else(|| self.intent.default_gas_fallback());

        OperationRequest {
            label: self.intent.label(account),
            kind: self.intent.kind().to_string(),
            to: self.intent.target(),
            value: U256::zero(),
            call_data: self.intent.call_data(account),
            fee_bid,
            gas_fallback: Some(U256::from(fallback)),
        }
    }
}
