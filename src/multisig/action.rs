//! Caller intent
//!
//! An `Action` is what a caller asks the account to do, before any nonce or
//! protocol field is attached. Fields are kept as the caller supplied them and
//! parsed by the encoder, so malformed input surfaces as `InvalidAction`.

use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::abi::encode_call;
use crate::core::errors::{Result, SafeTxError};

/// Operation kind executed by the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OperationType {
    #[default]
    Call,
    DelegateCall,
}

impl From<OperationType> for u8 {
    fn from(op: OperationType) -> u8 {
        match op {
            OperationType::Call => 0,
            OperationType::DelegateCall => 1,
        }
    }
}

impl TryFrom<u8> for OperationType {
    type Error = SafeTxError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OperationType::Call),
            1 => Ok(OperationType::DelegateCall),
            other => Err(SafeTxError::InvalidAction(format!("unknown operation {}", other))),
        }
    }
}

/// Per-call execution options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Gas limit forwarded to the relay or used for direct submission
    pub gas_limit: Option<U256>,
    /// Whether a relay sponsor pays the fees. Otherwise the descriptor's
    /// refund must pay the relay.
    #[serde(default)]
    pub is_sponsored: bool,
}

/// Raw caller intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Destination address (hex, optionally EIP-55 checksummed)
    pub to: String,
    /// Native-currency amount in wei, decimal or 0x-prefixed hex
    pub value: String,
    pub data: Bytes,
    #[serde(default)]
    pub operation: OperationType,
    #[serde(default)]
    pub options: ExecutionOptions,
}

impl Action {
    /// A plain call.
    pub fn call(to: impl Into<String>, value: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            to: to.into(),
            value: value.into(),
            data: data.into(),
            operation: OperationType::Call,
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_operation(mut self, operation: OperationType) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Pack several actions into one delegate call to the MultiSend contract.
    ///
    /// A single action is returned unchanged.
    pub fn batch(
        mut actions: Vec<Action>,
        multi_send: Address,
        options: ExecutionOptions,
    ) -> Result<Action> {
        match actions.len() {
            0 => Err(SafeTxError::InvalidAction("empty batch".to_string())),
            1 => Ok(actions.remove(0)),
            _ => {
                let mut packed = Vec::new();
                for action in &actions {
                    let to = parse_address(&action.to)?;
                    let value = parse_value(&action.value)?;
                    packed.push(u8::from(action.operation));
                    packed.extend_from_slice(to.as_bytes());
                    let mut word = [0u8; 32];
                    value.to_big_endian(&mut word);
                    packed.extend_from_slice(&word);
                    U256::from(action.data.len()).to_big_endian(&mut word);
                    packed.extend_from_slice(&word);
                    packed.extend_from_slice(&action.data);
                }
                let data = encode_call("multiSend(bytes)", &[Token::Bytes(packed)]);
                Ok(Action {
                    to: format!("{:?}", multi_send),
                    value: "0".to_string(),
                    data: data.into(),
                    operation: OperationType::DelegateCall,
                    options,
                })
            }
        }
    }
}

/// Parse a 20-byte hex address. Mixed-case input must carry a valid EIP-55 checksum.
pub fn parse_address(raw: &str) -> Result<Address> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| SafeTxError::InvalidAction(format!("address must be 0x-prefixed: {}", raw)))?;
    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SafeTxError::InvalidAction(format!("malformed address: {}", raw)));
    }
    let address = Address::from_str(trimmed)
        .map_err(|e| SafeTxError::InvalidAction(format!("malformed address {}: {}", raw, e)))?;

    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower && to_checksum(&address, None) != trimmed {
        return Err(SafeTxError::InvalidAction(format!("bad address checksum: {}", raw)));
    }
    Ok(address)
}

/// Parse a non-negative wei amount.
pub fn parse_value(raw: &str) -> Result<U256> {
    let trimmed = raw.trim();
    if trimmed.starts_with('-') {
        return Err(SafeTxError::InvalidAction(format!("value must not be negative: {}", raw)));
    }
    if trimmed.is_empty() {
        return Ok(U256::zero());
    }
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex_digits) => U256::from_str_radix(hex_digits, 16).map_err(|e| e.to_string()),
        None => U256::from_dec_str(trimmed).map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| SafeTxError::InvalidAction(format!("malformed value {}: {}", raw, e)))
}
