//! Canonical transaction descriptor
//!
//! Turns a caller `Action` into the fully populated, versioned descriptor that
//! the account signs over. Every protocol field is filled in here so that two
//! descriptors compare equal exactly when they hash equal.

use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::action::{parse_address, parse_value, Action, OperationType};
use crate::core::errors::{Result, SafeTxError};

/// Descriptor layout version. Bumped if the field set ever changes.
pub const DESCRIPTOR_VERSION: u8 = 1;

/// Account-level defaults applied to omitted protocol fields.
///
/// Relaying with a sync fee is paid through the Safe refund, so such accounts
/// need a non-zero `gas_price` and a `refund_receiver` set to the relay's fee
/// collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDefaults {
    #[serde(default)]
    pub safe_tx_gas: U256,
    #[serde(default)]
    pub base_gas: U256,
    #[serde(default)]
    pub gas_price: U256,
    #[serde(default)]
    pub gas_token: Address,
    #[serde(default)]
    pub refund_receiver: Address,
    /// Largest payload the account accepts
    #[serde(default = "AccountDefaults::default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl AccountDefaults {
    fn default_max_payload_bytes() -> usize { 128 * 1024 }
}

impl Default for AccountDefaults {
    fn default() -> Self {
        Self {
            safe_tx_gas: U256::zero(),
            base_gas: U256::zero(),
            gas_price: U256::zero(),
            gas_token: Address::zero(),
            refund_receiver: Address::zero(),
            max_payload_bytes: Self::default_max_payload_bytes(),
        }
    }
}

/// Canonical, hash-addressable transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDescriptor {
    /// Layout version. Carried with stored records, not part of the signed hash.
    #[serde(default = "TransactionDescriptor::current_version")]
    pub version: u8,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: OperationType,
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: U256,
}

impl TransactionDescriptor {
    fn current_version() -> u8 {
        DESCRIPTOR_VERSION
    }

    /// Whether the account refunds the submitter out of its own balance.
    pub fn pays_refund(&self) -> bool {
        !self.gas_price.is_zero()
    }
}

/// Build the canonical descriptor for `action` at `nonce`.
///
/// A gas limit in the action options becomes `safeTxGas`. Sponsored actions
/// never carry a refund: the relay sponsor pays, not the account.
pub fn encode(action: &Action, nonce: U256, defaults: &AccountDefaults) -> Result<TransactionDescriptor> {
    let to = parse_address(&action.to)?;
    let value = parse_value(&action.value)?;

    if action.data.len() > defaults.max_payload_bytes {
        return Err(SafeTxError::InvalidAction(format!(
            "payload of {} bytes exceeds account limit of {}",
            action.data.len(),
            defaults.max_payload_bytes
        )));
    }

    if nonce == U256::MAX {
        return Err(SafeTxError::InvalidAction("nonce leaves no successor".to_string()));
    }

    let safe_tx_gas = action.options.gas_limit.unwrap_or(defaults.safe_tx_gas);
    let (gas_price, gas_token, refund_receiver) = if action.options.is_sponsored {
        (U256::zero(), Address::zero(), Address::zero())
    } else {
        (defaults.gas_price, defaults.gas_token, defaults.refund_receiver)
    };

    let descriptor = TransactionDescriptor {
        version: DESCRIPTOR_VERSION,
        to,
        value,
        data: action.data.clone(),
        operation: action.operation,
        safe_tx_gas,
        base_gas: defaults.base_gas,
        gas_price,
        gas_token,
        refund_receiver,
        nonce,
    };

    debug!(
        version = descriptor.version,
        to = ?descriptor.to,
        nonce = %descriptor.nonce,
        payload_len = descriptor.data.len(),
        "Encoded transaction descriptor"
    );
    Ok(descriptor)
}
