//! Signing hash derivation
//!
//! EIP-712 typed-data hash of a descriptor, bound to the account address and
//! chain id through the domain separator. Byte-for-byte what the Safe
//! contract (v1.3.0+) computes in `getTransactionHash`.

use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::transaction::TransactionDescriptor;
use crate::core::abi::keccak256;
use crate::core::errors::SafeTxError;

const DOMAIN_TYPE: &[u8] = b"EIP712Domain(uint256 chainId,address verifyingContract)";
const SAFE_TX_TYPE: &[u8] = b"SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)";

/// The digest owners sign. Global key for storage, lookup and relay correlation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningHash(pub H256);

impl SigningHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_fixed_bytes()
    }
}

impl fmt::Display for SigningHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

impl fmt::Debug for SigningHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningHash({})", self)
    }
}

impl FromStr for SigningHash {
    type Err = SafeTxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim().strip_prefix("0x").unwrap_or(s.trim());
        let bytes = hex::decode(body)
            .map_err(|e| SafeTxError::InvalidAction(format!("malformed signing hash {}: {}", s, e)))?;
        if bytes.len() != 32 {
            return Err(SafeTxError::InvalidAction(format!(
                "signing hash must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(SigningHash(H256::from_slice(&bytes)))
    }
}

impl From<H256> for SigningHash {
    fn from(h: H256) -> Self {
        SigningHash(h)
    }
}

/// EIP-712 domain separator for an account on a chain.
pub fn domain_separator(account: Address, chain_id: u64) -> H256 {
    let encoded = encode(&[
        Token::FixedBytes(keccak256(DOMAIN_TYPE).to_vec()),
        Token::Uint(U256::from(chain_id)),
        Token::Address(account),
    ]);
    H256(keccak256(&encoded))
}

/// `hashStruct(SafeTx)` over every descriptor field, dynamic `data` hashed first.
pub fn struct_hash(descriptor: &TransactionDescriptor) -> H256 {
    let encoded = encode(&[
        Token::FixedBytes(keccak256(SAFE_TX_TYPE).to_vec()),
        Token::Address(descriptor.to),
        Token::Uint(descriptor.value),
        Token::FixedBytes(keccak256(&descriptor.data).to_vec()),
        Token::Uint(U256::from(u8::from(descriptor.operation))),
        Token::Uint(descriptor.safe_tx_gas),
        Token::Uint(descriptor.base_gas),
        Token::Uint(descriptor.gas_price),
        Token::Address(descriptor.gas_token),
        Token::Address(descriptor.refund_receiver),
        Token::Uint(descriptor.nonce),
    ]);
    H256(keccak256(&encoded))
}

/// Signing hash of `descriptor` proposed against `account` on `chain_id`.
pub fn digest(account: Address, chain_id: u64, descriptor: &TransactionDescriptor) -> SigningHash {
    let mut buf = Vec::with_capacity(2 + 32 + 32);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain_separator(account, chain_id).as_bytes());
    buf.extend_from_slice(struct_hash(descriptor).as_bytes());
    SigningHash(H256(keccak256(&buf)))
}
