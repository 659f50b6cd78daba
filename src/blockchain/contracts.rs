//! Safe contract call encodings
//!
//! Only the handful of functions the lifecycle touches, encoded through
//! selector + ABI tokens rather than generated bindings.

use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, Bytes, U256};

use crate::core::abi::encode_call;
use crate::core::errors::{Result, SafeTxError};
use crate::multisig::transaction::TransactionDescriptor;

pub const EXEC_TRANSACTION: &str =
    "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)";
pub const GET_OWNERS: &str = "getOwners()";
pub const GET_THRESHOLD: &str = "getThreshold()";
pub const NONCE: &str = "nonce()";
pub const SETUP: &str = "setup(address[],uint256,address,bytes,address,address,uint256,address)";
pub const CREATE_PROXY_WITH_NONCE: &str = "createProxyWithNonce(address,bytes,uint256)";
pub const PROXY_CREATION_CODE: &str = "proxyCreationCode()";

/// Selector of `Error(string)` revert payloads
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// `execTransaction` call data for an approved descriptor.
pub fn exec_transaction(descriptor: &TransactionDescriptor, signatures: &Bytes) -> Bytes {
    encode_call(
        EXEC_TRANSACTION,
        &[
            Token::Address(descriptor.to),
            Token::Uint(descriptor.value),
            Token::Bytes(descriptor.data.to_vec()),
            Token::Uint(U256::from(u8::from(descriptor.operation))),
            Token::Uint(descriptor.safe_tx_gas),
            Token::Uint(descriptor.base_gas),
            Token::Uint(descriptor.gas_price),
            Token::Address(descriptor.gas_token),
            Token::Address(descriptor.refund_receiver),
            Token::Bytes(signatures.to_vec()),
        ],
    )
    .into()
}

pub fn no_args(signature: &str) -> Bytes {
    encode_call(signature, &[]).into()
}

fn malformed(what: &str, detail: impl std::fmt::Display) -> SafeTxError {
    SafeTxError::network(anyhow::anyhow!("malformed {} response: {}", what, detail))
}

pub fn decode_owners(data: &[u8]) -> Result<Vec<Address>> {
    let tokens = decode(&[ParamType::Array(Box::new(ParamType::Address))], data)
        .map_err(|e| malformed("getOwners", e))?;
    match tokens.into_iter().next() {
        Some(Token::Array(items)) => items
            .into_iter()
            .map(|t| t.into_address().ok_or_else(|| malformed("getOwners", "non-address entry")))
            .collect(),
        other => Err(malformed("getOwners", format!("{:?}", other))),
    }
}

pub fn decode_uint(what: &str, data: &[u8]) -> Result<U256> {
    let tokens = decode(&[ParamType::Uint(256)], data).map_err(|e| malformed(what, e))?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| malformed(what, "missing uint"))
}

pub fn decode_bool(what: &str, data: &[u8]) -> Result<bool> {
    let tokens = decode(&[ParamType::Bool], data).map_err(|e| malformed(what, e))?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_bool)
        .ok_or_else(|| malformed(what, "missing bool"))
}

pub fn decode_bytes(what: &str, data: &[u8]) -> Result<Vec<u8>> {
    let tokens = decode(&[ParamType::Bytes], data).map_err(|e| malformed(what, e))?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_bytes)
        .ok_or_else(|| malformed(what, "missing bytes"))
}

/// Human-readable reason from `Error(string)` revert data, if that is what it is.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    decode(&[ParamType::String], &data[4..])
        .ok()
        .and_then(|t| t.into_iter().next())
        .and_then(Token::into_string)
}
