//! Safe account deployment
//!
//! A Safe is a proxy created by the proxy factory with `createProxyWithNonce`,
//! initialised in the same call through `setup`. Its address is a CREATE2
//! address and can be known before deployment.

use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use ethers::utils::get_create2_address_from_hash;
use serde::{Deserialize, Serialize};

use super::contracts;
use crate::core::abi::{encode_call, keccak256};
use crate::core::errors::Result;
use crate::multisig::policy::OwnerPolicy;

/// Owners and threshold of a Safe to deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeAccountConfig {
    pub owners: Vec<Address>,
    pub threshold: usize,
    /// Falls back to the configured handler when absent
    #[serde(default)]
    pub fallback_handler: Option<Address>,
}

impl SafeAccountConfig {
    pub fn new(owners: Vec<Address>, threshold: usize) -> Result<Self> {
        let config = Self { owners, threshold, fallback_handler: None };
        config.validate()?;
        Ok(config)
    }

    pub fn with_fallback_handler(mut self, handler: Address) -> Self {
        self.fallback_handler = Some(handler);
        self
    }

    /// Same rules as an on-chain owner policy.
    pub fn validate(&self) -> Result<()> {
        OwnerPolicy { owners: self.owners.clone(), threshold: self.threshold }.check()
    }
}

/// `setup(...)` call data used as the proxy initializer. No module setup
/// call and no deployment payment.
pub fn encode_setup_call_data(config: &SafeAccountConfig, default_fallback_handler: Address) -> Result<Bytes> {
    config.validate()?;
    let data = encode_call(
        contracts::SETUP,
        &[
            Token::Array(config.owners.iter().copied().map(Token::Address).collect()),
            Token::Uint(U256::from(config.threshold)),
            Token::Address(Address::zero()),
            Token::Bytes(Vec::new()),
            Token::Address(config.fallback_handler.unwrap_or(default_fallback_handler)),
            Token::Address(Address::zero()),
            Token::Uint(U256::zero()),
            Token::Address(Address::zero()),
        ],
    );
    Ok(data.into())
}

pub fn encode_create_proxy_with_nonce(singleton: Address, initializer: &Bytes, salt_nonce: U256) -> Bytes {
    encode_call(
        contracts::CREATE_PROXY_WITH_NONCE,
        &[Token::Address(singleton), Token::Bytes(initializer.to_vec()), Token::Uint(salt_nonce)],
    )
    .into()
}

/// CREATE2 address `createProxyWithNonce` will deploy to.
///
/// salt = keccak256(keccak256(initializer) ‖ uint256(salt_nonce)),
/// init code = proxy creation code ‖ uint256(singleton).
pub fn predict_safe_address(
    factory: Address,
    singleton: Address,
    proxy_creation_code: &[u8],
    initializer: &[u8],
    salt_nonce: U256,
) -> Address {
    let mut salt_input = keccak256(initializer).to_vec();
    let mut nonce_word = [0u8; 32];
    salt_nonce.to_big_endian(&mut nonce_word);
    salt_input.extend_from_slice(&nonce_word);
    let salt = keccak256(&salt_input);

    let mut init_code = proxy_creation_code.to_vec();
    init_code.extend_from_slice(&[0u8; 12]);
    init_code.extend_from_slice(singleton.as_bytes());

    get_create2_address_from_hash(factory, salt, keccak256(&init_code))
}
