//! Signing backends
//!
//! The lifecycle only ever asks a backend for its address and for a
//! signature over a signing hash; key material stays behind the trait.

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::core::errors::{Result, SafeTxError};
use crate::multisig::hash::SigningHash;
use crate::multisig::signing::SafeSignature;

#[async_trait]
pub trait SigningBackend: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_hash(&self, signing_hash: SigningHash) -> Result<SafeSignature>;
}

/// How a local key signs the hash
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMethod {
    /// Raw secp256k1 signature over the hash
    Ecdsa,
    /// `personal_sign` over the hash, v shifted by 4
    #[default]
    EthSign,
}

/// Private key held in process
pub struct LocalKeySigner {
    wallet: LocalWallet,
    method: SigningMethod,
}

impl fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.wallet.address())
            .field("method", &self.method)
            .finish()
    }
}

impl LocalKeySigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet, method: SigningMethod::default() }
    }

    /// Hex private key, with or without `0x`.
    pub fn from_hex_key(key: &SecretString) -> Result<Self> {
        let wallet = key
            .expose_secret()
            .trim()
            .parse::<LocalWallet>()
            .map_err(|_| SafeTxError::ConfigError("signer key is not a valid secp256k1 private key".to_string()))?;
        Ok(Self::new(wallet))
    }

    pub fn with_method(mut self, method: SigningMethod) -> Self {
        self.method = method;
        self
    }

    /// Underlying wallet, for use as a gas-paying executor.
    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }
}

#[async_trait]
impl SigningBackend for LocalKeySigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_hash(&self, signing_hash: SigningHash) -> Result<SafeSignature> {
        let signature = match self.method {
            SigningMethod::Ecdsa => self
                .wallet
                .sign_hash(signing_hash.0)
                .map_err(|e| SafeTxError::InvalidSignature(format!("signing failed: {}", e)))?,
            SigningMethod::EthSign => {
                let mut sig = self
                    .wallet
                    .sign_message(signing_hash.as_bytes())
                    .await
                    .map_err(|e| SafeTxError::InvalidSignature(format!("signing failed: {}", e)))?;
                sig.v += 4;
                sig
            }
        };
        debug!(signer = ?self.wallet.address(), method = ?self.method, signing_hash = %signing_hash, "Signed");
        SafeSignature::from_claimed(signing_hash, self.wallet.address(), &signature.to_vec())
    }
}
