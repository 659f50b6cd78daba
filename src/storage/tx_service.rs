//! Safe transaction service client
//!
//! The hosted pending-transaction store used by the Safe ecosystem. Every
//! response is re-validated before it enters the core: addresses and hashes
//! must parse, signatures must recover to the owner the service reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, U256};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{PendingTransactionStore, ProposedTransaction};
use crate::core::errors::{Result, SafeTxError};
use crate::multisig::action::OperationType;
use crate::multisig::hash::SigningHash;
use crate::multisig::signing::SafeSignature;
use crate::multisig::transaction::{TransactionDescriptor, DESCRIPTOR_VERSION};

/// Transaction service HTTP client
pub struct TxServiceStore {
    base_url: String,
    chain_id: u64,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProposeBody<'a> {
    to: Address,
    value: String,
    data: Option<&'a Bytes>,
    operation: u8,
    safe_tx_gas: String,
    base_gas: String,
    gas_price: String,
    gas_token: Address,
    refund_receiver: Address,
    nonce: String,
    contract_transaction_hash: String,
    sender: Address,
    signature: String,
    origin: &'static str,
}

#[derive(Debug, Serialize)]
struct ConfirmBody {
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceTransaction {
    safe: Address,
    to: Address,
    #[serde(deserialize_with = "de_u256")]
    value: U256,
    data: Option<Bytes>,
    operation: u8,
    #[serde(deserialize_with = "de_u256")]
    safe_tx_gas: U256,
    #[serde(deserialize_with = "de_u256")]
    base_gas: U256,
    #[serde(deserialize_with = "de_u256")]
    gas_price: U256,
    gas_token: Option<Address>,
    refund_receiver: Option<Address>,
    #[serde(deserialize_with = "de_u256")]
    nonce: U256,
    safe_tx_hash: String,
    proposer: Option<Address>,
    submission_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceConfirmation {
    owner: Address,
    signature: Option<Bytes>,
    submission_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SafeInfo {
    #[serde(deserialize_with = "de_u256")]
    nonce: U256,
}

#[derive(Debug, Deserialize)]
struct NonceOnly {
    #[serde(deserialize_with = "de_u256")]
    nonce: U256,
}

/// The service returns integers either as JSON numbers or decimal strings.
fn de_u256<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<U256, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(U256::from(n)),
        Raw::Str(s) => U256::from_dec_str(&s).map_err(serde::de::Error::custom),
    }
}

impl TxServiceStore {
    /// # Arguments
    /// * `base_url` - service root, e.g. "https://safe-transaction-goerli.safe.global"
    /// * `chain_id` - chain the service indexes
    pub fn new(base_url: &str, chain_id: u64) -> Result<Self> {
        let parsed = reqwest::Url::parse(base_url.trim())
            .map_err(|e| SafeTxError::ConfigError(format!("invalid tx service URL {}: {}", base_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(SafeTxError::network)?;
        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            chain_id,
            client,
        })
    }

    async fn check(&self, response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(SafeTxError::NotFound(format!("{}: {}", what, body)));
        }
        Err(SafeTxError::network(anyhow::anyhow!(
            "transaction service {} failed with {}: {}",
            what,
            status,
            body
        )))
    }

    fn descriptor_of(tx: &ServiceTransaction) -> Result<TransactionDescriptor> {
        Ok(TransactionDescriptor {
            version: DESCRIPTOR_VERSION,
            to: tx.to,
            value: tx.value,
            data: tx.data.clone().unwrap_or_default(),
            operation: OperationType::try_from(tx.operation)?,
            safe_tx_gas: tx.safe_tx_gas,
            base_gas: tx.base_gas,
            gas_price: tx.gas_price,
            gas_token: tx.gas_token.unwrap_or_default(),
            refund_receiver: tx.refund_receiver.unwrap_or_default(),
            nonce: tx.nonce,
        })
    }
}

#[async_trait]
impl PendingTransactionStore for TxServiceStore {
    async fn put(
        &self,
        proposal: &ProposedTransaction,
        proposer_signature: Option<&SafeSignature>,
    ) -> Result<()> {
        let signature = proposer_signature.ok_or_else(|| {
            SafeTxError::InvalidAction("transaction service requires a proposer signature".to_string())
        })?;
        let d = &proposal.descriptor;
        let body = ProposeBody {
            to: d.to,
            value: d.value.to_string(),
            data: (!d.data.is_empty()).then_some(&d.data),
            operation: u8::from(d.operation),
            safe_tx_gas: d.safe_tx_gas.to_string(),
            base_gas: d.base_gas.to_string(),
            gas_price: d.gas_price.to_string(),
            gas_token: d.gas_token,
            refund_receiver: d.refund_receiver,
            nonce: d.nonce.to_string(),
            contract_transaction_hash: proposal.signing_hash.to_string(),
            sender: signature.signer,
            signature: format!("0x{}", hex::encode(&signature.data)),
            origin: "safe-coordinator",
        };
        let url = format!("{}/api/v1/safes/{}/multisig-transactions/", self.base_url, ethers::utils::to_checksum(&proposal.safe, None));
        let response = self.client.post(&url).json(&body).send().await?;
        self.check(response, "propose").await?;
        info!(signing_hash = %proposal.signing_hash, sender = ?signature.signer, "Proposed transaction to service");
        Ok(())
    }

    async fn get(&self, signing_hash: SigningHash) -> Result<ProposedTransaction> {
        let url = format!("{}/api/v1/multisig-transactions/{}/", self.base_url, signing_hash);
        let response = self.client.get(&url).send().await?;
        let tx: ServiceTransaction = self.check(response, "get").await?.json().await?;

        let reported = SigningHash::from_str(&tx.safe_tx_hash)?;
        if reported != signing_hash {
            return Err(SafeTxError::InvalidAction(format!(
                "service returned {} for requested {}",
                reported, signing_hash
            )));
        }
        Ok(ProposedTransaction {
            safe: tx.safe,
            chain_id: self.chain_id,
            signing_hash,
            descriptor: Self::descriptor_of(&tx)?,
            proposer: tx.proposer,
            proposed_at: tx.submission_date.unwrap_or_else(Utc::now),
        })
    }

    async fn attach_signature(&self, signature: &SafeSignature) -> Result<()> {
        let url = format!(
            "{}/api/v1/multisig-transactions/{}/confirmations/",
            self.base_url, signature.signing_hash
        );
        let body = ConfirmBody { signature: format!("0x{}", hex::encode(&signature.data)) };
        let response = self.client.post(&url).json(&body).send().await?;
        self.check(response, "confirm").await?;
        debug!(signing_hash = %signature.signing_hash, signer = ?signature.signer, "Confirmation sent to service");
        Ok(())
    }

    async fn list_signatures(&self, signing_hash: SigningHash) -> Result<Vec<SafeSignature>> {
        let url = format!("{}/api/v1/multisig-transactions/{}/confirmations/", self.base_url, signing_hash);
        let response = self.client.get(&url).send().await?;
        let page: Page<ServiceConfirmation> = self.check(response, "list confirmations").await?.json().await?;

        let mut signatures = Vec::with_capacity(page.results.len());
        for confirmation in page.results {
            let Some(bytes) = confirmation.signature else {
                continue;
            };
            match SafeSignature::from_claimed(signing_hash, confirmation.owner, &bytes) {
                Ok(mut sig) => {
                    if let Some(date) = confirmation.submission_date {
                        sig.created_at = date;
                    }
                    signatures.push(sig);
                }
                Err(e) => warn!(owner = ?confirmation.owner, "Dropping unverifiable confirmation: {}", e),
            }
        }
        Ok(signatures)
    }

    async fn next_nonce(&self, safe: Address) -> Result<Option<U256>> {
        let checksummed = ethers::utils::to_checksum(&safe, None);
        let info_url = format!("{}/api/v1/safes/{}/", self.base_url, checksummed);
        let response = self.client.get(&info_url).send().await?;
        let info: SafeInfo = self.check(response, "safe info").await?.json().await?;

        let pending_url = format!(
            "{}/api/v1/safes/{}/multisig-transactions/?executed=false&ordering=-nonce&limit=1",
            self.base_url, checksummed
        );
        let response = self.client.get(&pending_url).send().await?;
        let pending: Page<NonceOnly> = self.check(response, "pending transactions").await?.json().await?;

        let next_pending = match pending.results.first() {
            Some(t) => Some(t.nonce.checked_add(U256::one()).ok_or_else(|| {
                SafeTxError::network(anyhow::anyhow!(
                    "transaction service reported implausible nonce {} for {}",
                    t.nonce,
                    checksummed
                ))
            })?),
            None => None,
        };
        Ok(Some(next_pending.map_or(info.nonce, |p| p.max(info.nonce))))
    }
}
