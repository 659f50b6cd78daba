//! Pending transaction store
//!
//! Durable, shared record of proposed descriptors and the signatures attached
//! to them, keyed by signing hash. Implementations provide atomic per-key
//! writes; nothing here assumes cross-key transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SafeTxError};
use crate::multisig::hash::{digest, SigningHash};
use crate::multisig::signing::SafeSignature;
use crate::multisig::transaction::TransactionDescriptor;

mod memory;
mod tx_service;

pub use memory::MemoryStore;
pub use tx_service::TxServiceStore;

/// A descriptor as proposed against one account on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedTransaction {
    pub safe: Address,
    pub chain_id: u64,
    pub signing_hash: SigningHash,
    pub descriptor: TransactionDescriptor,
    pub proposer: Option<Address>,
    pub proposed_at: DateTime<Utc>,
}

impl ProposedTransaction {
    /// Re-derive the signing hash from the stored fields. A record whose
    /// descriptor no longer hashes to its key is a different transaction.
    pub fn verify(&self, chain_id: u64) -> Result<()> {
        if self.chain_id != chain_id {
            return Err(SafeTxError::InvalidAction(format!(
                "proposal {} belongs to chain {}, not {}",
                self.signing_hash, self.chain_id, chain_id
            )));
        }
        let derived = digest(self.safe, chain_id, &self.descriptor);
        if derived != self.signing_hash {
            return Err(SafeTxError::InvalidAction(format!(
                "stored descriptor hashes to {}, expected {}",
                derived, self.signing_hash
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait PendingTransactionStore: Send + Sync {
    /// Record a proposal. Stores that require a first signature with the
    /// proposal (the transaction service does) take it from `proposer_signature`.
    async fn put(
        &self,
        proposal: &ProposedTransaction,
        proposer_signature: Option<&SafeSignature>,
    ) -> Result<()>;

    /// Fetch a proposal. `SafeTxError::NotFound` when unknown.
    async fn get(&self, signing_hash: SigningHash) -> Result<ProposedTransaction>;

    /// Attach a signature, replacing any earlier one from the same signer.
    async fn attach_signature(&self, signature: &SafeSignature) -> Result<()>;

    async fn list_signatures(&self, signing_hash: SigningHash) -> Result<Vec<SafeSignature>>;

    /// Next unused nonce according to pending proposals, if the store knows any.
    async fn next_nonce(&self, safe: Address) -> Result<Option<U256>>;
}
