//! Signature collection
//!
//! Signers attach from independent processes; the only shared state is the
//! pending transaction store. Attachment is last-write-wins per signer, so
//! concurrent attaches converge regardless of arrival order.

use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::hash::SigningHash;
use super::policy::OwnerPolicy;
use super::signing::SafeSignature;
use crate::blockchain::traits::ChainClient;
use crate::core::errors::{Result, SafeTxError};
use crate::storage::{PendingTransactionStore, ProposedTransaction};

/// Signatures over one signing hash, at most one per signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSet {
    signing_hash: SigningHash,
    signatures: Vec<SafeSignature>,
}

impl SignatureSet {
    pub fn empty(signing_hash: SigningHash) -> Self {
        Self { signing_hash, signatures: Vec::new() }
    }

    /// Merge `signatures` into a set. Later entries replace earlier ones from
    /// the same signer unless strictly older.
    pub fn new(signing_hash: SigningHash, signatures: Vec<SafeSignature>) -> Self {
        let mut set = Self::empty(signing_hash);
        for sig in signatures {
            set.merge(sig);
        }
        set
    }

    /// Last-write-wins merge. Ties on timestamp are broken on the signature
    /// bytes so every replica keeps the same entry.
    pub fn merge(&mut self, signature: SafeSignature) {
        match self.signatures.iter_mut().find(|s| s.signer == signature.signer) {
            Some(existing) => {
                let newer = (signature.created_at, &signature.data[..])
                    >= (existing.created_at, &existing.data[..]);
                if newer {
                    *existing = signature;
                }
            }
            None => self.signatures.push(signature),
        }
    }

    pub fn signing_hash(&self) -> SigningHash {
        self.signing_hash
    }

    pub fn signatures(&self) -> &[SafeSignature] {
        &self.signatures
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn signers(&self) -> Vec<Address> {
        self.signatures.iter().map(|s| s.signer).collect()
    }

    pub fn contains(&self, signer: &Address) -> bool {
        self.signatures.iter().any(|s| &s.signer == signer)
    }

    /// Owner-list order; signers no longer on the list go last, by address.
    pub fn order_by_owners(&mut self, policy: &OwnerPolicy) {
        self.signatures
            .sort_by_key(|s| (policy.owner_index(&s.signer).unwrap_or(usize::MAX), s.signer));
    }
}

/// Verifies and accumulates owner signatures through the shared store
pub struct SignatureCollector {
    store: Arc<dyn PendingTransactionStore>,
    chain: Arc<dyn ChainClient>,
}

impl SignatureCollector {
    pub fn new(store: Arc<dyn PendingTransactionStore>, chain: Arc<dyn ChainClient>) -> Self {
        Self { store, chain }
    }

    /// Fetch a proposal and check it still hashes to its key on this chain.
    pub async fn proposal(&self, signing_hash: SigningHash) -> Result<ProposedTransaction> {
        let proposal = self.store.get(signing_hash).await?;
        if proposal.signing_hash != signing_hash {
            return Err(SafeTxError::InvalidAction(format!(
                "store returned {} for {}",
                proposal.signing_hash, signing_hash
            )));
        }
        proposal.verify(self.chain.chain_id())?;
        Ok(proposal)
    }

    /// Recover the signer of `signature`, check it against the account's
    /// current owners, persist it and return the accumulated set.
    pub async fn attach(&self, signing_hash: SigningHash, signature: &[u8]) -> Result<SignatureSet> {
        let proposal = self.proposal(signing_hash).await?;
        let signature = SafeSignature::from_bytes(signing_hash, signature)?;

        let policy = self.chain.owner_policy(proposal.safe).await?;
        policy.check()?;
        if !policy.is_owner(&signature.signer) {
            return Err(SafeTxError::InvalidSignature(format!(
                "{:?} is not an owner of {:?}",
                signature.signer, proposal.safe
            )));
        }

        self.store.attach_signature(&signature).await?;
        info!(
            signing_hash = %signing_hash,
            signer = ?signature.signer,
            kind = ?signature.kind,
            "Signature attached"
        );

        self.signatures_for(signing_hash, &policy).await
    }

    /// Current set for `signing_hash`, ordered by the account's owner list.
    pub async fn collect(&self, signing_hash: SigningHash) -> Result<SignatureSet> {
        let proposal = self.proposal(signing_hash).await?;
        let policy = self.chain.owner_policy(proposal.safe).await?;
        policy.check()?;
        self.signatures_for(signing_hash, &policy).await
    }

    /// Read back from the store, dropping anything that no longer verifies.
    pub async fn signatures_for(
        &self,
        signing_hash: SigningHash,
        policy: &OwnerPolicy,
    ) -> Result<SignatureSet> {
        let stored = self.store.list_signatures(signing_hash).await?;
        let verified = stored
            .into_iter()
            .filter(|sig| {
                if sig.signing_hash != signing_hash {
                    warn!(signer = ?sig.signer, "Dropping signature over a different hash");
                    return false;
                }
                match sig.verify() {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(signer = ?sig.signer, "Dropping stored signature: {}", e);
                        false
                    }
                }
            })
            .collect();

        let mut set = SignatureSet::new(signing_hash, verified);
        set.order_by_owners(policy);
        debug!(signing_hash = %signing_hash, collected = set.len(), "Signature set loaded");
        Ok(set)
    }
}
