//! In-memory store (single process, tests and local runs)

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{PendingTransactionStore, ProposedTransaction};
use crate::core::errors::{Result, SafeTxError};
use crate::multisig::hash::SigningHash;
use crate::multisig::signing::SafeSignature;

struct Entry {
    proposal: ProposedTransaction,
    /// Arrival order preserved; one entry per signer
    signatures: Vec<SafeSignature>,
}

/// In-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<SigningHash, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn upsert(signatures: &mut Vec<SafeSignature>, signature: &SafeSignature) {
    match signatures.iter_mut().find(|s| s.signer == signature.signer) {
        Some(existing) => *existing = signature.clone(),
        None => signatures.push(signature.clone()),
    }
}

#[async_trait]
impl PendingTransactionStore for MemoryStore {
    async fn put(
        &self,
        proposal: &ProposedTransaction,
        proposer_signature: Option<&SafeSignature>,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(proposal.signing_hash).or_insert_with(|| {
            info!(signing_hash = %proposal.signing_hash, safe = ?proposal.safe, "Proposal stored in memory");
            Entry { proposal: proposal.clone(), signatures: Vec::new() }
        });
        if let Some(sig) = proposer_signature {
            upsert(&mut entry.signatures, sig);
        }
        Ok(())
    }

    async fn get(&self, signing_hash: SigningHash) -> Result<ProposedTransaction> {
        let entries = self.entries.read().await;
        entries
            .get(&signing_hash)
            .map(|e| e.proposal.clone())
            .ok_or_else(|| SafeTxError::NotFound(format!("no proposal for {}", signing_hash)))
    }

    async fn attach_signature(&self, signature: &SafeSignature) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&signature.signing_hash).ok_or_else(|| {
            SafeTxError::NotFound(format!("no proposal for {}", signature.signing_hash))
        })?;
        upsert(&mut entry.signatures, signature);
        debug!(
            signing_hash = %signature.signing_hash,
            signer = ?signature.signer,
            total = entry.signatures.len(),
            "Signature stored in memory"
        );
        Ok(())
    }

    async fn list_signatures(&self, signing_hash: SigningHash) -> Result<Vec<SafeSignature>> {
        let entries = self.entries.read().await;
        entries
            .get(&signing_hash)
            .map(|e| e.signatures.clone())
            .ok_or_else(|| SafeTxError::NotFound(format!("no proposal for {}", signing_hash)))
    }

    async fn next_nonce(&self, safe: Address) -> Result<Option<U256>> {
        let entries = self.entries.read().await;
        let mut next: Option<U256> = None;
        for entry in entries.values().filter(|e| e.proposal.safe == safe) {
            let nonce = entry.proposal.descriptor.nonce;
            let successor = nonce.checked_add(U256::one()).ok_or_else(|| {
                SafeTxError::InvalidAction(format!(
                    "proposal {} has nonce {} with no successor",
                    entry.proposal.signing_hash, nonce
                ))
            })?;
            next = Some(next.map_or(successor, |n| n.max(successor)));
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multisig::action::Action;
    use crate::multisig::hash::digest;
    use crate::multisig::transaction::{encode, AccountDefaults};
    use chrono::Utc;
    use ethers::signers::{LocalWallet, Signer};

    fn proposal(nonce: u64) -> ProposedTransaction {
        let safe = Address::repeat_byte(0x5a);
        let action = Action::call(format!("{:?}", Address::repeat_byte(0x01)), "0", vec![1u8]);
        let descriptor = encode(&action, U256::from(nonce), &AccountDefaults::default()).unwrap();
        ProposedTransaction {
            safe,
            chain_id: 5,
            signing_hash: digest(safe, 5, &descriptor),
            descriptor,
            proposer: None,
            proposed_at: Utc::now(),
        }
    }

    fn sign(seed: u8, hash: SigningHash) -> SafeSignature {
        let w = LocalWallet::from_bytes(&[seed; 32]).unwrap();
        SafeSignature::from_bytes(hash, &w.sign_hash(hash.0).unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryStore::new();
        let p = proposal(3);
        store.put(&p, None).await.unwrap();
        assert_eq!(store.get(p.signing_hash).await.unwrap(), p);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = MemoryStore::new();
        let res = store.get(proposal(1).signing_hash).await;
        assert!(matches!(res, Err(SafeTxError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_attach_replaces_per_signer() {
        let store = MemoryStore::new();
        let p = proposal(3);
        store.put(&p, Some(&sign(1, p.signing_hash))).await.unwrap();
        store.attach_signature(&sign(2, p.signing_hash)).await.unwrap();
        store.attach_signature(&sign(1, p.signing_hash)).await.unwrap();
        let sigs = store.list_signatures(p.signing_hash).await.unwrap();
        assert_eq!(sigs.len(), 2);
    }

    #[tokio::test]
    async fn test_next_nonce() {
        let store = MemoryStore::new();
        let safe = proposal(0).safe;
        assert_eq!(store.next_nonce(safe).await.unwrap(), None);
        store.put(&proposal(4), None).await.unwrap();
        store.put(&proposal(2), None).await.unwrap();
        assert_eq!(store.next_nonce(safe).await.unwrap(), Some(U256::from(5u64)));
        assert_eq!(store.next_nonce(Address::zero()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_next_nonce_at_max_is_error() {
        let store = MemoryStore::new();
        let mut p = proposal(0);
        p.descriptor.nonce = U256::MAX;
        p.signing_hash = digest(p.safe, 5, &p.descriptor);
        store.put(&p, None).await.unwrap();
        let res = store.next_nonce(p.safe).await;
        assert!(matches!(res, Err(SafeTxError::InvalidAction(_))));
    }

    #[test]
    fn test_proposal_verify_detects_tampering() {
        let mut p = proposal(3);
        assert!(p.verify(5).is_ok());
        assert!(matches!(p.verify(1), Err(SafeTxError::InvalidAction(_))));
        p.descriptor.nonce = U256::from(4u64);
        assert!(matches!(p.verify(5), Err(SafeTxError::InvalidAction(_))));
    }
}
