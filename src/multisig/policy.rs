//! Threshold policy
//!
//! N-of-M owner policy read from the account, and the pure validation pass
//! that gates dispatch.

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use super::collector::SignatureSet;
use super::signing::SafeSignature;
use crate::core::errors::{Result, SafeTxError};

/// Ordered owner set plus threshold, as currently configured on the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerPolicy {
    pub owners: Vec<Address>,
    pub threshold: usize,
}

impl OwnerPolicy {
    /// Build a policy, rejecting empty, duplicated or out-of-range configurations.
    pub fn new(owners: Vec<Address>, threshold: usize) -> Result<Self> {
        let policy = Self { owners, threshold };
        policy.check()?;
        Ok(policy)
    }

    /// Re-check a policy received from an external source.
    pub fn check(&self) -> Result<()> {
        if self.owners.is_empty() {
            return Err(SafeTxError::InvalidAction("owner list cannot be empty".to_string()));
        }
        if self.threshold == 0 {
            return Err(SafeTxError::InvalidAction("threshold must be at least 1".to_string()));
        }
        if self.threshold > self.owners.len() {
            return Err(SafeTxError::InvalidAction(format!(
                "threshold ({}) cannot exceed owner count ({})",
                self.threshold,
                self.owners.len()
            )));
        }
        let unique: HashSet<&Address> = self.owners.iter().collect();
        if unique.len() != self.owners.len() {
            return Err(SafeTxError::InvalidAction("duplicate owner".to_string()));
        }
        Ok(())
    }

    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }

    /// Position in the owner list, used to order collected signatures.
    pub fn owner_index(&self, address: &Address) -> Option<usize> {
        self.owners.iter().position(|o| o == address)
    }
}

/// Outcome of a validation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Threshold met. Signatures sorted ascending by signer address, as the
    /// account's on-chain check requires.
    Satisfied(Vec<SafeSignature>),
    Insufficient { missing: usize },
}

impl ValidationResult {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, ValidationResult::Satisfied(_))
    }

    /// Signatures ready for dispatch, or `Insufficient` as an error.
    pub fn into_signatures(self) -> Result<Vec<SafeSignature>> {
        match self {
            ValidationResult::Satisfied(sigs) => Ok(sigs),
            ValidationResult::Insufficient { missing } => Err(SafeTxError::Insufficient { missing }),
        }
    }
}

/// Count only signatures whose signer is an owner right now.
///
/// Signers removed between collection and validation do not count; the set
/// may still be growing while this runs.
pub fn validate(policy: &OwnerPolicy, set: &SignatureSet) -> ValidationResult {
    let mut seen = HashSet::new();
    let mut counted: Vec<SafeSignature> = set
        .signatures()
        .iter()
        .filter(|sig| sig.signing_hash == set.signing_hash())
        .filter(|sig| policy.is_owner(&sig.signer))
        .filter(|sig| seen.insert(sig.signer))
        .cloned()
        .collect();

    debug!(
        signing_hash = %set.signing_hash(),
        counted = counted.len(),
        threshold = policy.threshold,
        "Validated signature set"
    );

    if counted.len() >= policy.threshold {
        counted.sort_by_key(|sig| sig.signer);
        ValidationResult::Satisfied(counted)
    } else {
        ValidationResult::Insufficient { missing: policy.threshold - counted.len() }
    }
}
