//! Owner signatures
//!
//! Parsing, signer recovery and on-chain packing of the 65-byte ECDSA
//! signatures a Safe account verifies.

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, RecoveryMessage, Signature as EcdsaSignature};
use ethers::utils::hash_message;
use serde::{Deserialize, Serialize};

use super::hash::SigningHash;
use crate::core::errors::{Result, SafeTxError};

pub const SIGNATURE_LEN: usize = 65;

/// How the signing hash was signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// Raw hash, v in {27, 28}
    Ecdsa,
    /// EIP-191 personal message over the hash, v in {31, 32}
    EthSign,
}

impl SignatureKind {
    fn from_v(v: u8) -> Result<Self> {
        match v {
            27 | 28 => Ok(SignatureKind::Ecdsa),
            31 | 32 => Ok(SignatureKind::EthSign),
            0 | 1 => Err(SafeTxError::InvalidSignature(
                "contract signatures and approved hashes are not supported".to_string(),
            )),
            other => Err(SafeTxError::InvalidSignature(format!("unsupported v value {}", other))),
        }
    }
}

/// A validated owner signature over one signing hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeSignature {
    pub signer: Address,
    pub signing_hash: SigningHash,
    /// r ‖ s ‖ v, exactly as passed to the account
    pub data: Bytes,
    pub kind: SignatureKind,
    pub created_at: DateTime<Utc>,
}

impl SafeSignature {
    /// Parse `bytes` and recover the signer over `signing_hash`.
    pub fn from_bytes(signing_hash: SigningHash, bytes: &[u8]) -> Result<Self> {
        let (signer, kind) = recover_signer(signing_hash, bytes)?;
        Ok(Self {
            signer,
            signing_hash,
            data: Bytes::from(bytes.to_vec()),
            kind,
            created_at: Utc::now(),
        })
    }

    /// Like `from_bytes`, but also checks the recovered signer against a claimed one.
    pub fn from_claimed(signing_hash: SigningHash, claimed: Address, bytes: &[u8]) -> Result<Self> {
        let sig = Self::from_bytes(signing_hash, bytes)?;
        if sig.signer != claimed {
            return Err(SafeTxError::InvalidSignature(format!(
                "signature recovers to {:?}, not claimed signer {:?}",
                sig.signer, claimed
            )));
        }
        Ok(sig)
    }

    /// Re-run recovery. Records read back from external stores go through this.
    pub fn verify(&self) -> Result<()> {
        let (recovered, kind) = recover_signer(self.signing_hash, &self.data)?;
        if recovered != self.signer || kind != self.kind {
            return Err(SafeTxError::InvalidSignature(format!(
                "stored signature for {:?} recovers to {:?}",
                self.signer, recovered
            )));
        }
        Ok(())
    }
}

/// Recover the signer of a 65-byte signature over `signing_hash`.
pub fn recover_signer(signing_hash: SigningHash, bytes: &[u8]) -> Result<(Address, SignatureKind)> {
    if bytes.len() != SIGNATURE_LEN {
        return Err(SafeTxError::InvalidSignature(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_LEN,
            bytes.len()
        )));
    }
    let kind = SignatureKind::from_v(bytes[64])?;
    let mut sig = EcdsaSignature::try_from(bytes)
        .map_err(|e| SafeTxError::InvalidSignature(e.to_string()))?;

    let message = match kind {
        SignatureKind::Ecdsa => RecoveryMessage::Hash(signing_hash.0),
        SignatureKind::EthSign => {
            sig.v -= 4;
            RecoveryMessage::Hash(hash_message(signing_hash.as_bytes()))
        }
    };
    let signer = sig
        .recover(message)
        .map_err(|e| SafeTxError::InvalidSignature(format!("recovery failed: {}", e)))?;
    Ok((signer, kind))
}

/// Concatenate signatures in the order given. Callers pass them sorted by signer.
pub fn encode_signatures(signatures: &[SafeSignature]) -> Bytes {
    let mut out = Vec::with_capacity(signatures.len() * SIGNATURE_LEN);
    for sig in signatures {
        out.extend_from_slice(&sig.data);
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::H256;
    use test_case::test_case;

    fn wallet(seed: u8) -> LocalWallet {
        LocalWallet::from_bytes(&[seed; 32]).unwrap()
    }

    fn hash() -> SigningHash {
        SigningHash(H256::repeat_byte(0x42))
    }

    #[test]
    fn test_recover_raw_ecdsa() {
        let w = wallet(1);
        let sig = w.sign_hash(hash().0).unwrap();
        let parsed = SafeSignature::from_bytes(hash(), &sig.to_vec()).unwrap();
        assert_eq!(parsed.signer, w.address());
        assert_eq!(parsed.kind, SignatureKind::Ecdsa);
        assert!(parsed.verify().is_ok());
    }

    #[test]
    fn test_recover_eth_sign() {
        let w = wallet(2);
        let mut sig = w.sign_hash(hash_message(hash().as_bytes())).unwrap();
        sig.v += 4;
        let parsed = SafeSignature::from_bytes(hash(), &sig.to_vec()).unwrap();
        assert_eq!(parsed.signer, w.address());
        assert_eq!(parsed.kind, SignatureKind::EthSign);
    }

    #[test]
    fn test_wrong_hash_recovers_other_address() {
        let w = wallet(3);
        let sig = w.sign_hash(H256::repeat_byte(0x01)).unwrap();
        let parsed = SafeSignature::from_bytes(hash(), &sig.to_vec()).unwrap();
        assert_ne!(parsed.signer, w.address());
        assert!(SafeSignature::from_claimed(hash(), w.address(), &sig.to_vec()).is_err());
    }

    #[test_case(27 => Some(SignatureKind::Ecdsa); "ecdsa low")]
    #[test_case(28 => Some(SignatureKind::Ecdsa); "ecdsa high")]
    #[test_case(31 => Some(SignatureKind::EthSign); "eth_sign low")]
    #[test_case(32 => Some(SignatureKind::EthSign); "eth_sign high")]
    #[test_case(0 => None; "contract signature")]
    #[test_case(1 => None; "approved hash")]
    #[test_case(29 => None; "out of range")]
    fn test_kind_from_v(v: u8) -> Option<SignatureKind> {
        SignatureKind::from_v(v).ok()
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(matches!(
            recover_signer(hash(), &[0u8; 64]),
            Err(SafeTxError::InvalidSignature(_))
        ));
        let mut contract_sig = [0u8; 65];
        contract_sig[64] = 0;
        assert!(recover_signer(hash(), &contract_sig).is_err());
        let mut bad_v = [1u8; 65];
        bad_v[64] = 29;
        assert!(recover_signer(hash(), &bad_v).is_err());
    }

    #[test]
    fn test_tampered_record_fails_verify() {
        let w = wallet(4);
        let sig = w.sign_hash(hash().0).unwrap();
        let mut parsed = SafeSignature::from_bytes(hash(), &sig.to_vec()).unwrap();
        parsed.signer = Address::repeat_byte(0x99);
        assert!(parsed.verify().is_err());
    }

    #[test]
    fn test_encode_signatures_concatenates() {
        let a = SafeSignature::from_bytes(hash(), &wallet(5).sign_hash(hash().0).unwrap().to_vec()).unwrap();
        let b = SafeSignature::from_bytes(hash(), &wallet(6).sign_hash(hash().0).unwrap().to_vec()).unwrap();
        let packed = encode_signatures(&[a.clone(), b.clone()]);
        assert_eq!(packed.len(), 130);
        assert_eq!(&packed[..65], &a.data[..]);
        assert_eq!(&packed[65..], &b.data[..]);
    }
}
