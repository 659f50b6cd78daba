//! Multisig transaction lifecycle
//!
//! ## Module layout
//! - `action` - caller intent and MultiSend batching
//! - `transaction` - canonical transaction descriptor
//! - `hash` - EIP-712 signing hash
//! - `signing` - owner signature recovery and packing
//! - `collector` - per-signer signature accumulation
//! - `policy` - owner policy and threshold validation

pub mod action;
pub mod collector;
pub mod hash;
pub mod policy;
pub mod signing;
pub mod transaction;

pub use action::{Action, ExecutionOptions, OperationType};
pub use collector::{SignatureCollector, SignatureSet};
pub use hash::{digest, SigningHash};
pub use policy::{validate, OwnerPolicy, ValidationResult};
pub use signing::{SafeSignature, SignatureKind};
pub use transaction::{encode, AccountDefaults, TransactionDescriptor};
