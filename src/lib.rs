// src/lib.rs
//! Multisig transaction coordination for Safe smart accounts.
//!
//! Canonical encoding, EIP-712 signing hashes, signature collection through
//! a shared pending-transaction store, threshold validation against the
//! account's current owners, and direct or relayed dispatch.

pub mod blockchain;
pub mod core;
pub mod crypto;
pub mod multisig;
pub mod service;
pub mod storage;

pub use crate::core::config::CoordinatorConfig;
pub use crate::core::errors::{Result, SafeTxError};
pub use crate::multisig::{Action, SigningHash};
pub use crate::service::{DispatchMode, ExecutionOutcome, SafeCoordinator, TransactionState};
