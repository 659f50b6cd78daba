use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::multisig::policy::OwnerPolicy;
use crate::multisig::transaction::TransactionDescriptor;

/// Represents the status of a standard blockchain transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    Unknown,
}

/// Result of a dry-run against current chain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Simulation {
    Success,
    Revert(String),
}

/// A transaction accepted by the chain node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTransaction {
    pub tx_hash: H256,
    pub status: TransactionStatus,
}

/// Chain access the lifecycle needs. Every value returned crosses an
/// untyped boundary and is re-checked by the caller.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Current owners and threshold of `safe`.
    async fn owner_policy(&self, safe: Address) -> Result<OwnerPolicy>;

    /// Next nonce the account will accept.
    async fn nonce(&self, safe: Address) -> Result<U256>;

    /// Dry-run `execTransaction` without submitting.
    async fn simulate(
        &self,
        safe: Address,
        descriptor: &TransactionDescriptor,
        signatures: &Bytes,
    ) -> Result<Simulation>;

    /// Submit `execTransaction`. Returns once the node has accepted it.
    async fn submit(
        &self,
        safe: Address,
        descriptor: &TransactionDescriptor,
        signatures: &Bytes,
    ) -> Result<SubmittedTransaction>;

    /// Retrieves the status of a transaction given its hash.
    async fn transaction_status(&self, tx_hash: H256) -> Result<TransactionStatus>;

    /// Read-only contract call.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
}

/// A call handed to the relay network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub chain_id: u64,
    pub target: Address,
    pub data: Bytes,
    /// Sponsor pays. Otherwise fees are paid from the call itself in `fee_token`.
    pub sponsored: bool,
    pub gas_limit: Option<U256>,
    pub fee_token: Option<Address>,
}

/// Relay task lifecycle as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayTaskState {
    Pending,
    Executed { tx_hash: Option<H256> },
    Cancelled { reason: Option<String> },
    Reverted { reason: Option<String> },
}

impl RelayTaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayTaskState::Pending)
    }
}

/// Fee-sponsoring relay. Constrained to one call target and an opaque payload.
#[async_trait]
pub trait RelayGateway: Send + Sync {
    /// Returns the relay correlation id.
    async fn submit(&self, request: &RelayRequest) -> Result<String>;

    async fn task_status(&self, task_id: &str) -> Result<RelayTaskState>;
}
