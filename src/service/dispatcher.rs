//! Dispatch of approved transactions
//!
//! The only irreversible step of the lifecycle. At most one successful
//! dispatch per (account, nonce) is allowed from this process, and a nonce
//! the account has already consumed is never dispatched again.

use ethers::types::{Address, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::blockchain::contracts;
use crate::blockchain::relay::relay_gas_limit;
use crate::blockchain::traits::{ChainClient, RelayGateway, RelayRequest, Simulation, SubmittedTransaction};
use crate::core::errors::{Result, SafeTxError};
use crate::multisig::action::ExecutionOptions;
use crate::multisig::signing::{encode_signatures, SafeSignature};
use crate::multisig::transaction::TransactionDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchMode {
    /// Submit `execTransaction` from the configured executor account
    Direct,
    /// Hand the call to the relay gateway
    Relayed(ExecutionOptions),
}

impl DispatchMode {
    pub fn sponsored() -> Self {
        DispatchMode::Relayed(ExecutionOptions { gas_limit: None, is_sponsored: true })
    }
}

/// Terminal record of one successful dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Accepted by the chain node; carries the transaction hash and status
    Direct(SubmittedTransaction),
    /// Accepted by the relay; poll the gateway with `task_id`
    Relayed { task_id: String },
}

impl ExecutionOutcome {
    /// Transaction hash or relay task id
    pub fn reference(&self) -> String {
        match self {
            ExecutionOutcome::Direct(tx) => format!("{:?}", tx.tx_hash),
            ExecutionOutcome::Relayed { task_id } => task_id.clone(),
        }
    }
}

type Ledger = Mutex<HashSet<(Address, U256)>>;

/// Holds an (account, nonce) slot for the duration of one dispatch.
/// Released on drop unless the dispatch committed.
struct Reservation<'a> {
    ledger: &'a Ledger,
    key: (Address, U256),
    committed: bool,
}

impl<'a> Reservation<'a> {
    fn acquire(ledger: &'a Ledger, safe: Address, nonce: U256) -> Result<Self> {
        if !ledger.lock().insert((safe, nonce)) {
            return Err(SafeTxError::NotDispatchable(format!(
                "nonce {} of {:?} was already dispatched",
                nonce, safe
            )));
        }
        Ok(Self { ledger, key: (safe, nonce), committed: false })
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.ledger.lock().remove(&self.key);
        }
    }
}

pub struct Dispatcher {
    chain: Arc<dyn ChainClient>,
    relay: Option<Arc<dyn RelayGateway>>,
    dispatched: Ledger,
}

impl Dispatcher {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain, relay: None, dispatched: Mutex::new(HashSet::new()) }
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayGateway>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Execute an approved descriptor. `signatures` must be sorted ascending
    /// by signer, as produced by the threshold validator.
    pub async fn execute(
        &self,
        safe: Address,
        descriptor: &TransactionDescriptor,
        signatures: &[SafeSignature],
        mode: DispatchMode,
    ) -> Result<ExecutionOutcome> {
        if signatures.is_empty() {
            return Err(SafeTxError::Insufficient { missing: 1 });
        }
        if signatures.windows(2).any(|w| w[0].signer >= w[1].signer) {
            return Err(SafeTxError::InvalidSignature(
                "signatures must be sorted by signer with no duplicates".to_string(),
            ));
        }
        let relay = match &mode {
            DispatchMode::Relayed(_) => Some(self.relay.clone().ok_or_else(|| {
                SafeTxError::ConfigError("relayed execution needs a relay gateway".to_string())
            })?),
            DispatchMode::Direct => None,
        };
        if let DispatchMode::Relayed(options) = &mode {
            if !options.is_sponsored && !settles_relay_fee(descriptor) {
                return Err(SafeTxError::InvalidAction(
                    "sync-fee relaying needs a non-zero gasPrice and an explicit refundReceiver".to_string(),
                ));
            }
        }

        let reservation = Reservation::acquire(&self.dispatched, safe, descriptor.nonce)?;

        let current = self.chain.nonce(safe).await?;
        if descriptor.nonce < current {
            return Err(SafeTxError::NotDispatchable(format!(
                "nonce {} already used, {:?} is at {}",
                descriptor.nonce, safe, current
            )));
        }

        let packed = encode_signatures(signatures);
        let outcome = match (mode, relay) {
            (DispatchMode::Relayed(options), Some(relay)) => {
                let request = RelayRequest {
                    chain_id: self.chain.chain_id(),
                    target: safe,
                    data: contracts::exec_transaction(descriptor, &packed),
                    sponsored: options.is_sponsored,
                    gas_limit: options.gas_limit.or_else(|| relay_gas_limit(descriptor.safe_tx_gas)),
                    fee_token: (!descriptor.gas_token.is_zero()).then_some(descriptor.gas_token),
                };
                let task_id = relay.submit(&request).await?;
                ExecutionOutcome::Relayed { task_id }
            }
            _ => {
                if let Simulation::Revert(reason) = self.chain.simulate(safe, descriptor, &packed).await? {
                    warn!(safe = ?safe, nonce = %descriptor.nonce, reason = %reason, "Dry run reverted, not submitting");
                    return Err(SafeTxError::WouldRevert(reason));
                }
                ExecutionOutcome::Direct(self.chain.submit(safe, descriptor, &packed).await?)
            }
        };

        reservation.commit();
        info!(
            safe = ?safe,
            nonce = %descriptor.nonce,
            signatures = signatures.len(),
            reference = %outcome.reference(),
            "Transaction dispatched"
        );
        Ok(outcome)
    }
}

/// A sync-fee relay is paid by the Safe refund. A zero refund receiver would
/// pay `tx.origin`, which is the relay executor rather than its fee collector.
fn settles_relay_fee(descriptor: &TransactionDescriptor) -> bool {
    descriptor.pays_refund() && !descriptor.refund_receiver.is_zero()
}
