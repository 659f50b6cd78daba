//! Transaction lifecycle
//!
//! One state machine for every workflow: propose, confirm, execute (direct
//! or relayed), plus sponsored account deployment. All state lives in the
//! pending transaction store and on chain; the coordinator only keeps the
//! outcomes of dispatches it performed itself.

use chrono::Utc;
use ethers::types::{Address, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::dispatcher::{DispatchMode, Dispatcher, ExecutionOutcome};
use crate::blockchain::contracts;
use crate::blockchain::deployment::{
    encode_create_proxy_with_nonce, encode_setup_call_data, predict_safe_address, SafeAccountConfig,
};
use crate::blockchain::traits::{ChainClient, RelayGateway, RelayRequest, RelayTaskState};
use crate::core::config::{ContractsConfig, CoordinatorConfig};
use crate::core::errors::{Result, SafeTxError};
use crate::crypto::signer::SigningBackend;
use crate::multisig::action::{Action, ExecutionOptions};
use crate::multisig::collector::{SignatureCollector, SignatureSet};
use crate::multisig::hash::{digest, SigningHash};
use crate::multisig::policy::{validate, ValidationResult};
use crate::multisig::transaction::{encode, AccountDefaults};
use crate::storage::{PendingTransactionStore, ProposedTransaction};

/// Where a proposed transaction stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransactionState {
    /// Stored, no valid owner signature yet
    Proposed,
    Collecting { collected: usize, threshold: usize },
    Satisfied { collected: usize, threshold: usize },
    Dispatched { outcome: ExecutionOutcome },
}

/// A sponsored deployment handed to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub address: Address,
    pub task_id: String,
}

pub struct SafeCoordinator {
    safe: Address,
    defaults: AccountDefaults,
    contracts: ContractsConfig,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn PendingTransactionStore>,
    relay: Option<Arc<dyn RelayGateway>>,
    collector: SignatureCollector,
    dispatcher: Dispatcher,
    outcomes: Mutex<HashMap<SigningHash, ExecutionOutcome>>,
}

impl SafeCoordinator {
    pub fn new(
        safe: Address,
        defaults: AccountDefaults,
        contracts: ContractsConfig,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn PendingTransactionStore>,
    ) -> Self {
        Self {
            safe,
            defaults,
            contracts,
            collector: SignatureCollector::new(store.clone(), chain.clone()),
            dispatcher: Dispatcher::new(chain.clone()),
            chain,
            store,
            relay: None,
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: &CoordinatorConfig,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn PendingTransactionStore>,
    ) -> Self {
        Self::new(
            config.safe.address,
            config.safe.defaults.clone(),
            config.contracts.clone(),
            chain,
            store,
        )
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayGateway>) -> Self {
        self.dispatcher = self.dispatcher.with_relay(relay.clone());
        self.relay = Some(relay);
        self
    }

    pub fn safe(&self) -> Address {
        self.safe
    }

    /// Pack several actions into one MultiSend delegate call.
    pub fn batch(&self, actions: Vec<Action>, options: ExecutionOptions) -> Result<Action> {
        Action::batch(actions, self.contracts.multi_send, options)
    }

    /// First nonce neither the account nor a pending proposal has used.
    /// Advisory only: concurrent proposers can pick the same value.
    pub async fn next_nonce(&self) -> Result<U256> {
        let on_chain = self.chain.nonce(self.safe).await?;
        let pending = self.store.next_nonce(self.safe).await?;
        Ok(pending.map_or(on_chain, |p| p.max(on_chain)))
    }

    /// Encode, hash and store `action`, with the proposer's signature attached.
    pub async fn propose(
        &self,
        action: &Action,
        proposer: &dyn SigningBackend,
        nonce: Option<U256>,
    ) -> Result<ProposedTransaction> {
        let nonce = match nonce {
            Some(n) => n,
            None => self.next_nonce().await?,
        };
        let descriptor = encode(action, nonce, &self.defaults)?;
        let signing_hash = digest(self.safe, self.chain.chain_id(), &descriptor);

        let policy = self.chain.owner_policy(self.safe).await?;
        if !policy.is_owner(&proposer.address()) {
            return Err(SafeTxError::InvalidSignature(format!(
                "proposer {:?} is not an owner of {:?}",
                proposer.address(),
                self.safe
            )));
        }
        let signature = proposer.sign_hash(signing_hash).await?;
        signature.verify()?;
        if signature.signer != proposer.address() || signature.signing_hash != signing_hash {
            return Err(SafeTxError::InvalidSignature(
                "signing backend returned a signature for another signer or hash".to_string(),
            ));
        }

        let proposal = ProposedTransaction {
            safe: self.safe,
            chain_id: self.chain.chain_id(),
            signing_hash,
            descriptor,
            proposer: Some(proposer.address()),
            proposed_at: Utc::now(),
        };
        self.store.put(&proposal, Some(&signature)).await?;
        info!(
            signing_hash = %signing_hash,
            safe = ?self.safe,
            nonce = %nonce,
            proposer = ?proposer.address(),
            "Transaction proposed"
        );
        Ok(proposal)
    }

    /// Sign a stored proposal with `signer` and attach the signature.
    pub async fn confirm(&self, signing_hash: SigningHash, signer: &dyn SigningBackend) -> Result<SignatureSet> {
        // fail on unknown or tampered proposals before producing a signature
        self.collector.proposal(signing_hash).await?;
        let signature = signer.sign_hash(signing_hash).await?;
        self.collector.attach(signing_hash, &signature.data).await
    }

    /// Attach a signature produced elsewhere.
    pub async fn add_signature(&self, signing_hash: SigningHash, signature: &[u8]) -> Result<SignatureSet> {
        self.collector.attach(signing_hash, signature).await
    }

    pub async fn status(&self, signing_hash: SigningHash) -> Result<TransactionState> {
        let dispatched = self.outcomes.lock().get(&signing_hash).cloned();
        if let Some(outcome) = dispatched {
            return Ok(TransactionState::Dispatched { outcome });
        }
        let proposal = self.collector.proposal(signing_hash).await?;
        let policy = self.chain.owner_policy(proposal.safe).await?;
        policy.check()?;
        let set = self.collector.signatures_for(signing_hash, &policy).await?;

        Ok(match validate(&policy, &set) {
            ValidationResult::Satisfied(sigs) => {
                TransactionState::Satisfied { collected: sigs.len(), threshold: policy.threshold }
            }
            ValidationResult::Insufficient { missing } if missing == policy.threshold => {
                TransactionState::Proposed
            }
            ValidationResult::Insufficient { missing } => TransactionState::Collecting {
                collected: policy.threshold - missing,
                threshold: policy.threshold,
            },
        })
    }

    /// Validate against the account's current policy and dispatch.
    /// `Insufficient` is returned before anything is submitted.
    pub async fn execute(&self, signing_hash: SigningHash, mode: DispatchMode) -> Result<ExecutionOutcome> {
        let proposal = self.collector.proposal(signing_hash).await?;
        let policy = self.chain.owner_policy(proposal.safe).await?;
        policy.check()?;
        let set = self.collector.signatures_for(signing_hash, &policy).await?;
        let signatures = validate(&policy, &set).into_signatures()?;

        let outcome = self
            .dispatcher
            .execute(proposal.safe, &proposal.descriptor, &signatures, mode)
            .await?;
        self.outcomes.lock().insert(signing_hash, outcome.clone());
        Ok(outcome)
    }

    pub async fn relay_status(&self, task_id: &str) -> Result<RelayTaskState> {
        self.relay()?.task_status(task_id).await
    }

    /// Address a deployment of `account` with `salt_nonce` would get.
    pub async fn predict_address(&self, account: &SafeAccountConfig, salt_nonce: U256) -> Result<Address> {
        let initializer = encode_setup_call_data(account, self.contracts.fallback_handler)?;
        let creation_code = self
            .chain
            .call(self.contracts.proxy_factory, contracts::no_args(contracts::PROXY_CREATION_CODE))
            .await?;
        let creation_code = contracts::decode_bytes("proxyCreationCode", &creation_code)?;
        Ok(predict_safe_address(
            self.contracts.proxy_factory,
            self.contracts.singleton,
            &creation_code,
            &initializer,
            salt_nonce,
        ))
    }

    /// Deploy a new account through the relay with the sponsor paying gas.
    pub async fn deploy_sponsored(&self, account: &SafeAccountConfig, salt_nonce: U256) -> Result<Deployment> {
        let relay = self.relay()?;
        let address = self.predict_address(account, salt_nonce).await?;
        let initializer = encode_setup_call_data(account, self.contracts.fallback_handler)?;

        let request = RelayRequest {
            chain_id: self.chain.chain_id(),
            target: self.contracts.proxy_factory,
            data: encode_create_proxy_with_nonce(self.contracts.singleton, &initializer, salt_nonce),
            sponsored: true,
            gas_limit: None,
            fee_token: None,
        };
        let task_id = relay.submit(&request).await?;
        info!(address = ?address, task_id = %task_id, owners = account.owners.len(), "Sponsored deployment submitted");
        Ok(Deployment { address, task_id })
    }

    fn relay(&self) -> Result<&Arc<dyn RelayGateway>> {
        self.relay
            .as_ref()
            .ok_or_else(|| SafeTxError::ConfigError("no relay gateway configured".to_string()))
    }
}
