//! Shared fixtures for the integration tests: an in-process chain and relay
//! that record what the coordinator asks of them.
#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H256, U256};
use parking_lot::Mutex;
use safe_coordinator::blockchain::contracts;
use safe_coordinator::blockchain::traits::{
    ChainClient, RelayGateway, RelayRequest, RelayTaskState, Simulation, SubmittedTransaction,
    TransactionStatus,
};
use safe_coordinator::core::abi::{keccak256, selector_from_signature};
use safe_coordinator::core::config::ContractsConfig;
use safe_coordinator::crypto::{LocalKeySigner, SigningBackend};
use safe_coordinator::multisig::{AccountDefaults, OwnerPolicy, TransactionDescriptor};
use safe_coordinator::storage::MemoryStore;
use safe_coordinator::{SafeCoordinator, SafeTxError};
use std::str::FromStr;
use std::sync::Arc;

pub const CHAIN_ID: u64 = 5;
pub const SAFE: &str = "0x386e3Bf19B4eB191f954f6BBc4E388395a8E75A3";
pub const RECIPIENT: &str = "0xd6981777F89aCD65bcD4deEE1EF78f40331AF80c";
pub const CREATION_CODE: &[u8] = &[0x60, 0x80, 0x60, 0x40, 0x52];

pub fn safe() -> Address {
    Address::from_str(SAFE).unwrap()
}

pub fn owner_signer(seed: u8) -> LocalKeySigner {
    LocalKeySigner::new(LocalWallet::from_bytes(&[seed; 32]).unwrap())
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub safe: Address,
    pub descriptor: TransactionDescriptor,
    pub signatures: Bytes,
}

/// Chain double. Submitting advances the account nonce like the real contract.
pub struct MockChain {
    pub policy: Mutex<OwnerPolicy>,
    pub nonce: Mutex<U256>,
    pub simulation: Mutex<Simulation>,
    pub simulations: Mutex<usize>,
    pub submitted: Mutex<Vec<Submission>>,
}

impl MockChain {
    pub fn new(policy: OwnerPolicy, nonce: u64) -> Self {
        Self {
            policy: Mutex::new(policy),
            nonce: Mutex::new(U256::from(nonce)),
            simulation: Mutex::new(Simulation::Success),
            simulations: Mutex::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn submissions(&self) -> usize {
        self.submitted.lock().len()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    async fn owner_policy(&self, _safe: Address) -> Result<OwnerPolicy, SafeTxError> {
        Ok(self.policy.lock().clone())
    }

    async fn nonce(&self, _safe: Address) -> Result<U256, SafeTxError> {
        Ok(*self.nonce.lock())
    }

    async fn simulate(
        &self,
        _safe: Address,
        _descriptor: &TransactionDescriptor,
        _signatures: &Bytes,
    ) -> Result<Simulation, SafeTxError> {
        *self.simulations.lock() += 1;
        Ok(self.simulation.lock().clone())
    }

    async fn submit(
        &self,
        safe: Address,
        descriptor: &TransactionDescriptor,
        signatures: &Bytes,
    ) -> Result<SubmittedTransaction, SafeTxError> {
        let mut nonce = self.nonce.lock();
        if descriptor.nonce != *nonce {
            return Err(SafeTxError::WouldRevert("GS026".to_string()));
        }
        *nonce = descriptor.nonce + U256::one();
        self.submitted.lock().push(Submission {
            safe,
            descriptor: descriptor.clone(),
            signatures: signatures.clone(),
        });
        Ok(SubmittedTransaction {
            tx_hash: H256::from(keccak256(&signatures[..])),
            status: TransactionStatus::Confirmed,
        })
    }

    async fn transaction_status(&self, _tx_hash: H256) -> Result<TransactionStatus, SafeTxError> {
        Ok(TransactionStatus::Confirmed)
    }

    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes, SafeTxError> {
        if data[..4] == selector_from_signature(contracts::PROXY_CREATION_CODE) {
            return Ok(Bytes::from(encode(&[Token::Bytes(CREATION_CODE.to_vec())])));
        }
        Err(SafeTxError::network(anyhow::anyhow!("unexpected call")))
    }
}

/// Relay double. Hands out sequential task ids, or fails with a canned error.
#[derive(Default)]
pub struct MockRelay {
    pub requests: Mutex<Vec<RelayRequest>>,
    pub reject_with: Mutex<Option<String>>,
}

impl MockRelay {
    pub fn submissions(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl RelayGateway for MockRelay {
    async fn submit(&self, request: &RelayRequest) -> Result<String, SafeTxError> {
        if let Some(reason) = self.reject_with.lock().clone() {
            return Err(SafeTxError::RelayRejected(reason));
        }
        let mut requests = self.requests.lock();
        requests.push(request.clone());
        Ok(format!("task-{}", requests.len()))
    }

    async fn task_status(&self, _task_id: &str) -> Result<RelayTaskState, SafeTxError> {
        Ok(RelayTaskState::Pending)
    }
}

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub relay: Arc<MockRelay>,
    pub store: Arc<MemoryStore>,
    pub owners: Vec<LocalKeySigner>,
    pub outsider: LocalKeySigner,
    pub coordinator: SafeCoordinator,
}

/// Three owners (seeds 1..=3), given threshold, account nonce 7.
pub fn harness(threshold: usize) -> Harness {
    harness_with_defaults(threshold, AccountDefaults::default())
}

pub fn harness_with_defaults(threshold: usize, defaults: AccountDefaults) -> Harness {
    let owners: Vec<LocalKeySigner> = (1u8..=3).map(owner_signer).collect();
    let policy = OwnerPolicy::new(owners.iter().map(|o| o.address()).collect(), threshold).unwrap();
    let chain = Arc::new(MockChain::new(policy, 7));
    let relay = Arc::new(MockRelay::default());
    let store = Arc::new(MemoryStore::new());
    let coordinator = SafeCoordinator::new(
        safe(),
        defaults,
        ContractsConfig::default(),
        chain.clone(),
        store.clone(),
    )
    .with_relay(relay.clone());
    Harness { chain, relay, store, owners, outsider: owner_signer(9), coordinator }
}
