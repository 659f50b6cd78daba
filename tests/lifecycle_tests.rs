//! tests/lifecycle_tests.rs
//!
//! Propose → confirm → execute through `SafeCoordinator` against in-process
//! chain and relay doubles:
//! - direct and relayed dispatch
//! - threshold gating before any submission
//! - nonce exclusivity and release after pre-commit failures
//! - signer replacement, idempotent attach, stale owners

mod common;

use common::{harness, safe, RECIPIENT};
use ethers::types::{Address, U256};
use pretty_assertions::assert_eq;
use safe_coordinator::blockchain::contracts;
use safe_coordinator::blockchain::deployment::{predict_safe_address, SafeAccountConfig};
use safe_coordinator::blockchain::traits::{Simulation, TransactionStatus};
use safe_coordinator::core::abi::selector_from_signature;
use safe_coordinator::core::config::ContractsConfig;
use safe_coordinator::crypto::{SigningBackend, SigningMethod};
use safe_coordinator::multisig::{digest, AccountDefaults, Action, ExecutionOptions, OperationType, OwnerPolicy};
use safe_coordinator::storage::{PendingTransactionStore, ProposedTransaction};
use safe_coordinator::{DispatchMode, ExecutionOutcome, SafeTxError, TransactionState};

fn transfer() -> Action {
    Action::call(RECIPIENT, "0", vec![0xde, 0xad, 0xbe, 0xef])
}

#[tokio::test(flavor = "current_thread")]
async fn scenario_a_two_of_three_direct() {
    let h = harness(2);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], Some(U256::from(7u64))).await.unwrap();
    assert_eq!(proposal.descriptor.nonce, U256::from(7u64));
    assert_eq!(proposal.signing_hash, digest(safe(), common::CHAIN_ID, &proposal.descriptor));

    let set = h.coordinator.confirm(proposal.signing_hash, &h.owners[2]).await.unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(
        h.coordinator.status(proposal.signing_hash).await.unwrap(),
        TransactionState::Satisfied { collected: 2, threshold: 2 }
    );

    let outcome = h.coordinator.execute(proposal.signing_hash, DispatchMode::Direct).await.unwrap();
    match &outcome {
        ExecutionOutcome::Direct(tx) => assert_eq!(tx.status, TransactionStatus::Confirmed),
        other => panic!("expected direct outcome, got {:?}", other),
    }

    let submitted = h.chain.submitted.lock().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].descriptor, proposal.descriptor);
    // two packed signatures, ascending by signer
    assert_eq!(submitted[0].signatures.len(), 130);
    let mut signers = vec![h.owners[0].address(), h.owners[2].address()];
    signers.sort();
    let first = safe_coordinator::multisig::signing::recover_signer(
        proposal.signing_hash,
        &submitted[0].signatures[..65],
    )
    .unwrap()
    .0;
    assert_eq!(first, signers[0]);

    assert_eq!(
        h.coordinator.status(proposal.signing_hash).await.unwrap(),
        TransactionState::Dispatched { outcome }
    );
}

#[tokio::test(flavor = "current_thread")]
async fn scenario_b_insufficient_never_submits() {
    let h = harness(2);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[1], None).await.unwrap();
    assert_eq!(
        h.coordinator.status(proposal.signing_hash).await.unwrap(),
        TransactionState::Collecting { collected: 1, threshold: 2 }
    );

    for mode in [DispatchMode::Direct, DispatchMode::sponsored()] {
        let res = h.coordinator.execute(proposal.signing_hash, mode).await;
        assert!(matches!(res, Err(SafeTxError::Insufficient { missing: 1 })), "{:?}", res);
    }
    assert_eq!(h.chain.submissions(), 0);
    assert_eq!(*h.chain.simulations.lock(), 0);
    assert_eq!(h.relay.submissions(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn scenario_c_relayed_returns_task_id() {
    let h = harness(2);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    h.coordinator.confirm(proposal.signing_hash, &h.owners[1]).await.unwrap();

    let outcome = h.coordinator.execute(proposal.signing_hash, DispatchMode::sponsored()).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Relayed { task_id: "task-1".to_string() });
    assert_eq!(h.chain.submissions(), 0);

    let requests = h.relay.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target, safe());
    assert_eq!(requests[0].chain_id, common::CHAIN_ID);
    assert!(requests[0].sponsored);
    assert!(requests[0].data.starts_with(&selector_from_signature(contracts::EXEC_TRANSACTION)));
}

#[tokio::test(flavor = "current_thread")]
async fn second_execute_same_nonce_is_not_dispatchable() {
    let h = harness(1);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    h.coordinator.execute(proposal.signing_hash, DispatchMode::Direct).await.unwrap();

    let again = h.coordinator.execute(proposal.signing_hash, DispatchMode::Direct).await;
    assert!(matches!(again, Err(SafeTxError::NotDispatchable(_))));
    let relayed = h.coordinator.execute(proposal.signing_hash, DispatchMode::sponsored()).await;
    assert!(matches!(relayed, Err(SafeTxError::NotDispatchable(_))));
    assert_eq!(h.chain.submissions(), 1);
    assert_eq!(h.relay.submissions(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn competing_proposals_for_one_nonce() {
    let h = harness(1);
    let nonce = Some(U256::from(7u64));
    let a = h.coordinator.propose(&transfer(), &h.owners[0], nonce).await.unwrap();
    let b = h
        .coordinator
        .propose(&Action::call(RECIPIENT, "1", Vec::<u8>::new()), &h.owners[1], nonce)
        .await
        .unwrap();
    assert_ne!(a.signing_hash, b.signing_hash);

    let (ra, rb) = tokio::join!(
        h.coordinator.execute(a.signing_hash, DispatchMode::Direct),
        h.coordinator.execute(b.signing_hash, DispatchMode::Direct),
    );
    let wins = [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(wins, 1);
    let loser = if ra.is_ok() { rb } else { ra };
    assert!(matches!(loser, Err(SafeTxError::NotDispatchable(_))));
    assert_eq!(h.chain.submissions(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn consumed_nonce_is_not_dispatchable() {
    let h = harness(1);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    *h.chain.nonce.lock() = U256::from(8u64);

    let res = h.coordinator.execute(proposal.signing_hash, DispatchMode::Direct).await;
    assert!(matches!(res, Err(SafeTxError::NotDispatchable(_))));
    assert_eq!(*h.chain.simulations.lock(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn revert_fails_fast_and_releases_nonce() {
    let h = harness(1);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    *h.chain.simulation.lock() = Simulation::Revert("GS013".to_string());

    let res = h.coordinator.execute(proposal.signing_hash, DispatchMode::Direct).await;
    match res {
        Err(e @ SafeTxError::WouldRevert(_)) => assert!(e.is_fatal()),
        other => panic!("expected WouldRevert, got {:?}", other),
    }
    assert_eq!(h.chain.submissions(), 0);

    *h.chain.simulation.lock() = Simulation::Success;
    assert!(h.coordinator.execute(proposal.signing_hash, DispatchMode::Direct).await.is_ok());
}

#[tokio::test(flavor = "current_thread")]
async fn relay_rejection_is_retryable() {
    let h = harness(1);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    *h.relay.reject_with.lock() = Some("insufficient sponsor balance".to_string());

    let err = h.coordinator.execute(proposal.signing_hash, DispatchMode::sponsored()).await.unwrap_err();
    assert!(matches!(err, SafeTxError::RelayRejected(_)));
    assert!(err.is_retryable());

    *h.relay.reject_with.lock() = None;
    let outcome = h.coordinator.execute(proposal.signing_hash, DispatchMode::sponsored()).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Relayed { .. }));
}

#[tokio::test(flavor = "current_thread")]
async fn sync_fee_relay_keeps_caller_gas_limit() {
    let defaults = AccountDefaults {
        gas_price: U256::from(1_000_000_000u64),
        refund_receiver: Address::repeat_byte(0xfe),
        ..AccountDefaults::default()
    };
    let h = common::harness_with_defaults(1, defaults);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    assert!(proposal.descriptor.pays_refund());
    let mode = DispatchMode::Relayed(ExecutionOptions { gas_limit: Some(U256::from(300_000u64)), is_sponsored: false });
    h.coordinator.execute(proposal.signing_hash, mode).await.unwrap();

    let request = h.relay.requests.lock()[0].clone();
    assert!(!request.sponsored);
    assert_eq!(request.gas_limit, Some(U256::from(300_000u64)));
    assert_eq!(request.fee_token, None);
}

#[tokio::test(flavor = "current_thread")]
async fn sync_fee_relay_without_refund_is_rejected() {
    let h = harness(1);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    let mode = DispatchMode::Relayed(ExecutionOptions { gas_limit: None, is_sponsored: false });
    let res = h.coordinator.execute(proposal.signing_hash, mode).await;
    assert!(matches!(res, Err(SafeTxError::InvalidAction(_))));
    assert!(h.relay.requests.lock().is_empty());

    // nothing was reserved, so a sponsored attempt still goes through
    h.coordinator.execute(proposal.signing_hash, DispatchMode::sponsored()).await.unwrap();
    assert_eq!(h.relay.requests.lock().len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn stale_owner_is_not_counted() {
    let h = harness(2);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    h.coordinator.confirm(proposal.signing_hash, &h.owners[1]).await.unwrap();

    // owners[1] removed before execution
    *h.chain.policy.lock() =
        OwnerPolicy::new(vec![h.owners[0].address(), h.owners[2].address()], 2).unwrap();
    let res = h.coordinator.execute(proposal.signing_hash, DispatchMode::Direct).await;
    assert!(matches!(res, Err(SafeTxError::Insufficient { missing: 1 })));
    assert_eq!(h.chain.submissions(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn confirm_is_idempotent_and_replaces_per_signer() {
    let h = harness(3);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();

    let once = h.coordinator.confirm(proposal.signing_hash, &h.owners[1]).await.unwrap();
    let twice = h.coordinator.confirm(proposal.signing_hash, &h.owners[1]).await.unwrap();
    assert_eq!(once.len(), twice.len());

    // same signer, different encoding of the same approval
    let ecdsa = common::owner_signer(2).with_method(SigningMethod::Ecdsa);
    let replaced = h.coordinator.confirm(proposal.signing_hash, &ecdsa).await.unwrap();
    assert_eq!(replaced.len(), 2);
    let entry = replaced.signatures().iter().find(|s| s.signer == ecdsa.address()).unwrap();
    assert_eq!(entry.kind, safe_coordinator::multisig::SignatureKind::Ecdsa);
}

#[tokio::test(flavor = "current_thread")]
async fn outsiders_cannot_propose_or_confirm() {
    let h = harness(2);
    let res = h.coordinator.propose(&transfer(), &h.outsider, None).await;
    assert!(matches!(res, Err(SafeTxError::InvalidSignature(_))));
    assert!(h.store.is_empty().await);

    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    let res = h.coordinator.confirm(proposal.signing_hash, &h.outsider).await;
    assert!(matches!(res, Err(SafeTxError::InvalidSignature(_))));
    assert_eq!(
        h.coordinator.status(proposal.signing_hash).await.unwrap(),
        TransactionState::Collecting { collected: 1, threshold: 2 }
    );
}

#[tokio::test(flavor = "current_thread")]
async fn next_nonce_skips_pending_proposals() {
    let h = harness(2);
    let first = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    let second = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();
    assert_eq!(first.descriptor.nonce, U256::from(7u64));
    assert_eq!(second.descriptor.nonce, U256::from(8u64));
    assert_ne!(first.signing_hash, second.signing_hash);
}

#[tokio::test(flavor = "current_thread")]
async fn max_nonce_is_rejected_and_next_nonce_still_works() {
    let h = harness(1);
    let res = h.coordinator.propose(&transfer(), &h.owners[0], Some(U256::MAX)).await;
    assert!(matches!(res, Err(SafeTxError::InvalidAction(_))));
    assert!(h.store.is_empty().await);
    assert_eq!(h.coordinator.next_nonce().await.unwrap(), U256::from(7u64));
}

#[tokio::test(flavor = "current_thread")]
async fn tampered_proposal_is_rejected() {
    let h = harness(1);
    let proposal = h.coordinator.propose(&transfer(), &h.owners[0], None).await.unwrap();

    let mut forged: ProposedTransaction = proposal.clone();
    forged.descriptor.value = U256::from(1_000_000u64);
    let other_store = safe_coordinator::storage::MemoryStore::new();
    other_store.put(&forged, None).await.unwrap();
    let coordinator = safe_coordinator::SafeCoordinator::new(
        safe(),
        Default::default(),
        ContractsConfig::default(),
        h.chain.clone(),
        std::sync::Arc::new(other_store),
    );

    let res = coordinator.execute(proposal.signing_hash, DispatchMode::Direct).await;
    assert!(matches!(res, Err(SafeTxError::InvalidAction(_))));
    assert_eq!(h.chain.submissions(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_hash_is_not_found() {
    let h = harness(1);
    let missing = "0x".to_string() + &"11".repeat(32);
    let res = h.coordinator.status(missing.parse().unwrap()).await;
    assert!(matches!(res, Err(SafeTxError::NotFound(_))));
}

#[tokio::test(flavor = "current_thread")]
async fn batch_becomes_multisend_delegate_call() {
    let h = harness(1);
    let batch = h
        .coordinator
        .batch(vec![transfer(), Action::call(RECIPIENT, "5", Vec::<u8>::new())], ExecutionOptions::default())
        .unwrap();
    let proposal = h.coordinator.propose(&batch, &h.owners[0], None).await.unwrap();
    assert_eq!(proposal.descriptor.operation, OperationType::DelegateCall);
    assert_eq!(proposal.descriptor.to, ContractsConfig::default().multi_send);
}

#[tokio::test(flavor = "current_thread")]
async fn sponsored_deployment_targets_factory() {
    let h = harness(1);
    let owners: Vec<Address> = h.owners.iter().map(|o| o.address()).collect();
    let account = SafeAccountConfig::new(owners, 2).unwrap();
    let contracts_config = ContractsConfig::default();

    let deployment = h.coordinator.deploy_sponsored(&account, U256::from(3u64)).await.unwrap();
    let initializer = safe_coordinator::blockchain::deployment::encode_setup_call_data(
        &account,
        contracts_config.fallback_handler,
    )
    .unwrap();
    let expected = predict_safe_address(
        contracts_config.proxy_factory,
        contracts_config.singleton,
        common::CREATION_CODE,
        &initializer,
        U256::from(3u64),
    );
    assert_eq!(deployment.address, expected);
    assert_eq!(deployment.task_id, "task-1");

    let request = h.relay.requests.lock()[0].clone();
    assert_eq!(request.target, contracts_config.proxy_factory);
    assert!(request.sponsored);
    assert!(request.data.starts_with(&selector_from_signature(contracts::CREATE_PROXY_WITH_NONCE)));
}
