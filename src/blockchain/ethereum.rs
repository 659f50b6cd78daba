use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, JsonRpcClient, JsonRpcError, Middleware, Provider, RpcError},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest,
        NameOrAddress, TransactionRequest, H256, U256, U64,
    },
};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::contracts;
use super::traits::{ChainClient, Simulation, SubmittedTransaction, TransactionStatus};
use crate::core::errors::{Result, SafeTxError};
use crate::multisig::policy::OwnerPolicy;
use crate::multisig::transaction::TransactionDescriptor;

/// JSON-RPC error code nodes use for execution reverts
const EXECUTION_REVERTED: i64 = 3;

/// Chain client backed by an ethers provider. Submitting requires an
/// executor key that pays gas; reads and simulation do not.
#[derive(Clone)]
pub struct EthersChainClient<P: JsonRpcClient + Clone = Http> {
    provider: Provider<P>,
    chain_id: u64,
    executor: Option<LocalWallet>,
    confirmations: usize,
}

impl EthersChainClient<Http> {
    /// Connect and check the node serves `chain_id`.
    pub async fn connect(rpc_url: &str, chain_id: u64) -> Result<Self> {
        let rpc_url_clean = rpc_url.trim();
        let parsed_url = reqwest::Url::parse(rpc_url_clean).map_err(|e| {
            SafeTxError::ConfigError(format!("Invalid RPC URL '{}': {}", rpc_url_clean, e))
        })?;

        info!("Connecting to RPC endpoint: {}", parsed_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(SafeTxError::network)?;
        let provider = Provider::new(Http::new_with_client(parsed_url.clone(), client));

        let reported = provider.get_chainid().await.map_err(SafeTxError::network)?.as_u64();
        if reported != chain_id {
            return Err(SafeTxError::ConfigError(format!(
                "{} serves chain {} but {} is configured",
                parsed_url, reported, chain_id
            )));
        }

        info!(chain_id, "Connected");
        Ok(Self::with_provider(provider, chain_id))
    }
}

impl<P> EthersChainClient<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    /// Wrap an existing provider, e.g. `Provider::mocked()` in tests.
    pub fn with_provider(provider: Provider<P>, chain_id: u64) -> Self {
        Self { provider, chain_id, executor: None, confirmations: 0 }
    }

    /// Account that signs and pays for `execTransaction` submissions.
    pub fn with_executor(mut self, wallet: LocalWallet) -> Self {
        self.executor = Some(wallet.with_chain_id(self.chain_id));
        self
    }

    /// Blocks to wait after submission. Zero returns as soon as the node accepts it.
    pub fn with_confirmations(mut self, confirmations: usize) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn executor_address(&self) -> Option<Address> {
        self.executor.as_ref().map(|w| w.address())
    }

    fn call_request(&self, to: Address, data: Bytes) -> TypedTransaction {
        let mut request = TransactionRequest::new().to(to).data(data);
        if let Some(from) = self.executor_address() {
            request = request.from(from);
        }
        request.into()
    }
}

/// Read a revert out of a JSON-RPC error response, if it is one.
fn revert_from_response(err: &JsonRpcError) -> Option<String> {
    let data = err
        .data
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Bytes>().ok());
    let is_revert = err.code == EXECUTION_REVERTED
        || err.message.to_lowercase().contains("revert")
        || data.is_some();
    if !is_revert {
        return None;
    }
    Some(
        data.as_deref()
            .and_then(contracts::decode_revert_reason)
            .unwrap_or_else(|| err.message.clone()),
    )
}

/// Node messages meaning the submission can never succeed as built.
fn classify_submit_error(message: String) -> SafeTxError {
    let lower = message.to_lowercase();
    if lower.contains("nonce too low") || lower.contains("already known") {
        SafeTxError::NotDispatchable(message)
    } else if lower.contains("revert") {
        SafeTxError::WouldRevert(message)
    } else {
        SafeTxError::network(anyhow::anyhow!(message))
    }
}

#[async_trait]
impl<P> ChainClient for EthersChainClient<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn owner_policy(&self, safe: Address) -> Result<OwnerPolicy> {
        let owners = self.call(safe, contracts::no_args(contracts::GET_OWNERS)).await?;
        let owners = contracts::decode_owners(&owners)?;
        let threshold = self.call(safe, contracts::no_args(contracts::GET_THRESHOLD)).await?;
        let threshold = contracts::decode_uint("getThreshold", &threshold)?;
        if threshold.bits() > 32 {
            return Err(SafeTxError::network(anyhow::anyhow!(
                "implausible threshold {} reported by {:?}",
                threshold,
                safe
            )));
        }

        let policy = OwnerPolicy { owners, threshold: threshold.as_usize() };
        policy.check().map_err(|e| {
            SafeTxError::network(anyhow::anyhow!("account {:?} reported a bad policy: {}", safe, e))
        })?;
        debug!(safe = ?safe, owners = policy.owners.len(), threshold = policy.threshold, "Owner policy read");
        Ok(policy)
    }

    async fn nonce(&self, safe: Address) -> Result<U256> {
        let raw = self.call(safe, contracts::no_args(contracts::NONCE)).await?;
        contracts::decode_uint("nonce", &raw)
    }

    async fn simulate(
        &self,
        safe: Address,
        descriptor: &TransactionDescriptor,
        signatures: &Bytes,
    ) -> Result<Simulation> {
        let tx = self.call_request(safe, contracts::exec_transaction(descriptor, signatures));
        match self.provider.call(&tx, None).await {
            Ok(raw) => {
                if contracts::decode_bool("execTransaction", &raw)? {
                    Ok(Simulation::Success)
                } else {
                    Ok(Simulation::Revert("execTransaction returned false".to_string()))
                }
            }
            Err(e) => match e.as_error_response().and_then(revert_from_response) {
                Some(reason) => {
                    debug!(safe = ?safe, nonce = %descriptor.nonce, reason = %reason, "Simulation reverted");
                    Ok(Simulation::Revert(reason))
                }
                None => Err(SafeTxError::network(e)),
            },
        }
    }

    async fn submit(
        &self,
        safe: Address,
        descriptor: &TransactionDescriptor,
        signatures: &Bytes,
    ) -> Result<SubmittedTransaction> {
        let wallet = self.executor.clone().ok_or_else(|| {
            SafeTxError::ConfigError("direct execution needs an executor key".to_string())
        })?;

        let gas_price = self.provider.get_gas_price().await.map_err(SafeTxError::network)?;
        let max_fee_per_gas = gas_price.saturating_mul(U256::from(2u64));
        let max_priority_fee_per_gas =
            (gas_price / U256::from(10u64)).max(U256::from(1_000_000_000u64)); // >= 1 gwei

        let tx = Eip1559TransactionRequest {
            to: Some(NameOrAddress::Address(safe)),
            data: Some(contracts::exec_transaction(descriptor, signatures)),
            chain_id: Some(U64::from(self.chain_id)),
            max_fee_per_gas: Some(max_fee_per_gas),
            max_priority_fee_per_gas: Some(max_priority_fee_per_gas),
            ..Default::default()
        };

        let client = SignerMiddleware::new(self.provider.clone(), wallet);
        let pending = client
            .send_transaction(tx, None)
            .await
            .map_err(|e| classify_submit_error(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        info!(safe = ?safe, nonce = %descriptor.nonce, tx_hash = ?tx_hash, "execTransaction submitted");

        if self.confirmations == 0 {
            return Ok(SubmittedTransaction { tx_hash, status: TransactionStatus::Pending });
        }

        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(SafeTxError::network)?;
        let status = match receipt {
            Some(r) if r.status == Some(U64::from(1)) => TransactionStatus::Confirmed,
            Some(_) => TransactionStatus::Failed,
            None => TransactionStatus::Unknown,
        };
        Ok(SubmittedTransaction { tx_hash, status })
    }

    async fn transaction_status(&self, tx_hash: H256) -> Result<TransactionStatus> {
        match self.provider.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => {
                let status = if receipt.status == Some(U64::from(1)) {
                    TransactionStatus::Confirmed
                } else {
                    TransactionStatus::Failed
                };
                debug!("Transaction status: {:?}", status);
                Ok(status)
            }
            Ok(None) => match self.provider.get_transaction(tx_hash).await {
                Ok(Some(_)) => Ok(TransactionStatus::Pending),
                Ok(None) => Ok(TransactionStatus::Unknown),
                Err(e) => Err(SafeTxError::network(e)),
            },
            Err(e) => {
                warn!("Failed to get transaction receipt for {:?}: {}", tx_hash, e);
                Err(SafeTxError::network(e))
            }
        }
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = self.call_request(to, data);
        self.provider.call(&tx, None).await.map_err(SafeTxError::network)
    }
}
