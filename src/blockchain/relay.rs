//! Gelato relay gateway
//!
//! Submits a single call (target + opaque data) either sponsored through a
//! 1Balance API key or paid from the call itself (sync fee). Only the task id
//! and task state are read back from responses.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::{RelayGateway, RelayRequest, RelayTaskState};
use crate::core::config::RelayConfig;
use crate::core::errors::{Result, SafeTxError};

/// Placeholder the relay uses for the chain's native token
pub fn native_fee_token() -> Address {
    Address::repeat_byte(0xee)
}

pub struct GelatoRelayClient {
    api_url: String,
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SponsoredCallBody<'a> {
    chain_id: String,
    target: Address,
    data: &'a Bytes,
    sponsor_api_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas_limit: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncFeeCallBody<'a> {
    chain_id: String,
    target: Address,
    data: &'a Bytes,
    fee_token: Address,
    is_relay_context: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas_limit: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskAccepted {
    task_id: String,
}

#[derive(Deserialize)]
struct TaskStatusResponse {
    task: TaskStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskStatus {
    task_state: String,
    transaction_hash: Option<H256>,
    last_check_message: Option<String>,
}

#[derive(Deserialize)]
struct GatewayMessage {
    message: Option<String>,
}

impl TaskStatus {
    fn into_state(self) -> RelayTaskState {
        match self.task_state.as_str() {
            "ExecSuccess" => RelayTaskState::Executed { tx_hash: self.transaction_hash },
            "ExecReverted" => RelayTaskState::Reverted { reason: self.last_check_message },
            "Cancelled" | "Blacklisted" => RelayTaskState::Cancelled { reason: self.last_check_message },
            // CheckPending, ExecPending, WaitingForConfirmation, and anything newer
            _ => RelayTaskState::Pending,
        }
    }
}

fn mentions_used_nonce(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("nonce") && (lower.contains("used") || lower.contains("too low") || lower.contains("already"))
}

impl GelatoRelayClient {
    pub fn new(api_url: &str, api_key: Option<SecretString>) -> Result<Self> {
        let parsed = reqwest::Url::parse(api_url.trim())
            .map_err(|e| SafeTxError::ConfigError(format!("invalid relay URL {}: {}", api_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(SafeTxError::network)?;
        Ok(Self {
            api_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    /// Client for the configured gateway. The sponsor key is copied, the
    /// configuration keeps its own.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let api_key = config.api_key.as_ref().map(|k| SecretString::new(k.expose_secret().clone()));
        Self::new(&config.api_url, api_key)
    }

    async fn rejection(response: reqwest::Response) -> SafeTxError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GatewayMessage>(&body)
            .ok()
            .and_then(|m| m.message)
            .unwrap_or(body);
        warn!(status = %status, "Relay gateway rejected request: {}", message);
        if mentions_used_nonce(&message) {
            SafeTxError::NotDispatchable(message)
        } else {
            SafeTxError::RelayRejected(format!("{}: {}", status, message))
        }
    }
}

#[async_trait]
impl RelayGateway for GelatoRelayClient {
    async fn submit(&self, request: &RelayRequest) -> Result<String> {
        let gas_limit = request.gas_limit.map(|g| g.to_string());
        let response = if request.sponsored {
            let api_key = self.api_key.as_ref().ok_or_else(|| {
                SafeTxError::ConfigError("sponsored relay calls need relay.api_key".to_string())
            })?;
            let body = SponsoredCallBody {
                chain_id: request.chain_id.to_string(),
                target: request.target,
                data: &request.data,
                sponsor_api_key: api_key.expose_secret(),
                gas_limit,
            };
            self.client
                .post(format!("{}/relays/v2/sponsored-call", self.api_url))
                .json(&body)
                .send()
                .await?
        } else {
            let body = SyncFeeCallBody {
                chain_id: request.chain_id.to_string(),
                target: request.target,
                data: &request.data,
                fee_token: request.fee_token.unwrap_or_else(native_fee_token),
                is_relay_context: false,
                gas_limit,
            };
            self.client
                .post(format!("{}/relays/v2/call-with-sync-fee", self.api_url))
                .json(&body)
                .send()
                .await?
        };

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let accepted: TaskAccepted = response.json().await?;
        info!(
            task_id = %accepted.task_id,
            target = ?request.target,
            sponsored = request.sponsored,
            "Relay task accepted"
        );
        Ok(accepted.task_id)
    }

    async fn task_status(&self, task_id: &str) -> Result<RelayTaskState> {
        let response = self
            .client
            .get(format!("{}/tasks/status/{}", self.api_url, task_id))
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => {
                let status: TaskStatusResponse = response.json().await?;
                let state = status.task.into_state();
                debug!(task_id, state = ?state, "Relay task status");
                Ok(state)
            }
            StatusCode::NOT_FOUND => Err(SafeTxError::NotFound(format!("relay task {}", task_id))),
            _ => Err(Self::rejection(response).await),
        }
    }
}

/// Gas limit hint for relayed calls: the account's own limit plus headroom
/// for the signature checks around it.
pub fn relay_gas_limit(safe_tx_gas: U256) -> Option<U256> {
    if safe_tx_gas.is_zero() {
        None
    } else {
        Some(safe_tx_gas.saturating_add(U256::from(150_000u64)))
    }
}
