use anyhow::{Context, Result};
use ethers::types::Address;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::multisig::transaction::AccountDefaults;

/// Chain RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// RPC endpoint URL (e.g. "http://localhost:8545")
    #[serde(default = "ChainConfig::default_rpc_url")]
    pub rpc_url: String,

    #[serde(default = "ChainConfig::default_chain_id")]
    pub chain_id: u64,

    /// Block confirmations to wait for after a direct submission.
    /// 0 returns as soon as the transaction is pending.
    #[serde(default)]
    pub confirmations: usize,
}

impl ChainConfig {
    fn default_rpc_url() -> String { "http://localhost:8545".to_string() }
    fn default_chain_id() -> u64 { 1 }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: Self::default_rpc_url(),
            chain_id: Self::default_chain_id(),
            confirmations: 0,
        }
    }
}

/// The multisig account being coordinated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeConfig {
    #[serde(default)]
    pub address: Address,

    #[serde(default)]
    pub defaults: AccountDefaults,
}

impl Default for SafeConfig {
    fn default() -> Self {
        Self { address: Address::zero(), defaults: AccountDefaults::default() }
    }
}

/// Pending transaction store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Transaction service base URL. In-memory store when unset.
    pub tx_service_url: Option<String>,
}

/// Relay gateway configuration
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "RelayConfig::default_api_url")]
    pub api_url: String,

    /// Sponsor API key. Never logged or serialized.
    #[serde(default)]
    pub api_key: Option<SecretString>,
}

impl RelayConfig {
    fn default_api_url() -> String { "https://api.gelato.digital".to_string() }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { api_url: Self::default_api_url(), api_key: None }
    }
}

/// Well-known Safe contract addresses (v1.3.0 canonical deployments)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    #[serde(default = "ContractsConfig::default_multi_send")]
    pub multi_send: Address,
    #[serde(default = "ContractsConfig::default_proxy_factory")]
    pub proxy_factory: Address,
    #[serde(default = "ContractsConfig::default_singleton")]
    pub singleton: Address,
    #[serde(default = "ContractsConfig::default_fallback_handler")]
    pub fallback_handler: Address,
}

impl ContractsConfig {
    fn default_multi_send() -> Address { parse_const("0xA238CBeb142c10Ef7Ad8442C6D1f9E89e07e7761") }
    fn default_proxy_factory() -> Address { parse_const("0xa6B71E26C5e0845f74c812102Ca7114b6a896AB2") }
    fn default_singleton() -> Address { parse_const("0xd9Db270c1B5E3Bd161E8c8503c55cEABeE709552") }
    fn default_fallback_handler() -> Address { parse_const("0xf48f2B2d2a534e402487b3ee7C18c33Aec0Fe5e4") }
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            multi_send: Self::default_multi_send(),
            proxy_factory: Self::default_proxy_factory(),
            singleton: Self::default_singleton(),
            fallback_handler: Self::default_fallback_handler(),
        }
    }
}

fn parse_const(addr: &str) -> Address {
    Address::from_str(addr).unwrap_or_default()
}

/// Process-wide configuration. Loaded once at startup and shared behind an `Arc`.
#[derive(Debug, Default, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub safe: SafeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub contracts: ContractsConfig,
}

impl CoordinatorConfig {
    /// Read a TOML file, apply environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        info!(
            chain_id = config.chain.chain_id,
            safe = ?config.safe.address,
            "Loaded coordinator config from {}",
            path.display()
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid coordinator config")
    }

    /// Apply `SAFE_*` overrides from the given lookup (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SAFE_RPC_URL") {
            debug!("SAFE_RPC_URL override applied");
            self.chain.rpc_url = url;
        }
        if let Some(id) = lookup("SAFE_CHAIN_ID") {
            self.chain.chain_id = id
                .trim()
                .parse()
                .with_context(|| format!("SAFE_CHAIN_ID is not an integer: {}", id))?;
        }
        if let Some(addr) = lookup("SAFE_ADDRESS") {
            self.safe.address = Address::from_str(addr.trim())
                .with_context(|| format!("SAFE_ADDRESS is not an address: {}", addr))?;
        }
        if let Some(url) = lookup("SAFE_TX_SERVICE_URL") {
            self.store.tx_service_url = Some(url);
        }
        if let Some(key) = lookup("SAFE_RELAY_API_KEY") {
            self.relay.api_key = Some(SecretString::new(key));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.chain_id == 0 {
            anyhow::bail!("chain.chain_id must be non-zero");
        }
        reqwest::Url::parse(self.chain.rpc_url.trim())
            .with_context(|| format!("chain.rpc_url is not a valid URL: {}", self.chain.rpc_url))?;
        if let Some(url) = &self.store.tx_service_url {
            reqwest::Url::parse(url.trim())
                .with_context(|| format!("store.tx_service_url is not a valid URL: {}", url))?;
        }
        reqwest::Url::parse(self.relay.api_url.trim())
            .with_context(|| format!("relay.api_url is not a valid URL: {}", self.relay.api_url))?;
        if self.safe.defaults.max_payload_bytes == 0 {
            anyhow::bail!("safe.defaults.max_payload_bytes must be positive");
        }
        Ok(())
    }
}
