// src/main.rs
//! Safe multisig coordinator CLI
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use ethers::types::{Address, Bytes, U256};
use safe_coordinator::blockchain::deployment::SafeAccountConfig;
use safe_coordinator::blockchain::{EthersChainClient, GelatoRelayClient};
use safe_coordinator::core::config::CoordinatorConfig;
use safe_coordinator::crypto::{LocalKeySigner, SigningMethod};
use safe_coordinator::multisig::action::parse_address;
use safe_coordinator::multisig::{Action, ExecutionOptions, OperationType, SigningHash};
use safe_coordinator::service::{DispatchMode, SafeCoordinator};
use safe_coordinator::storage::{MemoryStore, PendingTransactionStore, TxServiceStore};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "safe-coordinator")]
#[command(about = "Propose, confirm and execute Safe multisig transactions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Configuration file
    #[arg(long, env = "SAFE_CONFIG_PATH", default_value = "safe.toml")]
    config: PathBuf,

    /// Owner key used to sign (hex)
    #[arg(long, env = "SAFE_SIGNER_KEY", hide_env_values = true, global = true)]
    signer_key: Option<String>,

    /// How the owner key signs
    #[arg(long, value_enum, default_value = "eth-sign", global = true)]
    method: Method,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    Ecdsa,
    EthSign,
}

impl From<Method> for SigningMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::Ecdsa => SigningMethod::Ecdsa,
            Method::EthSign => SigningMethod::EthSign,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Propose a transaction and sign it as the first owner
    Propose(ProposeArgs),
    /// Add the signer's confirmation to a proposed transaction
    Confirm {
        /// Signing hash of the proposal
        hash: String,
    },
    /// Show how many confirmations a proposal has
    Status { hash: String },
    /// Validate and dispatch a proposal
    Execute {
        hash: String,
        /// Go through the relay instead of submitting from the signer account
        #[arg(long)]
        relay: bool,
        /// With --relay, pay the relay through the Safe refund instead of the
        /// sponsor. Needs gasPrice and refundReceiver in the account defaults.
        #[arg(long, requires = "relay")]
        sync_fee: bool,
    },
    /// Poll a relay task
    RelayStatus { task_id: String },
    /// Print the address a new Safe would be deployed to
    PredictAddress(DeployArgs),
    /// Deploy a new Safe through the relay, sponsor paying
    Deploy(DeployArgs),
}

#[derive(ClapArgs)]
struct ProposeArgs {
    #[arg(long)]
    to: String,
    /// Value in wei
    #[arg(long, default_value = "0")]
    value: String,
    /// Call data, 0x-prefixed hex
    #[arg(long, default_value = "0x")]
    data: String,
    #[arg(long)]
    delegate_call: bool,
    /// Explicit nonce. Defaults to the next unused one.
    #[arg(long)]
    nonce: Option<u64>,
    /// Gas limit for the inner call
    #[arg(long)]
    gas_limit: Option<u64>,
    /// Mark the transaction as relay-sponsored (no refund fields)
    #[arg(long)]
    sponsored: bool,
}

#[derive(ClapArgs)]
struct DeployArgs {
    #[arg(long = "owner", required = true)]
    owners: Vec<String>,
    #[arg(long)]
    threshold: usize,
    #[arg(long, default_value_t = 0)]
    salt_nonce: u64,
}

impl DeployArgs {
    fn account(&self) -> Result<SafeAccountConfig> {
        let owners = self
            .owners
            .iter()
            .map(|o| parse_address(o))
            .collect::<safe_coordinator::Result<Vec<Address>>>()?;
        Ok(SafeAccountConfig::new(owners, self.threshold)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging()?;

    info!("Starting safe-coordinator v{}", env!("CARGO_PKG_VERSION"));

    let config = CoordinatorConfig::load(&args.config)?;
    let signer = match &args.signer_key {
        Some(key) => Some(
            LocalKeySigner::from_hex_key(&SecretString::new(key.clone()))?
                .with_method(args.method.into()),
        ),
        None => None,
    };
    let coordinator = build_coordinator(&config, signer.as_ref()).await?;

    match args.command {
        Commands::Propose(p) => {
            let signer = signer.as_ref().context("propose needs SAFE_SIGNER_KEY")?;
            let data: Bytes = p.data.parse().context("--data must be 0x-prefixed hex")?;
            let operation = if p.delegate_call { OperationType::DelegateCall } else { OperationType::Call };
            let action = Action::call(p.to, p.value, data)
                .with_operation(operation)
                .with_options(ExecutionOptions {
                    gas_limit: p.gas_limit.map(U256::from),
                    is_sponsored: p.sponsored,
                });
            let proposal = coordinator.propose(&action, signer, p.nonce.map(U256::from)).await?;
            println!("{}", proposal.signing_hash);
        }
        Commands::Confirm { hash } => {
            let signer = signer.as_ref().context("confirm needs SAFE_SIGNER_KEY")?;
            let set = coordinator.confirm(parse_hash(&hash)?, signer).await?;
            println!("{} signatures", set.len());
        }
        Commands::Status { hash } => {
            let state = coordinator.status(parse_hash(&hash)?).await?;
            println!("{}", serde_json::to_string(&state)?);
        }
        Commands::Execute { hash, relay, sync_fee } => {
            let mode = if relay {
                DispatchMode::Relayed(ExecutionOptions { gas_limit: None, is_sponsored: !sync_fee })
            } else {
                DispatchMode::Direct
            };
            let outcome = coordinator.execute(parse_hash(&hash)?, mode).await?;
            println!("{}", outcome.reference());
        }
        Commands::RelayStatus { task_id } => {
            let state = coordinator.relay_status(&task_id).await?;
            println!("{}", serde_json::to_string(&state)?);
        }
        Commands::PredictAddress(d) => {
            let address = coordinator.predict_address(&d.account()?, U256::from(d.salt_nonce)).await?;
            println!("{}", ethers::utils::to_checksum(&address, None));
        }
        Commands::Deploy(d) => {
            let deployment = coordinator.deploy_sponsored(&d.account()?, U256::from(d.salt_nonce)).await?;
            info!(task_id = %deployment.task_id, "Deployment relayed");
            println!("{}", ethers::utils::to_checksum(&deployment.address, None));
        }
    }

    Ok(())
}

fn parse_hash(raw: &str) -> Result<SigningHash> {
    Ok(raw.parse::<SigningHash>()?)
}

/// Wire chain client, store and relay from configuration.
async fn build_coordinator(
    config: &CoordinatorConfig,
    signer: Option<&LocalKeySigner>,
) -> Result<SafeCoordinator> {
    let mut chain = EthersChainClient::connect(&config.chain.rpc_url, config.chain.chain_id)
        .await?
        .with_confirmations(config.chain.confirmations);
    if let Some(signer) = signer {
        chain = chain.with_executor(signer.wallet().clone());
    }

    let store: Arc<dyn PendingTransactionStore> = match &config.store.tx_service_url {
        Some(url) => Arc::new(TxServiceStore::new(url, config.chain.chain_id)?),
        None => {
            warn!("No store.tx_service_url configured; proposals live only in this process");
            Arc::new(MemoryStore::new())
        }
    };

    let relay = GelatoRelayClient::from_config(&config.relay)?;

    Ok(SafeCoordinator::from_config(config, Arc::new(chain), store).with_relay(Arc::new(relay)))
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
