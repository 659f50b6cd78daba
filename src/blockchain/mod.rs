pub mod contracts;
pub mod deployment;
pub mod ethereum;
pub mod relay;
pub mod traits;

pub use ethereum::EthersChainClient;
pub use relay::GelatoRelayClient;
pub use traits::{ChainClient, RelayGateway, RelayRequest, RelayTaskState, Simulation, SubmittedTransaction, TransactionStatus};
