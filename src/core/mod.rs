pub mod abi;
pub mod config;
pub mod errors;

pub use config::CoordinatorConfig;
pub use errors::{Result, SafeTxError};
