pub mod coordinator;
pub mod dispatcher;

pub use coordinator::{Deployment, SafeCoordinator, TransactionState};
pub use dispatcher::{DispatchMode, Dispatcher, ExecutionOutcome};
