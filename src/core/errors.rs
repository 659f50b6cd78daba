use thiserror::Error;

/// Error kinds surfaced by the transaction lifecycle.
///
/// External failures are wrapped, never reinterpreted: a transport error from
/// the chain, store or relay stays a `NetworkError` carrying the original
/// error as its source.
#[derive(Debug, Error)]
pub enum SafeTxError {
    /// Malformed caller input. Not retried.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Signature does not recover, or recovers to a non-owner.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Threshold not met. An expected intermediate state, surfaced as an
    /// error only when a caller tries to dispatch anyway.
    #[error("Insufficient signatures: {missing} more required")]
    Insufficient { missing: usize },

    /// Dry-run execution failed. Rebuild the transaction before retrying.
    #[error("Transaction would revert: {0}")]
    WouldRevert(String),

    /// Relay gateway declined the request.
    #[error("Relay rejected: {0}")]
    RelayRejected(String),

    /// Transient failure talking to an external service.
    #[error("Network error: {0}")]
    NetworkError(#[source] anyhow::Error),

    /// Nonce already consumed for this account. Re-derive a fresh descriptor.
    #[error("Not dispatchable: {0}")]
    NotDispatchable(String),

    /// Nothing stored under the requested key.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SafeTxError {
    /// Wrap an external transport failure.
    pub fn network(err: impl Into<anyhow::Error>) -> Self {
        Self::NetworkError(err.into())
    }

    /// Whether the caller may retry the same descriptor and signatures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SafeTxError::NetworkError(_) | SafeTxError::RelayRejected(_))
    }

    /// Whether the descriptor itself must be rebuilt before another attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SafeTxError::InvalidAction(_)
                | SafeTxError::WouldRevert(_)
                | SafeTxError::NotDispatchable(_)
        )
    }
}

impl From<reqwest::Error> for SafeTxError {
    fn from(err: reqwest::Error) -> Self {
        SafeTxError::NetworkError(err.into())
    }
}

pub type Result<T, E = SafeTxError> = std::result::Result<T, E>;
