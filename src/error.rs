use thiserror::Error;

use crate::positions::PositionState;

/// Failures reported by the broker collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrokerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("broker call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to decode broker response: {0}")]
    Decode(String),
}

impl BrokerError {
    /// Transient failures are retried by the scheduler; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Network(_) | BrokerError::Timeout(_) | BrokerError::RateLimited(_)
        )
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BrokerError::Decode(err.to_string())
        } else {
            BrokerError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("missing broker credentials: set OANDA_ACCOUNT_ID and OANDA_API_TOKEN")]
    MissingCredentials,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Contract violations inside the position lifecycle. These are internal defects:
/// the offending operation is refused and logged, the process keeps running.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LifecycleError {
    #[error("{instrument}: illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        instrument: String,
        from: PositionState,
        to: PositionState,
    },

    #[error("{instrument}: already has an active position in state {state:?}")]
    AlreadyActive {
        instrument: String,
        state: PositionState,
    },

    #[error("{0}: refusing to submit an order without a stop-loss")]
    MissingStopLoss(String),

    #[error("{0}: no open position")]
    NotOpen(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}
