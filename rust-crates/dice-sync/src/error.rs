use crate::tracker::LifecycleState;
use thiserror::Error;

pub type Result<T, E = ActionError> = std::result::Result<T, E>;

/// Why a user action did not make it onto the chain.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Bad input, caught before any network call.
    #[error("{0}")]
    Validation(String),
    #[error("Wallet not authenticated")]
    NotAuthenticated,
    #[error("another transaction is still {0}")]
    ActionInFlight(LifecycleState),
    /// The wallet is on another chain and the switch was refused.
    #[error("Failed to switch to the required network (chain {0})")]
    WrongNetwork(u64),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl ActionError {
    pub fn validation(message: impl Into<String>) -> Self {
        ActionError::Validation(message.into())
    }

    /// Failures caught before any write is sent; these are not system failures.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ActionError::Validation(_)
                | ActionError::NotAuthenticated
                | ActionError::ActionInFlight(_)
                | ActionError::WrongNetwork(_)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot apply `{event}` while {from}")]
pub struct TrackerError {
    pub from: LifecycleState,
    pub event: &'static str,
}
