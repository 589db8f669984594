//! Error taxonomy for the subscription manager.
//!
//! Collaborator failures (`BrokerError`, `TokenError`) never cross the manager
//! boundary as-is; they are converted into `PushError` here.

use state_store::StoreError;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::token::TokenError;

/// Errors returned by `SubscriptionManager` operations.
#[derive(Error, Debug)]
pub enum PushError {
    /// No registration exists for the profile; call `configure` first
    #[error("Profile {profile} needs configuration")]
    ProfileNeedsConfiguration { profile: String },

    /// The configured broker endpoint is not usable
    #[error("Invalid broker endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The broker rejected the request; retrying unchanged will not help
    #[error("Broker rejected request (status {status}, errno {errno:?}): {message}")]
    BrokerRejection {
        status: u16,
        errno: Option<u32>,
        message: String,
    },

    /// I/O-level failure talking to a collaborator; safe to retry
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The token provider needs the user to act before it can issue a token
    #[error("User interaction required: {0}")]
    RemediationRequired(String),

    /// The registration changed while a broker call was in flight
    #[error("Registration for profile {profile} changed during the operation")]
    ConcurrentModification { profile: String },

    /// The state could not be persisted
    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

impl PushError {
    pub(crate) fn needs_configuration(profile: &str) -> Self {
        Self::ProfileNeedsConfiguration {
            profile: profile.to_string(),
        }
    }

    /// Whether reissuing the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure(_) | Self::ConcurrentModification { .. } | Self::Store(_)
        )
    }
}

impl From<BrokerError> for PushError {
    fn from(error: BrokerError) -> Self {
        match error {
            BrokerError::Rejected {
                status,
                errno,
                message,
            } => Self::BrokerRejection {
                status,
                errno,
                message,
            },
            BrokerError::Transport(message) => Self::TransportFailure(message),
            BrokerError::Local(message) => {
                Self::TransportFailure(format!("local client failure: {}", message))
            }
        }
    }
}

impl From<TokenError> for PushError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::RemediationRequired(message) => Self::RemediationRequired(message),
            TokenError::Unavailable(message) => Self::TransportFailure(message),
        }
    }
}

/// Result type for subscription manager operations
pub type Result<T> = std::result::Result<T, PushError>;
