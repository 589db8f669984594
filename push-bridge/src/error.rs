use push_manager::PushError;
use thiserror::Error;

/// Errors reported back to the host for a command
#[derive(Error, Debug)]
pub enum CommandError {
    /// Configure was sent without an endpoint
    #[error("Configure requires an endpoint")]
    MissingEndpoint,

    /// UnsubscribeChannel was sent without a channel ID
    #[error("UnsubscribeChannel requires a channelID")]
    MissingChannelId,

    /// No subscription exists for the channel
    #[error("Could not unsubscribe from channel {0}")]
    UnknownChannel(String),

    /// The command is reserved but not implemented
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// A response could not be serialized
    #[error("Failed to serialize response: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The subscription manager failed
    #[error(transparent)]
    Push(#[from] PushError),

    /// The configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The background worker is gone
    #[error("Push worker has shut down")]
    WorkerDisconnected,

    /// The background worker thread could not be started
    #[error("Failed to spawn push worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

impl CommandError {
    /// Whether the user has to act before the command can succeed.
    ///
    /// The host should prompt instead of retrying.
    pub fn is_remediation_required(&self) -> bool {
        matches!(self, Self::Push(PushError::RemediationRequired(_)))
    }

    /// Whether reissuing the same command may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Push(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for push service operations
pub type Result<T> = std::result::Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        assert_eq!(
            CommandError::UnknownChannel("abc".to_string()).to_string(),
            "Could not unsubscribe from channel abc"
        );
        assert_eq!(
            CommandError::NotImplemented("DumpRegistration").to_string(),
            "DumpRegistration is not implemented"
        );

        let error: CommandError = PushError::TransportFailure("reset".to_string()).into();
        assert_eq!(error.to_string(), "Transport failure: reset");
    }

    #[test]
    fn test_remediation_classification() {
        let error: CommandError =
            PushError::RemediationRequired("enable messaging services".to_string()).into();
        assert!(error.is_remediation_required());
        assert!(!error.is_retryable());

        let error: CommandError = PushError::TransportFailure("offline".to_string()).into();
        assert!(!error.is_remediation_required());
        assert!(error.is_retryable());

        assert!(!CommandError::MissingEndpoint.is_remediation_required());
    }
}
