//! Token provider contract.
//!
//! The platform token provider issues the opaque device token the broker needs
//! to route messages to this device.

use async_trait::async_trait;
use state_store::Fetched;

/// Errors from a token provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    /// The provider cannot issue a token until the user does something
    /// (for example, enabling the platform messaging services)
    #[error("Remediation required: {0}")]
    RemediationRequired(String),

    /// The provider could not be reached or failed transiently
    #[error("Token unavailable: {0}")]
    Unavailable(String),
}

/// Issues and invalidates device registration tokens.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the manager shares one provider
/// between all profiles.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get the current device token, fetching a new one if needed.
    ///
    /// `debug` selects the debug sender when the provider distinguishes one.
    /// The returned timestamp is when the token was issued, which the manager
    /// compares against the user agent registration to detect staleness.
    async fn token(&self, debug: bool) -> Result<Fetched<String>, TokenError>;

    /// Drop any cached token so the next `token` call fetches a fresh one.
    fn invalidate(&self);
}
