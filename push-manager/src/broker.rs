//! Broker client contract.
//!
//! The broker client performs the network calls against a push broker. The
//! manager only sees it through these traits; transport details (HTTP, auth
//! headers, timeouts) belong to the implementation.

use std::sync::Arc;

use async_trait::async_trait;
use state_store::{ChannelId, UserAgent};

/// Errors from broker client implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// The broker answered with a semantic error
    #[error("Broker rejected request with status {status}: {message}")]
    Rejected {
        status: u16,
        errno: Option<u32>,
        message: String,
    },

    /// The request did not complete (connection, DNS, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The client failed locally (for example, an unreadable response body)
    #[error("Local client error: {0}")]
    Local(String),
}

/// Network operations against one broker endpoint.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Register a new user agent for a device token.
    async fn register_user_agent(&self, token: &str) -> Result<UserAgent, BrokerError>;

    /// Refresh an existing user agent registration with a (possibly new) token.
    async fn reregister_user_agent(
        &self,
        user_agent: &UserAgent,
        token: &str,
    ) -> Result<(), BrokerError>;

    /// Register a channel and return the endpoint application servers push to.
    async fn subscribe_channel(
        &self,
        user_agent: &UserAgent,
        channel_id: &ChannelId,
        app_server_key: Option<&str>,
    ) -> Result<String, BrokerError>;

    /// Remove a channel registration.
    async fn unsubscribe_channel(
        &self,
        user_agent: &UserAgent,
        channel_id: &ChannelId,
    ) -> Result<(), BrokerError>;
}

/// Creates broker clients for configured endpoints.
pub trait BrokerClientFactory: Send + Sync {
    fn client(&self, endpoint: &str, debug: bool) -> Arc<dyn BrokerClient>;
}
