//! Commands the host issues to the push service.
//!
//! Commands travel as JSON objects tagged by `command`:
//!
//! ```json
//! {"command": "Configure", "endpoint": "https://push.example/", "debug": false}
//! {"command": "SubscribeChannel"}
//! {"command": "UnsubscribeChannel", "channelID": "5f0e..."}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use state_store::{ChannelId, ServiceData, Subscription};

/// A lifecycle command from the host, addressed to the service's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    /// Create or update the profile's registration
    Configure {
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        debug: bool,
    },

    /// Reserved
    DumpRegistration,

    /// List the profile's subscriptions
    DumpSubscriptions,

    /// The host can receive messages
    Initialized,

    /// The host can no longer receive messages
    Uninitialized,

    /// Register the profile's user agent with the broker
    RegisterUserAgent,

    /// Reserved
    UnregisterUserAgent,

    /// Create a `webpush` channel subscription for the profile
    SubscribeChannel {
        #[serde(rename = "appServerKey", default)]
        app_server_key: Option<String>,
    },

    /// Remove a channel subscription
    UnsubscribeChannel {
        #[serde(rename = "channelID", default)]
        channel_id: Option<String>,
    },
}

impl Command {
    /// The command's tag, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Configure { .. } => "Configure",
            Self::DumpRegistration => "DumpRegistration",
            Self::DumpSubscriptions => "DumpSubscriptions",
            Self::Initialized => "Initialized",
            Self::Uninitialized => "Uninitialized",
            Self::RegisterUserAgent => "RegisterUserAgent",
            Self::UnregisterUserAgent => "UnregisterUserAgent",
            Self::SubscribeChannel { .. } => "SubscribeChannel",
            Self::UnsubscribeChannel { .. } => "UnsubscribeChannel",
        }
    }

    /// Parse a command from its JSON form.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Successful result of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    /// The command has no result payload
    Empty,
    /// JSON result payload
    Json(Value),
}

impl CommandResponse {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Empty => None,
            Self::Json(value) => Some(value),
        }
    }
}

/// One entry of the `DumpSubscriptions` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    #[serde(rename = "channelID")]
    pub channel_id: ChannelId,
    pub endpoint: String,
    pub service: String,
    pub service_data: ServiceData,
}

impl From<&Subscription> for SubscriptionRecord {
    fn from(subscription: &Subscription) -> Self {
        Self {
            channel_id: subscription.channel_id.clone(),
            endpoint: subscription.endpoint.clone(),
            service: subscription.service.clone(),
            service_data: subscription.service_data.clone(),
        }
    }
}

/// The `SubscribeChannel` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEndpoint {
    #[serde(rename = "channelID")]
    pub channel_id: ChannelId,
    pub endpoint: String,
}
