//! Persisted data model: registrations, subscriptions and the state document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service name for subscriptions delivered through the DOM push API.
pub const SERVICE_WEBPUSH: &str = "webpush";

/// Service data key holding the owning profile name.
pub const PROFILE_NAME_KEY: &str = "profileName";

/// Service data key holding the owning profile directory.
pub const PROFILE_PATH_KEY: &str = "profilePath";

/// Opaque, caller-supplied service data. Round-tripped verbatim.
pub type ServiceData = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a channel subscription (the provider's `chid`).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Create a channel ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the channel ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value together with the time it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fetched<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Fetched<T> {
    pub fn new(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self { value, fetched_at }
    }
}

/// Credentials the broker issued for a registered user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent {
    pub uaid: String,
    pub secret: String,
}

/// The host profile a service instance runs under.
///
/// Subscriptions created for the `webpush` service record this context in
/// their service data so inbound messages can be matched against the
/// profile that is running when they arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileContext {
    pub name: String,
    pub path: String,
}

impl ProfileContext {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Build the `webpush` service data for this profile.
    pub fn service_data(&self) -> ServiceData {
        let mut data = ServiceData::new();
        data.insert(PROFILE_NAME_KEY.to_string(), self.name.clone().into());
        data.insert(PROFILE_PATH_KEY.to_string(), self.path.clone().into());
        data
    }

    /// Read a profile context back out of service data.
    ///
    /// Returns `None` when either key is missing or not a string.
    pub fn from_service_data(data: &ServiceData) -> Option<Self> {
        let name = data.get(PROFILE_NAME_KEY)?.as_str()?;
        let path = data.get(PROFILE_PATH_KEY)?.as_str()?;
        Some(Self::new(name, path))
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A single channel subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub channel_id: ChannelId,
    /// Owning registration, by profile name
    pub profile_name: String,
    pub service: String,
    #[serde(default)]
    pub service_data: ServiceData,
    /// Endpoint the broker issued for this channel
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Registration
// ============================================================================

/// Per-profile registration with a push broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub profile_name: String,
    /// Broker endpoint the user agent registers against
    pub endpoint: String,
    pub debug: bool,
    /// Cached device token from the token provider
    #[serde(default)]
    pub token: Option<Fetched<String>>,
    /// User agent ID issued by the broker
    #[serde(default)]
    pub uaid: Option<Fetched<String>>,
    #[serde(default)]
    pub secret: Option<String>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub subscriptions: BTreeMap<ChannelId, Subscription>,
}

impl Registration {
    /// Create an unregistered registration for a freshly configured profile.
    pub fn new(
        profile_name: impl Into<String>,
        endpoint: impl Into<String>,
        debug: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            profile_name: profile_name.into(),
            endpoint: endpoint.into(),
            debug,
            token: None,
            uaid: None,
            secret: None,
            modified_at: now,
            subscriptions: BTreeMap::new(),
        }
    }

    /// The broker credentials, if the user agent has been registered.
    pub fn user_agent(&self) -> Option<UserAgent> {
        let uaid = self.uaid.as_ref()?;
        let secret = self.secret.as_ref()?;
        Some(UserAgent {
            uaid: uaid.value.clone(),
            secret: secret.clone(),
        })
    }

    /// Record broker credentials obtained at `now`.
    pub fn set_user_agent(&mut self, user_agent: UserAgent, now: DateTime<Utc>) {
        self.uaid = Some(Fetched::new(user_agent.uaid, now));
        self.secret = Some(user_agent.secret);
        self.modified_at = now;
    }

    /// Forget the broker credentials and every subscription bound to them.
    pub fn clear_user_agent(&mut self) {
        self.uaid = None;
        self.secret = None;
        self.subscriptions.clear();
    }

    pub fn subscription(&self, channel_id: &ChannelId) -> Option<&Subscription> {
        self.subscriptions.get(channel_id)
    }
}

// ============================================================================
// PushState - the persisted document
// ============================================================================

/// The durable document: every registration keyed by profile name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushState {
    pub version: u32,
    #[serde(default)]
    pub registrations: BTreeMap<String, Registration>,
}

impl PushState {
    /// Document version written by this crate
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            registrations: BTreeMap::new(),
        }
    }

    pub fn registration(&self, profile_name: &str) -> Option<&Registration> {
        self.registrations.get(profile_name)
    }

    pub fn registration_mut(&mut self, profile_name: &str) -> Option<&mut Registration> {
        self.registrations.get_mut(profile_name)
    }

    /// Find the registration owning a channel.
    pub fn registration_for_channel(&self, channel_id: &ChannelId) -> Option<&Registration> {
        self.registrations
            .values()
            .find(|registration| registration.subscriptions.contains_key(channel_id))
    }

    /// Find a subscription by channel across all registrations.
    pub fn subscription(&self, channel_id: &ChannelId) -> Option<&Subscription> {
        self.registration_for_channel(channel_id)?
            .subscription(channel_id)
    }

    pub fn contains_channel(&self, channel_id: &ChannelId) -> bool {
        self.registration_for_channel(channel_id).is_some()
    }

    /// Total number of subscriptions across all profiles
    pub fn subscription_count(&self) -> usize {
        self.registrations
            .values()
            .map(|registration| registration.subscriptions.len())
            .sum()
    }
}

impl Default for PushState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn subscription(profile: &str, chid: &str) -> Subscription {
        Subscription {
            channel_id: ChannelId::new(chid),
            profile_name: profile.to_string(),
            service: SERVICE_WEBPUSH.to_string(),
            service_data: ProfileContext::new(profile, "/profiles/a").service_data(),
            endpoint: format!("https://push.example/{}", chid),
            created_at: now(),
        }
    }

    #[test]
    fn test_profile_context_service_data() {
        let context = ProfileContext::new("default", "/data/profiles/default");
        let data = context.service_data();

        assert_eq!(data.len(), 2);
        assert_eq!(data[PROFILE_NAME_KEY], "default");
        assert_eq!(ProfileContext::from_service_data(&data), Some(context));
    }

    #[test]
    fn test_profile_context_rejects_partial_data() {
        let mut data = ServiceData::new();
        data.insert(PROFILE_NAME_KEY.to_string(), "default".into());
        assert!(ProfileContext::from_service_data(&data).is_none());

        data.insert(PROFILE_PATH_KEY.to_string(), 42.into());
        assert!(ProfileContext::from_service_data(&data).is_none());
    }

    #[test]
    fn test_user_agent_requires_uaid_and_secret() {
        let mut registration = Registration::new("a", "https://push.example/", false, now());
        assert!(registration.user_agent().is_none());

        registration.uaid = Some(Fetched::new("uaid".to_string(), now()));
        assert!(registration.user_agent().is_none());

        registration.secret = Some("secret".to_string());
        assert_eq!(
            registration.user_agent(),
            Some(UserAgent {
                uaid: "uaid".to_string(),
                secret: "secret".to_string(),
            })
        );
    }

    #[test]
    fn test_clear_user_agent_drops_subscriptions() {
        let mut registration = Registration::new("a", "https://push.example/", false, now());
        registration.set_user_agent(
            UserAgent {
                uaid: "uaid".to_string(),
                secret: "secret".to_string(),
            },
            now(),
        );
        let sub = subscription("a", "chid-1");
        registration.subscriptions.insert(sub.channel_id.clone(), sub);

        registration.clear_user_agent();

        assert!(registration.user_agent().is_none());
        assert!(registration.subscriptions.is_empty());
    }

    #[test]
    fn test_push_state_channel_lookup() {
        let mut state = PushState::new();
        let mut a = Registration::new("a", "https://push.example/", false, now());
        let sub = subscription("a", "chid-1");
        a.subscriptions.insert(sub.channel_id.clone(), sub);
        state.registrations.insert("a".to_string(), a);
        state.registrations.insert(
            "b".to_string(),
            Registration::new("b", "https://push.example/", true, now()),
        );

        let chid = ChannelId::new("chid-1");
        assert_eq!(state.registration_for_channel(&chid).unwrap().profile_name, "a");
        assert_eq!(state.subscription(&chid).unwrap().profile_name, "a");
        assert!(!state.contains_channel(&ChannelId::new("missing")));
        assert_eq!(state.subscription_count(), 1);
    }

    #[test]
    fn test_push_state_json_layout() {
        let mut state = PushState::new();
        let mut a = Registration::new("a", "https://push.example/", false, now());
        let sub = subscription("a", "chid-1");
        a.subscriptions.insert(sub.channel_id.clone(), sub);
        state.registrations.insert("a".to_string(), a);

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["version"], 1);
        let sub = &json["registrations"]["a"]["subscriptions"]["chid-1"];
        assert_eq!(sub["channelId"], "chid-1");
        assert_eq!(sub["serviceData"][PROFILE_PATH_KEY], "/profiles/a");

        let decoded: PushState = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, state);
    }
}
