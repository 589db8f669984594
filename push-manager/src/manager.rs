//! Subscription lifecycle management.
//!
//! This module contains the `SubscriptionManager` which handles:
//! - Loading persisted registrations at startup
//! - Configuring a profile's broker endpoint
//! - Registering (and refreshing) the user agent with the broker
//! - Subscribing and unsubscribing channels
//! - Invalidating the device token on provider refresh
//!
//! # Locking
//!
//! Mutating operations on one profile are serialized by a per-profile async
//! mutex. The state document itself sits behind a short-lived `RwLock` that
//! is never held across a network call: an operation copies what it needs,
//! releases the lock, talks to the broker, then re-acquires the lock and
//! re-validates the registration before committing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use state_store::{
    ChannelId, PushState, Registration, ServiceData, StateStore, Subscription,
};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;
use uuid::Uuid;

use crate::broker::BrokerClientFactory;
use crate::error::{PushError, Result};
use crate::state::{user_agent_is_stale, ProfileState};
use crate::token::{TokenError, TokenProvider};

/// Owns the registration state machine for every profile.
///
/// The manager is the only writer of the state store. Construct one per
/// process and share it behind an `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use push_manager::SubscriptionManager;
/// use state_store::{JsonFileStore, SERVICE_WEBPUSH};
///
/// let manager = SubscriptionManager::new(
///     Arc::new(JsonFileStore::new("PushState.json")),
///     token_provider,
///     broker_clients,
/// );
/// manager.startup(Utc::now()).await;
///
/// manager.configure("default", "https://push.example/", false, Utc::now()).await?;
/// let subscription = manager
///     .subscribe_channel("default", SERVICE_WEBPUSH, service_data, None, Utc::now())
///     .await?;
/// println!("Push to {}", subscription.endpoint);
/// ```
pub struct SubscriptionManager {
    /// In-memory copy of the persisted document
    state: RwLock<PushState>,
    store: Arc<dyn StateStore>,
    token_provider: Arc<dyn TokenProvider>,
    clients: Arc<dyn BrokerClientFactory>,
    /// Serializes mutating operations per profile
    profile_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    /// Bumped on every invalidation; tokens fetched under an older
    /// generation are not cached
    token_generation: AtomicU64,
    loaded: Once,
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        token_provider: Arc<dyn TokenProvider>,
        clients: Arc<dyn BrokerClientFactory>,
    ) -> Self {
        Self {
            state: RwLock::new(PushState::new()),
            store,
            token_provider,
            clients,
            profile_locks: DashMap::new(),
            token_generation: AtomicU64::new(0),
            loaded: Once::new(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load persisted state and advance registrations left incomplete.
    ///
    /// Never fails: load errors are treated as "nothing persisted" and
    /// broker or token failures leave the registration to be retried by the
    /// next operation that needs it.
    pub async fn startup(&self, now: DateTime<Utc>) {
        tracing::info!("Starting up push subscription manager");
        self.ensure_loaded();

        match self.token_provider.token(false).await {
            Ok(_) => tracing::debug!("Startup: device token available"),
            Err(TokenError::RemediationRequired(message)) => {
                tracing::warn!("Startup: token provider needs user interaction: {}", message)
            }
            Err(e) => tracing::warn!("Startup: failed to get device token: {}", e),
        }

        let profiles: Vec<(String, usize)> = self
            .state
            .read()
            .registrations
            .iter()
            .map(|(profile, registration)| (profile.clone(), registration.subscriptions.len()))
            .collect();

        for (profile, subscription_count) in profiles {
            if subscription_count == 0 {
                tracing::info!(
                    "Startup: no subscriptions for profile {}; not advancing registration",
                    profile
                );
                continue;
            }

            let lock = self.profile_lock(&profile);
            let _guard = lock.lock().await;
            match self.advance_registration(&profile, now).await {
                Ok(_) => tracing::debug!("Startup: registration for {} is current", profile),
                Err(e) => tracing::warn!(
                    "Startup: failed to advance registration for {}; will retry on next use: {}",
                    profile,
                    e
                ),
            }
        }
    }

    /// Drop the cached device token everywhere so the next registration
    /// fetches a fresh one. Subscriptions are kept.
    ///
    /// The in-memory state is cleared even if persisting the change fails;
    /// the store error is returned in that case.
    pub fn invalidate_token(&self) -> Result<()> {
        self.ensure_loaded();
        tracing::info!("Invalidating device token");

        self.token_generation.fetch_add(1, Ordering::SeqCst);
        self.token_provider.invalidate();

        let mut state = self.state.write();
        for registration in state.registrations.values_mut() {
            registration.token = None;
        }
        self.store.save(&state)?;
        Ok(())
    }

    /// Handle a provider-initiated token refresh: invalidate, then rerun
    /// startup so registrations with subscriptions are refreshed eagerly.
    pub async fn on_token_refresh(&self, now: DateTime<Utc>) {
        tracing::info!("Token provider requested refresh; invalidating token and restarting");
        if let Err(e) = self.invalidate_token() {
            tracing::error!("Failed to persist token invalidation: {}", e);
        }
        self.startup(now).await;
    }

    // ========================================================================
    // Mutating operations
    // ========================================================================

    /// Create or update the registration for a profile.
    ///
    /// Pure state mutation; the broker is not contacted. Reconfiguring with
    /// the same endpoint and debug flag only touches `modified_at`. A new
    /// endpoint drops the user agent and every subscription, since they
    /// belong to the previous broker. A new debug flag drops the cached
    /// device token.
    ///
    /// Waits for any in-flight operation on the profile, so a broker call
    /// started under the old endpoint or debug flag never commits over it.
    pub async fn configure(
        &self,
        profile: &str,
        endpoint: &str,
        debug: bool,
        now: DateTime<Utc>,
    ) -> Result<Registration> {
        self.ensure_loaded();
        validate_endpoint(endpoint)?;
        let lock = self.profile_lock(profile);
        let _guard = lock.lock().await;

        self.commit(|state| {
            let Some(registration) = state.registration_mut(profile) else {
                tracing::info!("Configuring profile {} with endpoint {}", profile, endpoint);
                let registration = Registration::new(profile, endpoint, debug, now);
                state
                    .registrations
                    .insert(profile.to_string(), registration.clone());
                return Ok(registration);
            };

            if registration.endpoint != endpoint {
                tracing::info!(
                    "Endpoint for profile {} changed from {} to {}; dropping user agent and {} subscriptions",
                    profile,
                    registration.endpoint,
                    endpoint,
                    registration.subscriptions.len()
                );
                registration.endpoint = endpoint.to_string();
                registration.clear_user_agent();
            }

            if registration.debug != debug {
                let enabled = debug;
                tracing::info!("Debug flag for profile {} changed to {}", profile, enabled);
                registration.debug = enabled;
                registration.token = None;
            }

            registration.modified_at = now;
            Ok(registration.clone())
        })
    }

    /// Make sure the broker knows this profile's user agent.
    ///
    /// Fetches the device token if none is cached, then registers a new
    /// user agent or refreshes a stale one.
    pub async fn register_user_agent(
        &self,
        profile: &str,
        now: DateTime<Utc>,
    ) -> Result<Registration> {
        self.ensure_loaded();
        let lock = self.profile_lock(profile);
        let _guard = lock.lock().await;

        self.advance_registration(profile, now).await
    }

    /// Subscribe a new channel for a profile.
    ///
    /// The user agent is (re-)registered first when needed. Nothing is
    /// persisted unless every step succeeds.
    pub async fn subscribe_channel(
        &self,
        profile: &str,
        service: &str,
        service_data: ServiceData,
        app_server_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        self.ensure_loaded();
        let lock = self.profile_lock(profile);
        let _guard = lock.lock().await;

        let registration = self.advance_registration(profile, now).await?;
        let user_agent = registration
            .user_agent()
            .ok_or_else(|| PushError::ConcurrentModification {
                profile: profile.to_string(),
            })?;

        let channel_id = self.fresh_channel_id();
        let client = self.clients.client(&registration.endpoint, registration.debug);
        tracing::debug!("Requesting channel {} for profile {}", channel_id, profile);
        let endpoint = client
            .subscribe_channel(&user_agent, &channel_id, app_server_key)
            .await?;

        let subscription = Subscription {
            channel_id: channel_id.clone(),
            profile_name: profile.to_string(),
            service: service.to_string(),
            service_data,
            endpoint,
            created_at: now,
        };

        let committed = self.commit(|state| {
            if state.contains_channel(&channel_id) {
                return Err(PushError::ConcurrentModification {
                    profile: profile.to_string(),
                });
            }
            let current = revalidate(state, &registration)?;
            current
                .subscriptions
                .insert(channel_id.clone(), subscription.clone());
            Ok(())
        });

        if let Err(e) = committed {
            // The broker already holds the channel; release it best-effort
            tokio::spawn(async move {
                if let Err(e) = client.unsubscribe_channel(&user_agent, &channel_id).await {
                    tracing::warn!("Failed to release orphaned channel {}: {}", channel_id, e);
                }
            });
            return Err(e);
        }

        tracing::info!(
            "Subscribed channel {} for profile {} (service {})",
            subscription.channel_id,
            profile,
            subscription.service
        );
        Ok(subscription)
    }

    /// Remove a channel subscription.
    ///
    /// Returns the removed subscription, or `None` when the channel is
    /// unknown. Local state is authoritative: the broker is told afterwards,
    /// fire-and-forget, and its failure is only logged.
    pub async fn unsubscribe_channel(&self, channel_id: &ChannelId) -> Result<Option<Subscription>> {
        self.ensure_loaded();
        let Some(profile) = self
            .state
            .read()
            .registration_for_channel(channel_id)
            .map(|registration| registration.profile_name.clone())
        else {
            tracing::debug!("No subscription for channel {}; nothing to unsubscribe", channel_id);
            return Ok(None);
        };

        let lock = self.profile_lock(&profile);
        let _guard = lock.lock().await;

        let removed = self.commit(|state| {
            let Some(registration) = state.registration_mut(&profile) else {
                return Ok(None);
            };
            let Some(subscription) = registration.subscriptions.remove(channel_id) else {
                return Ok(None);
            };
            Ok(Some((
                subscription,
                registration.user_agent(),
                registration.endpoint.clone(),
                registration.debug,
            )))
        })?;

        let Some((subscription, user_agent, endpoint, debug)) = removed else {
            return Ok(None);
        };
        tracing::info!("Unsubscribed channel {} for profile {}", channel_id, profile);

        if let Some(user_agent) = user_agent {
            let client = self.clients.client(&endpoint, debug);
            let channel_id = channel_id.clone();
            tokio::spawn(async move {
                if let Err(e) = client.unsubscribe_channel(&user_agent, &channel_id).await {
                    tracing::warn!(
                        "Broker failed to unsubscribe channel {}; local state already removed: {}",
                        channel_id,
                        e
                    );
                }
            });
        }

        Ok(Some(subscription))
    }

    // ========================================================================
    // Read-only lookups
    // ========================================================================

    pub fn registration(&self, profile: &str) -> Option<Registration> {
        self.ensure_loaded();
        self.state.read().registration(profile).cloned()
    }

    pub fn registration_for_subscription(&self, channel_id: &ChannelId) -> Option<Registration> {
        self.ensure_loaded();
        self.state
            .read()
            .registration_for_channel(channel_id)
            .cloned()
    }

    pub fn subscription(&self, channel_id: &ChannelId) -> Option<Subscription> {
        self.ensure_loaded();
        self.state.read().subscription(channel_id).cloned()
    }

    /// All subscriptions of a profile; empty when the profile is unknown.
    pub fn all_subscriptions_for_profile(&self, profile: &str) -> BTreeMap<ChannelId, Subscription> {
        self.ensure_loaded();
        self.state
            .read()
            .registration(profile)
            .map(|registration| registration.subscriptions.clone())
            .unwrap_or_default()
    }

    pub fn profile_state(&self, profile: &str) -> ProfileState {
        self.ensure_loaded();
        ProfileState::of(self.state.read().registration(profile))
    }

    /// A consistent copy of the whole document.
    pub fn snapshot(&self) -> PushState {
        self.ensure_loaded();
        self.state.read().clone()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_loaded(&self) {
        self.loaded.call_once(|| match self.store.load() {
            Ok(Some(state)) => {
                tracing::info!(
                    "Loaded {} registrations with {} subscriptions",
                    state.registrations.len(),
                    state.subscription_count()
                );
                *self.state.write() = state;
            }
            Ok(None) => tracing::info!("No persisted push state; starting fresh"),
            Err(e) => tracing::error!("Failed to load persisted push state; starting fresh: {}", e),
        });
    }

    fn profile_lock(&self, profile: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(&self.profile_locks.entry(profile.to_string()).or_default())
    }

    /// Apply `mutate` to a copy of the document, persist it, then publish it.
    ///
    /// If either step fails the in-memory document is left untouched.
    fn commit<T>(&self, mutate: impl FnOnce(&mut PushState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write();
        let mut next = state.clone();
        let output = mutate(&mut next)?;
        self.store.save(&next)?;
        *state = next;
        Ok(output)
    }

    fn fresh_channel_id(&self) -> ChannelId {
        loop {
            let channel_id = ChannelId::new(Uuid::new_v4().to_string());
            if !self.state.read().contains_channel(&channel_id) {
                return channel_id;
            }
        }
    }

    /// Bring a profile's registration to `Registered`. Caller holds the
    /// profile lock.
    async fn advance_registration(
        &self,
        profile: &str,
        now: DateTime<Utc>,
    ) -> Result<Registration> {
        let snapshot = self
            .registration(profile)
            .ok_or_else(|| PushError::needs_configuration(profile))?;

        let generation = self.token_generation.load(Ordering::SeqCst);
        let token = match snapshot.token.clone() {
            Some(token) => token,
            None => {
                tracing::debug!("Requesting device token for profile {}", profile);
                self.token_provider.token(snapshot.debug).await?
            }
        };

        let client = self.clients.client(&snapshot.endpoint, snapshot.debug);
        let stale = snapshot
            .uaid
            .as_ref()
            .map(|uaid| user_agent_is_stale(uaid, &token, now));
        let user_agent = match (snapshot.user_agent(), stale) {
            (Some(_), Some(false)) => {
                if snapshot.token.as_ref() == Some(&token) {
                    return Ok(snapshot);
                }
                None
            }
            (Some(user_agent), _) => {
                tracing::info!(
                    "Stale user agent for profile {}; re-registering with {}",
                    profile,
                    snapshot.endpoint
                );
                client
                    .reregister_user_agent(&user_agent, &token.value)
                    .await?;
                Some(user_agent)
            }
            (None, _) => {
                tracing::info!(
                    "No user agent for profile {}; registering with {}",
                    profile,
                    snapshot.endpoint
                );
                Some(client.register_user_agent(&token.value).await?)
            }
        };

        self.commit(|state| {
            let current = revalidate(state, &snapshot)?;
            // Read under the write lock so a concurrent invalidation either
            // lands before this check or clears the token after the commit
            if self.token_generation.load(Ordering::SeqCst) == generation {
                current.token = Some(token);
            }
            if let Some(user_agent) = user_agent {
                current.set_user_agent(user_agent, now);
            }
            Ok(current.clone())
        })
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SubscriptionManager")
            .field("registrations", &state.registrations.len())
            .field("subscriptions", &state.subscription_count())
            .finish()
    }
}

/// Re-check, under the write lock, that the registration an in-flight
/// operation started from is still the one in the document.
fn revalidate<'a>(state: &'a mut PushState, snapshot: &Registration) -> Result<&'a mut Registration> {
    let profile = &snapshot.profile_name;
    let current = state
        .registration_mut(profile)
        .ok_or_else(|| PushError::needs_configuration(profile))?;

    let same_uaid = current.uaid.as_ref().map(|u| &u.value) == snapshot.uaid.as_ref().map(|u| &u.value);
    if current.endpoint != snapshot.endpoint || !same_uaid {
        tracing::warn!("Registration for profile {} changed during a broker call", profile);
        return Err(PushError::ConcurrentModification {
            profile: profile.clone(),
        });
    }
    Ok(current)
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let invalid = |reason: String| PushError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {}", other))),
    }
}
