//! Inbound message routing and the readiness queue.
//!
//! The `Relay` resolves each provider message to its subscription, checks
//! that it is meant for the host, and then either forwards it or holds it
//! until the host signals it is initialized.
//!
//! # Ordering
//!
//! The readiness flag and the queue share one mutex, and forwarding happens
//! with that mutex held. A message arriving during a flush therefore waits
//! for the flush to finish and is forwarded after every queued message.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use push_manager::SubscriptionManager;
use state_store::{ChannelId, ProfileContext, Subscription, SERVICE_WEBPUSH};

use crate::host::HostBridge;
use crate::message::{HostMessage, ProviderMessage};

/// Resolves channel IDs to subscriptions.
pub trait SubscriptionLookup {
    fn subscription(&self, channel_id: &ChannelId) -> Option<Subscription>;
}

impl SubscriptionLookup for SubscriptionManager {
    fn subscription(&self, channel_id: &ChannelId) -> Option<Subscription> {
        SubscriptionManager::subscription(self, channel_id)
    }
}

impl SubscriptionLookup for HashMap<ChannelId, Subscription> {
    fn subscription(&self, channel_id: &ChannelId) -> Option<Subscription> {
        self.get(channel_id).cloned()
    }
}

impl SubscriptionLookup for BTreeMap<ChannelId, Subscription> {
    fn subscription(&self, channel_id: &ChannelId) -> Option<Subscription> {
        self.get(channel_id).cloned()
    }
}

/// Why an inbound message was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("message has no channel ID")]
    MissingChannelId,

    #[error("no subscription for channel {0}")]
    UnknownChannel(ChannelId),

    #[error("message directed to unknown service {0}")]
    UnknownService(String),

    #[error("corrupt service data for channel {0}")]
    CorruptServiceData(ChannelId),

    #[error("channel {0} belongs to a different profile")]
    ProfileMismatch(ChannelId),
}

/// What happened to a message handed to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Delivered to the host
    Forwarded,
    /// Held until the host is initialized
    Queued,
    /// Not deliverable; logged and discarded
    Dropped(DropReason),
}

#[derive(Debug, Default)]
struct RelayState {
    ready: bool,
    queue: VecDeque<HostMessage>,
}

/// Routes provider messages to the host, buffering until it is ready.
///
/// The readiness flag starts `false` and is never persisted: after every
/// process start the host has to signal readiness again. Queued messages
/// are in memory only.
pub struct Relay {
    state: Mutex<RelayState>,
    host: Arc<dyn HostBridge>,
    /// Profile the host is running; messages for other profiles are dropped
    active_profile: Option<ProfileContext>,
}

impl Relay {
    pub fn new(host: Arc<dyn HostBridge>) -> Self {
        Self {
            state: Mutex::new(RelayState::default()),
            host,
            active_profile: None,
        }
    }

    /// Only accept messages for subscriptions created by `profile`.
    pub fn with_active_profile(mut self, profile: ProfileContext) -> Self {
        self.active_profile = Some(profile);
        self
    }

    /// Resolve and validate an inbound provider message, then forward or
    /// queue it.
    ///
    /// Undeliverable messages are dropped with a log line and never retried.
    pub fn on_message_received(
        &self,
        message: &ProviderMessage,
        subscriptions: &dyn SubscriptionLookup,
    ) -> Disposition {
        match self.resolve(message, subscriptions) {
            Ok(host_message) => self.enqueue_or_send(host_message),
            Err(reason) => Disposition::Dropped(reason),
        }
    }

    /// Forward `message` if the host is ready, otherwise queue it.
    pub fn enqueue_or_send(&self, message: HostMessage) -> Disposition {
        let mut state = self.state.lock();
        if !state.ready {
            tracing::info!(
                "Host not initialized; queueing message for channel {}",
                message.channel_id
            );
            state.queue.push_back(message);
            return Disposition::Queued;
        }

        match self.host.deliver(&message) {
            Ok(()) => {
                tracing::debug!("Delivered message for channel {}", message.channel_id);
                Disposition::Forwarded
            }
            Err(e) => {
                tracing::warn!(
                    "Host delivery failed; marking host uninitialized and queueing message: {}",
                    e
                );
                state.ready = false;
                state.queue.push_back(message);
                Disposition::Queued
            }
        }
    }

    /// Mark the host ready and flush the queue in arrival order.
    ///
    /// Returns the number of messages delivered. If the host fails mid-flush
    /// the undelivered remainder stays queued and the relay goes back to
    /// not-ready.
    pub fn on_host_initialized(&self) -> usize {
        let mut state = self.state.lock();
        state.ready = true;

        let mut flushed = 0;
        while let Some(message) = state.queue.pop_front() {
            if let Err(e) = self.host.deliver(&message) {
                tracing::warn!(
                    "Host delivery failed during flush; {} messages remain queued: {}",
                    state.queue.len() + 1,
                    e
                );
                state.queue.push_front(message);
                state.ready = false;
                break;
            }
            flushed += 1;
        }

        tracing::info!("Host initialized; flushed {} queued messages", flushed);
        flushed
    }

    /// Mark the host not ready. Queued messages stay queued.
    pub fn on_host_uninitialized(&self) {
        tracing::info!("Host uninitialized");
        self.state.lock().ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Number of messages waiting for the host
    pub fn pending_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn resolve(
        &self,
        message: &ProviderMessage,
        subscriptions: &dyn SubscriptionLookup,
    ) -> Result<HostMessage, DropReason> {
        let Some(channel_id) = message.channel_id() else {
            tracing::warn!("Provider message has no chid; dropping");
            return Err(DropReason::MissingChannelId);
        };

        let Some(subscription) = subscriptions.subscription(&channel_id) else {
            tracing::warn!("No subscription found for chid {}; dropping message", channel_id);
            return Err(DropReason::UnknownChannel(channel_id));
        };

        if subscription.service != SERVICE_WEBPUSH {
            tracing::error!(
                "Message for chid {} directed to unknown service {}; dropping",
                channel_id,
                subscription.service
            );
            return Err(DropReason::UnknownService(subscription.service));
        }

        let Some(profile) = ProfileContext::from_service_data(&subscription.service_data) else {
            tracing::error!("Corrupt service data for chid {}; dropping message", channel_id);
            return Err(DropReason::CorruptServiceData(channel_id));
        };

        if let Some(active) = &self.active_profile {
            if *active != profile {
                tracing::warn!(
                    "Message for chid {} belongs to profile {} but host runs {}; dropping",
                    channel_id,
                    profile.name,
                    active.name
                );
                return Err(DropReason::ProfileMismatch(channel_id));
            }
        }

        Ok(HostMessage::from_provider(channel_id, message))
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Relay")
            .field("ready", &state.ready)
            .field("pending", &state.queue.len())
            .field("active_profile", &self.active_profile)
            .finish()
    }
}
