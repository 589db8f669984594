//! # Push Relay
//!
//! Routes inbound provider messages to the host component.
//!
//! ## Overview
//!
//! Every provider message carries a channel ID (`chid`). The relay resolves it
//! to a subscription, drops anything the host should not see, and turns the
//! rest into `HostMessage`s. Until the host signals it is initialized those
//! messages wait in an in-memory FIFO queue; the `initialized` signal flushes
//! the queue in arrival order, and from then on messages go straight through.
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use push_relay::{host, ChannelId, Disposition, ProviderMessage, Relay, Subscription};
//!
//! let (bridge, messages) = host::channel();
//! let relay = Relay::new(Arc::new(bridge));
//! let subscriptions: HashMap<ChannelId, Subscription> = HashMap::new();
//!
//! // Unknown channels are dropped, never queued
//! let disposition = relay.on_message_received(&ProviderMessage::for_channel("abc"), &subscriptions);
//! assert!(matches!(disposition, Disposition::Dropped(_)));
//!
//! relay.on_host_initialized();
//! assert!(messages.try_recv().is_none());
//! ```

pub mod host;
pub mod message;
pub mod relay;

// Re-export main types for convenience
pub use host::{ChannelHostBridge, DeliveryError, HostBridge, HostMessages};
pub use message::{HostMessage, ProviderMessage};
pub use relay::{Disposition, DropReason, Relay, SubscriptionLookup};

// Re-export commonly used types from dependencies
pub use state_store::{ChannelId, Subscription};
