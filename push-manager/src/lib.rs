//! # Push Subscription Manager
//!
//! Registration and channel subscription lifecycle for push-bridge.
//!
//! ## Overview
//!
//! Each profile has one `Registration` with a push broker. Before channels can
//! be subscribed the broker must know the profile's user agent, which in turn
//! needs a device token from the platform token provider. The
//! `SubscriptionManager` walks a profile through those steps on demand and
//! keeps the result in a `StateStore`.
//!
//! ## Key Features
//!
//! - **Lazy Registration**: `subscribe_channel` registers the user agent first when needed
//! - **Staleness Refresh**: user agents older than 7 days or older than the token are re-registered
//! - **All-or-Nothing Commits**: state is persisted before it becomes visible
//! - **Per-Profile Serialization**: concurrent operations on one profile never interleave
//! - **Pluggable Collaborators**: `TokenProvider` and `BrokerClientFactory` traits
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chrono::Utc;
//! use push_manager::SubscriptionManager;
//! use push_manager::testing::{ScriptedBroker, ScriptedTokenProvider};
//! use state_store::{MemoryStore, ProfileContext, SERVICE_WEBPUSH};
//!
//! let manager = SubscriptionManager::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(ScriptedTokenProvider::new()),
//!     Arc::new(ScriptedBroker::new()),
//! );
//! manager.startup(Utc::now()).await;
//!
//! manager.configure("default", "https://push.example/", false, Utc::now()).await?;
//!
//! let profile = ProfileContext::new("default", "/profiles/default");
//! let subscription = manager
//!     .subscribe_channel("default", SERVICE_WEBPUSH, profile.service_data(), None, Utc::now())
//!     .await?;
//!
//! manager.unsubscribe_channel(&subscription.channel_id).await?;
//! ```

pub mod broker;
pub mod error;
pub mod manager;
pub mod state;
pub mod testing;
pub mod token;

// Re-export main types for convenience
pub use broker::{BrokerClient, BrokerClientFactory, BrokerError};
pub use error::{PushError, Result};
pub use manager::SubscriptionManager;
pub use state::{ProfileState, USER_AGENT_REFRESH_DAYS};
pub use token::{TokenError, TokenProvider};
