//! # Push Bridge
//!
//! A push notification bridge between a platform messaging provider and a
//! host component that consumes web push messages.
//!
//! ## Overview
//!
//! The bridge keeps one registration per profile with a push broker, creates
//! and removes channel subscriptions on the host's behalf, and relays
//! inbound provider messages to the host, holding them until the host says
//! it is ready.
//!
//! ## Key Features
//!
//! - **Sync-First API**: `PushService::execute` blocks; all async work runs on a background worker
//! - **Typed Commands**: one `Command` variant per host request, JSON-tagged by `command`
//! - **Durable State**: registrations and subscriptions survive restarts in one JSON document
//! - **Ordered Delivery**: queued messages flush in arrival order, exactly once
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use push_bridge::{Command, PushService, PushServiceConfig};
//!
//! push_bridge::logging::init_logging_from_env()?;
//!
//! let service = PushService::builder(PushServiceConfig::from_env(), token_provider, broker_clients)
//!     .start()?;
//!
//! service.execute(Command::Configure {
//!     endpoint: Some("https://push.example/".to_string()),
//!     debug: false,
//! })?;
//! let channel = service.execute(Command::SubscribeChannel { app_server_key: None })?;
//!
//! // Messages received before this point were queued
//! service.execute(Command::Initialized)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! host ──Command──▶ PushService ──Envelope──▶ worker thread
//!                                              │
//!                        ┌─────────────────────┴──────────────────┐
//!                        ▼                                        ▼
//!               SubscriptionManager ◀──lookup── Relay ──HostMessage──▶ host
//!                 │        │        │
//!           TokenProvider  │   BrokerClient
//!                          ▼
//!                      StateStore
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod service;
mod worker;

// Re-export main types for convenience
pub use command::{ChannelEndpoint, Command, CommandResponse, SubscriptionRecord};
pub use config::PushServiceConfig;
pub use error::{CommandError, Result};
pub use service::{PushService, PushServiceBuilder};

// Re-export commonly used types from dependencies
pub use push_manager::{
    BrokerClient, BrokerClientFactory, BrokerError, ProfileState, PushError, SubscriptionManager,
    TokenError, TokenProvider,
};
pub use push_relay::{HostBridge, HostMessage, HostMessages, ProviderMessage};
pub use state_store::{ChannelId, ProfileContext, Registration, StateStore, Subscription};
