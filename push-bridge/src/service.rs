//! Sync-first push service handle
//!
//! Provides a blocking API for host commands. All async work runs on the
//! background worker thread; see `worker`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use push_manager::{BrokerClientFactory, ProfileState, SubscriptionManager, TokenProvider};
use push_relay::{host, HostBridge, HostMessages, ProviderMessage, Relay};
use state_store::{ChannelId, JsonFileStore, Registration, StateStore, Subscription};
use tokio::sync::{mpsc, oneshot};

use crate::command::{Command, CommandResponse};
use crate::config::PushServiceConfig;
use crate::error::{CommandError, Result};
use crate::worker::{spawn_push_worker, Envelope, WorkerContext};

/// Builder for a `PushService`.
///
/// The token provider and broker client factory are required. The state
/// store defaults to a `JsonFileStore` at the configured path and the host
/// bridge to an in-process channel readable through `PushService::messages`.
pub struct PushServiceBuilder {
    config: PushServiceConfig,
    token_provider: Arc<dyn TokenProvider>,
    broker_clients: Arc<dyn BrokerClientFactory>,
    store: Option<Arc<dyn StateStore>>,
    host: Option<Arc<dyn HostBridge>>,
}

impl PushServiceBuilder {
    /// Persist state in `store` instead of the configured file.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Deliver host messages to `host` instead of the built-in channel.
    pub fn host_bridge(mut self, host: Arc<dyn HostBridge>) -> Self {
        self.host = Some(host);
        self
    }

    /// Validate the configuration and start the background worker.
    ///
    /// The worker loads persisted state and advances pending registrations
    /// before it handles the first command.
    pub fn start(self) -> Result<PushService> {
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(JsonFileStore::new(&self.config.state_path)),
        };
        let (host, messages) = match self.host {
            Some(host) => (host, None),
            None => {
                let (bridge, messages) = host::channel();
                (Arc::new(bridge) as Arc<dyn HostBridge>, Some(messages))
            }
        };

        let manager = Arc::new(SubscriptionManager::new(
            store,
            self.token_provider,
            self.broker_clients,
        ));
        let relay = Arc::new(Relay::new(host).with_active_profile(self.config.profile.clone()));

        tracing::info!(
            "Starting push service for profile {} (state at {}, sender {})",
            self.config.profile.name,
            self.config.state_path.display(),
            self.config.sender_id.as_deref().unwrap_or("<none>")
        );

        let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();
        let worker = spawn_push_worker(
            WorkerContext {
                manager: Arc::clone(&manager),
                relay: Arc::clone(&relay),
                profile: self.config.profile.clone(),
            },
            envelope_rx,
        )?;

        Ok(PushService {
            config: self.config,
            envelope_tx,
            manager,
            relay,
            messages,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// Handle to a running push service
///
/// Owns the background worker. Dropping the handle stops the worker after
/// the envelopes already queued; call `shutdown` to also wait for it.
///
/// # Example
///
/// ```rust,ignore
/// use push_bridge::{Command, PushService, PushServiceConfig};
///
/// let service = PushService::builder(PushServiceConfig::from_env(), token_provider, broker_clients)
///     .start()?;
///
/// service.execute(Command::Configure {
///     endpoint: Some("https://push.example/".to_string()),
///     debug: false,
/// })?;
/// let response = service.execute(Command::SubscribeChannel { app_server_key: None })?;
///
/// // The host is up; deliver anything that arrived meanwhile
/// service.execute(Command::Initialized)?;
/// for message in service.messages().unwrap() {
///     println!("push for {}", message.channel_id);
/// }
/// ```
pub struct PushService {
    config: PushServiceConfig,

    /// Send envelopes to the background worker
    envelope_tx: mpsc::UnboundedSender<Envelope>,

    /// Shared with the worker; used here for read-only lookups
    manager: Arc<SubscriptionManager>,

    relay: Arc<Relay>,

    /// Consumer side of the built-in host bridge, if one is used
    messages: Option<HostMessages>,

    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PushService {
    pub fn builder(
        config: PushServiceConfig,
        token_provider: Arc<dyn TokenProvider>,
        broker_clients: Arc<dyn BrokerClientFactory>,
    ) -> PushServiceBuilder {
        PushServiceBuilder {
            config,
            token_provider,
            broker_clients,
            store: None,
            host: None,
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Run a command and block until the worker replies.
    ///
    /// Must not be called from inside an async runtime; use `execute_async`
    /// there.
    pub fn execute(&self, command: Command) -> Result<CommandResponse> {
        let reply = self.submit(command)?;
        reply
            .blocking_recv()
            .map_err(|_| CommandError::WorkerDisconnected)?
    }

    /// Run a command and await the worker's reply.
    pub async fn execute_async(&self, command: Command) -> Result<CommandResponse> {
        let reply = self.submit(command)?;
        reply.await.map_err(|_| CommandError::WorkerDisconnected)?
    }

    /// Hand a provider message to the relay. Fire-and-forget.
    pub fn on_message_received(&self, message: ProviderMessage) -> Result<()> {
        self.send(Envelope::Inbound(message))
    }

    /// The token provider rotated the device token: drop the cached token and
    /// re-register profiles that have subscriptions.
    pub fn on_token_refresh(&self) -> Result<()> {
        self.send(Envelope::TokenRefresh)
    }

    // ========================================================================
    // Read-only lookups
    // ========================================================================

    pub fn config(&self) -> &PushServiceConfig {
        &self.config
    }

    /// The underlying subscription manager, for lookups
    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }

    /// Blocking iterator over messages delivered to the built-in host bridge
    ///
    /// Returns `None` if the service was built with a custom host bridge.
    pub fn messages(&self) -> Option<HostMessages> {
        self.messages.clone()
    }

    pub fn registration(&self) -> Option<Registration> {
        self.manager.registration(&self.config.profile.name)
    }

    pub fn registration_for_subscription(&self, channel_id: &ChannelId) -> Option<Registration> {
        self.manager.registration_for_subscription(channel_id)
    }

    pub fn subscriptions(&self) -> BTreeMap<ChannelId, Subscription> {
        self.manager
            .all_subscriptions_for_profile(&self.config.profile.name)
    }

    pub fn profile_state(&self) -> ProfileState {
        self.manager.profile_state(&self.config.profile.name)
    }

    /// Whether the host has signalled it can receive messages
    pub fn is_host_ready(&self) -> bool {
        self.relay.is_ready()
    }

    /// Number of messages waiting for the host
    pub fn pending_messages(&self) -> usize {
        self.relay.pending_count()
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop the worker and wait for it to finish.
    ///
    /// Envelopes queued before the call are still handled. Queued host
    /// messages are not persisted and are lost.
    pub fn shutdown(&self) {
        let _ = self.envelope_tx.send(Envelope::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Push worker panicked");
            }
        }
    }

    fn submit(&self, command: Command) -> Result<oneshot::Receiver<Result<CommandResponse>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Envelope::Command {
            command,
            reply: reply_tx,
        })?;
        Ok(reply_rx)
    }

    fn send(&self, envelope: Envelope) -> Result<()> {
        self.envelope_tx
            .send(envelope)
            .map_err(|_| CommandError::WorkerDisconnected)
    }
}

impl Drop for PushService {
    fn drop(&mut self) {
        tracing::debug!(
            "PushService dropping, {} messages still queued for the host",
            self.relay.pending_count()
        );

        // Send shutdown command to worker
        let _ = self.envelope_tx.send(Envelope::Shutdown);
    }
}

impl std::fmt::Debug for PushService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushService")
            .field("config", &self.config)
            .field("relay", &self.relay)
            .finish()
    }
}
