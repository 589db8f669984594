//! Background worker thread for the push service
//!
//! Spawns a thread with its own tokio runtime. Commands, inbound provider
//! messages and token refreshes arrive on one queue and are handled strictly
//! in order, so relay signals and subscription changes never interleave.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use push_manager::SubscriptionManager;
use push_relay::{ProviderMessage, Relay};
use state_store::{ChannelId, ProfileContext, SERVICE_WEBPUSH};
use tokio::sync::{mpsc, oneshot};

use crate::command::{ChannelEndpoint, Command, CommandResponse, SubscriptionRecord};
use crate::error::{CommandError, Result};

/// Work items sent from the `PushService` handle to the worker
#[derive(Debug)]
pub(crate) enum Envelope {
    /// Run a host command and send back its result
    Command {
        command: Command,
        reply: oneshot::Sender<Result<CommandResponse>>,
    },
    /// Route a message from the messaging provider
    Inbound(ProviderMessage),
    /// The token provider rotated the device token
    TokenRefresh,
    /// Shutdown the worker
    Shutdown,
}

/// Everything the worker needs to handle envelopes
pub(crate) struct WorkerContext {
    pub manager: Arc<SubscriptionManager>,
    pub relay: Arc<Relay>,
    pub profile: ProfileContext,
}

/// Spawns the background push worker thread
///
/// The worker runs `startup` before taking any envelope off the queue.
pub(crate) fn spawn_push_worker(
    context: WorkerContext,
    envelope_rx: mpsc::UnboundedReceiver<Envelope>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("push-bridge-worker".to_string())
        .spawn(move || {
            // Create a new single-threaded tokio runtime for this worker
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!("Failed to create tokio runtime for push worker: {}", e);
                    return;
                }
            };

            rt.block_on(run_worker_loop(context, envelope_rx));
        })
}

/// Main loop running inside the tokio runtime
async fn run_worker_loop(context: WorkerContext, mut envelope_rx: mpsc::UnboundedReceiver<Envelope>) {
    context.manager.startup(Utc::now()).await;
    tracing::info!("Push worker started for profile {}", context.profile.name);

    while let Some(envelope) = envelope_rx.recv().await {
        match envelope {
            Envelope::Command { command, reply } => {
                let name = command.name();
                tracing::debug!("Worker: handling {}", name);
                let result = handle_command(&context, command).await;
                if let Err(e) = &result {
                    tracing::warn!("{} failed: {}", name, e);
                }
                if reply.send(result).is_err() {
                    tracing::debug!("Caller of {} went away before the reply", name);
                }
            }
            Envelope::Inbound(message) => {
                let disposition = context
                    .relay
                    .on_message_received(&message, &*context.manager);
                tracing::debug!("Worker: inbound message {:?}", disposition);
            }
            Envelope::TokenRefresh => {
                context.manager.on_token_refresh(Utc::now()).await;
            }
            Envelope::Shutdown => {
                tracing::info!("Worker received shutdown command");
                break;
            }
        }
    }

    tracing::info!("Push worker shut down");
}

/// Dispatch one host command against the manager and relay
pub(crate) async fn handle_command(context: &WorkerContext, command: Command) -> Result<CommandResponse> {
    let profile = &context.profile.name;

    match command {
        Command::Configure { endpoint, debug } => {
            let endpoint = endpoint
                .filter(|endpoint| !endpoint.is_empty())
                .ok_or(CommandError::MissingEndpoint)?;
            context
                .manager
                .configure(profile, &endpoint, debug, Utc::now())
                .await?;
            Ok(CommandResponse::Empty)
        }

        Command::DumpRegistration => Err(CommandError::NotImplemented("DumpRegistration")),

        Command::DumpSubscriptions => {
            let records: BTreeMap<ChannelId, SubscriptionRecord> = context
                .manager
                .all_subscriptions_for_profile(profile)
                .iter()
                .map(|(channel_id, subscription)| (channel_id.clone(), subscription.into()))
                .collect();
            Ok(CommandResponse::Json(serde_json::to_value(records)?))
        }

        Command::Initialized => {
            context.relay.on_host_initialized();
            Ok(CommandResponse::Empty)
        }

        Command::Uninitialized => {
            context.relay.on_host_uninitialized();
            Ok(CommandResponse::Empty)
        }

        Command::RegisterUserAgent => {
            context
                .manager
                .register_user_agent(profile, Utc::now())
                .await?;
            Ok(CommandResponse::Empty)
        }

        Command::UnregisterUserAgent => Err(CommandError::NotImplemented("UnregisterUserAgent")),

        Command::SubscribeChannel { app_server_key } => {
            let subscription = context
                .manager
                .subscribe_channel(
                    profile,
                    SERVICE_WEBPUSH,
                    context.profile.service_data(),
                    app_server_key.as_deref(),
                    Utc::now(),
                )
                .await?;
            let result = ChannelEndpoint {
                channel_id: subscription.channel_id,
                endpoint: subscription.endpoint,
            };
            Ok(CommandResponse::Json(serde_json::to_value(result)?))
        }

        Command::UnsubscribeChannel { channel_id } => {
            let channel_id = channel_id
                .filter(|channel_id| !channel_id.is_empty())
                .ok_or(CommandError::MissingChannelId)?;
            match context
                .manager
                .unsubscribe_channel(&ChannelId::new(channel_id.as_str()))
                .await?
            {
                Some(_) => Ok(CommandResponse::Empty),
                None => Err(CommandError::UnknownChannel(channel_id)),
            }
        }
    }
}
