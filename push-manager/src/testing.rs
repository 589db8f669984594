//! Scripted collaborators for tests.
//!
//! `ScriptedTokenProvider` and `ScriptedBroker` stand in for the platform token
//! provider and the network broker client. Both record what they were asked to
//! do and can be told to fail.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use state_store::{ChannelId, Fetched, UserAgent};

use crate::broker::{BrokerClient, BrokerClientFactory, BrokerError};
use crate::token::{TokenError, TokenProvider};

// ============================================================================
// ScriptedTokenProvider
// ============================================================================

#[derive(Debug)]
struct TokenScript {
    generation: u32,
    issued_at: DateTime<Utc>,
    remediation: Option<String>,
    fetches: usize,
    invalidations: usize,
}

/// Token provider issuing `token-1`, `token-2`, ... one per invalidation.
#[derive(Debug)]
pub struct ScriptedTokenProvider {
    script: Mutex<TokenScript>,
}

impl ScriptedTokenProvider {
    /// Tokens are issued at the Unix epoch until `set_issued_at` says otherwise.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(TokenScript {
                generation: 1,
                issued_at: DateTime::<Utc>::default(),
                remediation: None,
                fetches: 0,
                invalidations: 0,
            }),
        }
    }

    /// Set the issue time reported with every token from now on.
    pub fn set_issued_at(&self, issued_at: DateTime<Utc>) {
        self.script.lock().issued_at = issued_at;
    }

    /// Make `token` fail with `RemediationRequired` (or stop failing).
    pub fn set_remediation_required(&self, message: Option<&str>) {
        self.script.lock().remediation = message.map(str::to_string);
    }

    pub fn current_token(&self) -> String {
        format!("token-{}", self.script.lock().generation)
    }

    pub fn fetch_count(&self) -> usize {
        self.script.lock().fetches
    }

    pub fn invalidation_count(&self) -> usize {
        self.script.lock().invalidations
    }
}

impl Default for ScriptedTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenProvider for ScriptedTokenProvider {
    async fn token(&self, _debug: bool) -> Result<Fetched<String>, TokenError> {
        let mut script = self.script.lock();
        if let Some(message) = &script.remediation {
            return Err(TokenError::RemediationRequired(message.clone()));
        }
        script.fetches += 1;
        Ok(Fetched::new(
            format!("token-{}", script.generation),
            script.issued_at,
        ))
    }

    fn invalidate(&self) {
        let mut script = self.script.lock();
        script.generation += 1;
        script.invalidations += 1;
    }
}

// ============================================================================
// ScriptedBroker
// ============================================================================

/// A call made against a scripted broker client.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    RegisterUserAgent {
        endpoint: String,
        token: String,
    },
    ReregisterUserAgent {
        endpoint: String,
        uaid: String,
        token: String,
    },
    SubscribeChannel {
        endpoint: String,
        uaid: String,
        channel_id: ChannelId,
        app_server_key: Option<String>,
    },
    UnsubscribeChannel {
        endpoint: String,
        uaid: String,
        channel_id: ChannelId,
    },
}

#[derive(Debug, Default)]
struct BrokerShared {
    calls: Mutex<Vec<BrokerCall>>,
    failures: Mutex<VecDeque<BrokerError>>,
    latency: Mutex<Option<Duration>>,
    issued: AtomicUsize,
}

/// In-process broker. Acts as its own client factory; every client shares
/// the call log and the failure script.
///
/// Channel endpoints are the configured endpoint followed by the channel ID.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBroker {
    shared: Arc<BrokerShared>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, so concurrent operations overlap in flight.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.shared.latency.lock() = Some(latency);
        self
    }

    /// Fail the next call (of any kind) with `error`. Failures queue up.
    pub fn fail_next(&self, error: BrokerError) {
        self.shared.failures.lock().push_back(error);
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.shared.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.shared.calls.lock().len()
    }

    /// Wait until at least `count` calls were recorded, polling every few
    /// milliseconds. Returns `false` if `timeout` elapses first.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.call_count() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

impl BrokerClientFactory for ScriptedBroker {
    fn client(&self, endpoint: &str, _debug: bool) -> Arc<dyn BrokerClient> {
        Arc::new(ScriptedClient {
            endpoint: endpoint.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }
}

struct ScriptedClient {
    endpoint: String,
    shared: Arc<BrokerShared>,
}

impl ScriptedClient {
    async fn record(&self, call: BrokerCall) -> Result<(), BrokerError> {
        let latency = *self.shared.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.shared.calls.lock().push(call);
        match self.shared.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn channel_endpoint(&self, channel_id: &ChannelId) -> String {
        if self.endpoint.ends_with('/') {
            format!("{}{}", self.endpoint, channel_id)
        } else {
            format!("{}/{}", self.endpoint, channel_id)
        }
    }
}

#[async_trait]
impl BrokerClient for ScriptedClient {
    async fn register_user_agent(&self, token: &str) -> Result<UserAgent, BrokerError> {
        self.record(BrokerCall::RegisterUserAgent {
            endpoint: self.endpoint.clone(),
            token: token.to_string(),
        })
        .await?;

        let n = self.shared.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UserAgent {
            uaid: format!("uaid-{}", n),
            secret: format!("secret-{}", n),
        })
    }

    async fn reregister_user_agent(
        &self,
        user_agent: &UserAgent,
        token: &str,
    ) -> Result<(), BrokerError> {
        self.record(BrokerCall::ReregisterUserAgent {
            endpoint: self.endpoint.clone(),
            uaid: user_agent.uaid.clone(),
            token: token.to_string(),
        })
        .await
    }

    async fn subscribe_channel(
        &self,
        user_agent: &UserAgent,
        channel_id: &ChannelId,
        app_server_key: Option<&str>,
    ) -> Result<String, BrokerError> {
        self.record(BrokerCall::SubscribeChannel {
            endpoint: self.endpoint.clone(),
            uaid: user_agent.uaid.clone(),
            channel_id: channel_id.clone(),
            app_server_key: app_server_key.map(str::to_string),
        })
        .await?;

        Ok(self.channel_endpoint(channel_id))
    }

    async fn unsubscribe_channel(
        &self,
        user_agent: &UserAgent,
        channel_id: &ChannelId,
    ) -> Result<(), BrokerError> {
        self.record(BrokerCall::UnsubscribeChannel {
            endpoint: self.endpoint.clone(),
            uaid: user_agent.uaid.clone(),
            channel_id: channel_id.clone(),
        })
        .await
    }
}
