//! Integration tests for the subscription lifecycle
//!
//! These drive `SubscriptionManager` through whole scenarios against the
//! scripted token provider and broker, with both the in-memory and the JSON
//! file store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use push_manager::testing::{BrokerCall, ScriptedBroker, ScriptedTokenProvider};
use push_manager::{ProfileState, PushError, SubscriptionManager};
use state_store::{
    JsonFileStore, MemoryStore, ProfileContext, ServiceData, StateStore, SERVICE_WEBPUSH,
};

// ============================================================================
// Test Helpers
// ============================================================================

const ENDPOINT: &str = "https://push.example/";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn service_data(profile: &str) -> ServiceData {
    ProfileContext::new(profile, format!("/profiles/{}", profile)).service_data()
}

fn create_manager(
    store: Arc<dyn StateStore>,
    tokens: Arc<ScriptedTokenProvider>,
    broker: &ScriptedBroker,
) -> SubscriptionManager {
    SubscriptionManager::new(store, tokens, Arc::new(broker.clone()))
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_startup_without_subscriptions_does_not_contact_broker() {
    let store = Arc::new(MemoryStore::new());
    let tokens = Arc::new(ScriptedTokenProvider::new());
    let broker = ScriptedBroker::new();

    let manager = create_manager(store.clone(), tokens.clone(), &broker);
    manager.configure("default", ENDPOINT, false, t0()).await.unwrap();

    let restarted = create_manager(store, tokens, &broker);
    restarted.startup(t0()).await;

    assert_eq!(restarted.profile_state("default"), ProfileState::Configured);
    assert!(broker.calls().is_empty());
}

#[tokio::test]
async fn test_profiles_are_independent() {
    let tokens = Arc::new(ScriptedTokenProvider::new());
    let broker = ScriptedBroker::new();
    let manager = create_manager(Arc::new(MemoryStore::new()), tokens, &broker);

    manager.configure("alice", ENDPOINT, false, t0()).await.unwrap();
    manager
        .configure("bob", "https://push-b.example/", true, t0())
        .await
        .unwrap();

    let alice = manager
        .subscribe_channel("alice", SERVICE_WEBPUSH, service_data("alice"), None, t0())
        .await
        .unwrap();
    let bob = manager
        .subscribe_channel("bob", SERVICE_WEBPUSH, service_data("bob"), None, t0())
        .await
        .unwrap();

    assert_eq!(manager.all_subscriptions_for_profile("alice").len(), 1);
    assert_eq!(manager.all_subscriptions_for_profile("bob").len(), 1);
    assert!(bob.endpoint.starts_with("https://push-b.example/"));

    let alice_registration = manager
        .registration_for_subscription(&alice.channel_id)
        .unwrap();
    let bob_registration = manager.registration_for_subscription(&bob.channel_id).unwrap();
    assert_eq!(alice_registration.profile_name, "alice");
    assert_eq!(bob_registration.profile_name, "bob");
    assert_ne!(alice_registration.uaid, bob_registration.uaid);
    assert!(bob_registration.debug);
}

#[tokio::test]
async fn test_remediation_then_recovery() {
    let tokens = Arc::new(ScriptedTokenProvider::new());
    let broker = ScriptedBroker::new();
    let manager = create_manager(Arc::new(MemoryStore::new()), tokens.clone(), &broker);
    manager.configure("default", ENDPOINT, false, t0()).await.unwrap();

    tokens.set_remediation_required(Some("enable messaging services"));
    let result = manager
        .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
        .await;
    match result {
        Err(PushError::RemediationRequired(message)) => {
            assert_eq!(message, "enable messaging services")
        }
        other => panic!("Expected RemediationRequired, got {:?}", other),
    }
    assert!(broker.calls().is_empty());

    tokens.set_remediation_required(None);
    let subscription = manager
        .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
        .await
        .unwrap();
    assert!(manager.subscription(&subscription.channel_id).is_some());
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_subscribes_both_commit() {
    let store = Arc::new(MemoryStore::new());
    let broker = ScriptedBroker::new().with_latency(StdDuration::from_millis(20));
    let manager = Arc::new(create_manager(
        store.clone(),
        Arc::new(ScriptedTokenProvider::new()),
        &broker,
    ));
    manager.configure("default", ENDPOINT, false, t0()).await.unwrap();

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
                .await
        })
    };
    let second = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
                .await
        })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_ne!(first.channel_id, second.channel_id);
    let subscriptions = manager.all_subscriptions_for_profile("default");
    assert_eq!(subscriptions.len(), 2);
    assert!(subscriptions.contains_key(&first.channel_id));
    assert!(subscriptions.contains_key(&second.channel_id));

    // The user agent was registered once, by whichever subscribe ran first
    let registrations = broker
        .calls()
        .into_iter()
        .filter(|call| matches!(call, BrokerCall::RegisterUserAgent { .. }))
        .count();
    assert_eq!(registrations, 1);

    let persisted = store.snapshot().unwrap();
    assert_eq!(persisted.subscription_count(), 2);
}

#[tokio::test]
async fn test_debug_change_waits_for_in_flight_registration() {
    let broker = ScriptedBroker::new().with_latency(StdDuration::from_millis(100));
    let manager = Arc::new(create_manager(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedTokenProvider::new()),
        &broker,
    ));
    manager.configure("default", ENDPOINT, false, t0()).await.unwrap();

    let registering = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.register_user_agent("default", t0()).await })
    };
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    let reconfigured = manager.configure("default", ENDPOINT, true, t0()).await.unwrap();

    assert!(registering.await.unwrap().is_ok());
    assert!(reconfigured.debug);
    assert!(reconfigured.token.is_none());

    // The token fetched for the old sender must not survive the flip
    let registration = manager.registration("default").unwrap();
    assert!(registration.debug);
    assert!(registration.token.is_none());
    assert!(registration.uaid.is_some());
    assert_eq!(manager.profile_state("default"), ProfileState::Configured);
}

#[tokio::test]
async fn test_endpoint_change_waits_for_in_flight_subscribe() {
    let broker = ScriptedBroker::new().with_latency(StdDuration::from_millis(50));
    let manager = Arc::new(create_manager(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedTokenProvider::new()),
        &broker,
    ));
    manager.configure("default", ENDPOINT, false, t0()).await.unwrap();
    manager.register_user_agent("default", t0()).await.unwrap();

    let subscribing = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
                .await
        })
    };
    tokio::time::sleep(StdDuration::from_millis(10)).await;
    manager
        .configure("default", "https://other.example/", false, t0())
        .await
        .unwrap();

    let subscription = subscribing.await.unwrap().unwrap();
    assert!(subscription.endpoint.starts_with(ENDPOINT));

    // The subscribe committed first, then the endpoint change dropped it
    assert!(manager.subscription(&subscription.channel_id).is_none());
    let registration = manager.registration("default").unwrap();
    assert_eq!(registration.endpoint, "https://other.example/");
    assert!(registration.uaid.is_none());
}

#[tokio::test]
async fn test_unsubscribe_then_lookup() {
    let broker = ScriptedBroker::new();
    let manager = create_manager(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedTokenProvider::new()),
        &broker,
    );
    manager.configure("default", ENDPOINT, false, t0()).await.unwrap();
    let subscription = manager
        .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
        .await
        .unwrap();

    let removed = manager
        .unsubscribe_channel(&subscription.channel_id)
        .await
        .unwrap();
    assert_eq!(removed.map(|s| s.channel_id), Some(subscription.channel_id.clone()));

    assert!(manager.subscription(&subscription.channel_id).is_none());
    assert!(manager
        .registration_for_subscription(&subscription.channel_id)
        .is_none());

    // A second unsubscribe is a no-op
    let removed = manager
        .unsubscribe_channel(&subscription.channel_id)
        .await
        .unwrap();
    assert!(removed.is_none());

    assert!(broker.wait_for_calls(3, StdDuration::from_secs(1)).await);
    assert_eq!(
        broker.calls().last(),
        Some(&BrokerCall::UnsubscribeChannel {
            endpoint: ENDPOINT.to_string(),
            uaid: "uaid-1".to_string(),
            channel_id: subscription.channel_id,
        })
    );
}

#[tokio::test]
async fn test_endpoint_change_requires_fresh_user_agent() {
    let broker = ScriptedBroker::new();
    let manager = create_manager(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedTokenProvider::new()),
        &broker,
    );
    manager.configure("default", ENDPOINT, false, t0()).await.unwrap();
    let old = manager
        .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
        .await
        .unwrap();

    manager
        .configure("default", "https://other.example/", false, t0())
        .await
        .unwrap();
    assert!(manager.subscription(&old.channel_id).is_none());

    let new = manager
        .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
        .await
        .unwrap();

    assert!(new.endpoint.starts_with("https://other.example/"));
    let registration = manager.registration("default").unwrap();
    assert_eq!(registration.uaid.unwrap().value, "uaid-2");
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_state_survives_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("PushState.json");
    let tokens = Arc::new(ScriptedTokenProvider::new());
    let broker = ScriptedBroker::new();

    let subscription = {
        let manager = create_manager(Arc::new(JsonFileStore::new(&path)), tokens.clone(), &broker);
        manager.startup(t0()).await;
        manager.configure("default", ENDPOINT, false, t0()).await.unwrap();
        manager
            .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
            .await
            .unwrap()
    };

    let restarted = create_manager(Arc::new(JsonFileStore::new(&path)), tokens, &broker);
    restarted.startup(t0() + Duration::minutes(10)).await;

    let reloaded = restarted.subscription(&subscription.channel_id).unwrap();
    assert_eq!(reloaded, subscription);
    assert_eq!(restarted.profile_state("default"), ProfileState::Registered);

    let context = ProfileContext::from_service_data(&reloaded.service_data).unwrap();
    assert_eq!(context.name, "default");
}

#[tokio::test]
async fn test_token_refresh_reregisters_on_startup() {
    let store = Arc::new(MemoryStore::new());
    let tokens = Arc::new(ScriptedTokenProvider::new());
    let broker = ScriptedBroker::new();
    let manager = create_manager(store, tokens.clone(), &broker);
    manager.configure("default", ENDPOINT, false, t0()).await.unwrap();
    manager
        .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
        .await
        .unwrap();

    tokens.set_issued_at(t0() + Duration::hours(1));
    manager.on_token_refresh(t0() + Duration::hours(2)).await;

    assert_eq!(manager.profile_state("default"), ProfileState::Registered);
    assert_eq!(
        manager.registration("default").unwrap().token.unwrap().value,
        "token-2"
    );
    assert!(matches!(
        broker.calls().last(),
        Some(BrokerCall::ReregisterUserAgent { token, .. }) if token == "token-2"
    ));
    assert_eq!(manager.snapshot().subscription_count(), 1);
}

#[tokio::test]
async fn test_corrupt_state_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("PushState.json");
    std::fs::write(&path, "{ not json").unwrap();

    let manager = create_manager(
        Arc::new(JsonFileStore::new(&path)),
        Arc::new(ScriptedTokenProvider::new()),
        &ScriptedBroker::new(),
    );
    manager.startup(t0()).await;

    assert!(manager.snapshot().registrations.is_empty());
    manager.configure("default", ENDPOINT, false, t0()).await.unwrap();
    assert!(JsonFileStore::new(&path).load().unwrap().is_some());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// N successful subscribes yield N distinct channel IDs, all retrievable.
    #[test]
    fn prop_subscribes_yield_distinct_channels(count in 1usize..12) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let manager = create_manager(
                Arc::new(MemoryStore::new()),
                Arc::new(ScriptedTokenProvider::new()),
                &ScriptedBroker::new(),
            );
            manager.configure("default", ENDPOINT, false, t0()).await.unwrap();

            let mut ids = HashSet::new();
            for _ in 0..count {
                let subscription = manager
                    .subscribe_channel("default", SERVICE_WEBPUSH, service_data("default"), None, t0())
                    .await
                    .unwrap();
                ids.insert(subscription.channel_id);
            }

            prop_assert_eq!(ids.len(), count);
            for id in &ids {
                prop_assert!(manager.subscription(id).is_some());
            }
            prop_assert_eq!(manager.all_subscriptions_for_profile("default").len(), count);
            Ok(())
        })?;
    }
}
