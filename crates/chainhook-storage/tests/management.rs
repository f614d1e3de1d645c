//! Management operations over each storage backend.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use chainhook_core::clock::{Clock, ManualClock};
use chainhook_core::error::HookError;
use chainhook_core::management::{Management, SubscriptionUpdate};
use chainhook_core::state::{DeliveryStatus, Resolution};
use chainhook_core::store::{EventStore, Store, SubscriptionStore};
use chainhook_core::types::{CapturedEvent, EventId, EventPayload, OwnerId, SubscriptionStatus};
use chainhook_storage::InMemoryStorage;

const USDC: &str = "0xA0b86991c6218b36c1d19d4a2e9eB0cE3606eB48";

fn alice() -> OwnerId {
    OwnerId::new("alice")
}

fn bob() -> OwnerId {
    OwnerId::new("bob")
}

fn management(store: Arc<dyn Store>, clock: &ManualClock) -> Management {
    Management::new(store, Arc::new(clock.clone())).with_supported_chains([1, 137])
}

fn transfer(sub: chainhook_core::types::SubscriptionId, tx: &str, clock: &ManualClock) -> CapturedEvent {
    CapturedEvent::pending(
        sub,
        10,
        "0xblock",
        tx,
        0,
        EventPayload::Decoded {
            name: "Transfer".into(),
            args: vec![],
        },
        clock.now(),
    )
}

async fn create_is_validated_and_scoped(store: Arc<dyn Store>) {
    let clock = ManualClock::new();
    let mgmt = management(store, &clock);

    let sub = mgmt
        .create_subscription(&alice(), 1, USDC, json!([]), "https://a.example/hook", vec![])
        .await
        .unwrap();
    assert_eq!(sub.contract_address, USDC.to_ascii_lowercase());
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.last_processed_block, 0);

    assert!(matches!(
        mgmt.create_subscription(&alice(), 5, USDC, json!([]), "https://a.example/hook", vec![])
            .await,
        Err(HookError::UnsupportedChain { chain_id: 5 })
    ));
    assert!(matches!(
        mgmt.create_subscription(&alice(), 1, "0x1234", json!([]), "https://a.example/hook", vec![])
            .await,
        Err(HookError::Invalid(_))
    ));
    assert!(matches!(
        mgmt.create_subscription(&alice(), 1, USDC, json!([]), "ftp://a.example/hook", vec![])
            .await,
        Err(HookError::Invalid(_))
    ));

    // Other owners cannot see it.
    assert!(matches!(
        mgmt.get_subscription(&bob(), sub.id).await,
        Err(HookError::NotFound { .. })
    ));
    assert!(mgmt.list_subscriptions(&bob()).await.unwrap().is_empty());
    assert!(matches!(
        mgmt.delete_subscription(&bob(), sub.id).await,
        Err(HookError::NotFound { .. })
    ));
    assert_eq!(mgmt.get_subscription(&alice(), sub.id).await.unwrap().id, sub.id);
}

async fn list_is_newest_first(store: Arc<dyn Store>) {
    let clock = ManualClock::new();
    let mgmt = management(store, &clock);

    let first = mgmt
        .create_subscription(&alice(), 1, USDC, json!([]), "https://a.example/1", vec![])
        .await
        .unwrap();
    clock.advance(Duration::from_secs(1));
    let second = mgmt
        .create_subscription(&alice(), 137, USDC, json!([]), "https://a.example/2", vec![])
        .await
        .unwrap();

    let ids: Vec<_> = mgmt
        .list_subscriptions(&alice())
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

async fn update_changes_only_given_fields(store: Arc<dyn Store>) {
    let clock = ManualClock::new();
    let mgmt = management(store, &clock);
    let sub = mgmt
        .create_subscription(&alice(), 1, USDC, json!([]), "https://a.example/hook", vec!["Transfer".into()])
        .await
        .unwrap();

    let paused = mgmt
        .update_subscription(
            &alice(),
            sub.id,
            SubscriptionUpdate {
                status: Some(SubscriptionStatus::Paused),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(paused.status, SubscriptionStatus::Paused);
    assert_eq!(paused.webhook_url, sub.webhook_url);
    assert_eq!(paused.event_filters, vec!["Transfer".to_string()]);

    let moved = mgmt
        .update_subscription(
            &alice(),
            sub.id,
            SubscriptionUpdate {
                webhook_url: Some("https://b.example/hook".into()),
                event_filters: Some(vec![]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.status, SubscriptionStatus::Paused);
    assert_eq!(moved.webhook_url, "https://b.example/hook");
    assert!(moved.event_filters.is_empty());

    let stored = mgmt.get_subscription(&alice(), sub.id).await.unwrap();
    assert_eq!(stored, moved);

    assert!(matches!(
        mgmt.update_subscription(
            &alice(),
            sub.id,
            SubscriptionUpdate {
                webhook_url: Some("not a url".into()),
                ..Default::default()
            }
        )
        .await,
        Err(HookError::Invalid(_))
    ));
}

async fn events_attempts_and_replay(store: Arc<dyn Store>) {
    let clock = ManualClock::new();
    let mgmt = management(store.clone(), &clock);
    let sub = mgmt
        .create_subscription(&alice(), 1, USDC, json!([]), "https://a.example/hook", vec![])
        .await
        .unwrap();
    let other = mgmt
        .create_subscription(&bob(), 1, USDC, json!([]), "https://b.example/hook", vec![])
        .await
        .unwrap();

    let events: Vec<_> = (0..60)
        .map(|i| {
            clock.advance(Duration::from_millis(10));
            transfer(sub.id, &format!("0x{i:04x}"), &clock)
        })
        .collect();
    store.insert_events(&events).await.unwrap();

    let page = mgmt.list_events(&alice(), sub.id, None, None).await.unwrap();
    assert_eq!(page.len(), 50);
    assert_eq!(page[0].id, events[59].id);
    assert_eq!(mgmt.list_events(&alice(), sub.id, None, Some(5)).await.unwrap().len(), 5);

    // Drive one event to FAILED.
    let target = events[0].id;
    assert!(store.claim(target).await.unwrap());
    assert!(store.resolve(target, &Resolution::Failed).await.unwrap());

    let failed = mgmt
        .list_events(&alice(), sub.id, Some(DeliveryStatus::Failed), None)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, target);

    // Scoped to owner and subscription.
    assert!(matches!(
        mgmt.replay_event(&bob(), sub.id, target).await,
        Err(HookError::NotFound { .. })
    ));
    assert!(matches!(
        mgmt.replay_event(&bob(), other.id, target).await,
        Err(HookError::NotFound { .. })
    ));
    assert!(matches!(
        mgmt.list_attempts(&alice(), sub.id, EventId::new()).await,
        Err(HookError::NotFound { .. })
    ));
    assert!(mgmt.list_attempts(&alice(), sub.id, target).await.unwrap().is_empty());

    clock.advance(Duration::from_secs(30));
    mgmt.replay_event(&alice(), sub.id, target).await.unwrap();
    let ev = store.event(target).await.unwrap().unwrap();
    assert_eq!(ev.status, DeliveryStatus::Pending);
    assert_eq!(ev.retry_count, 0);
    assert_eq!(ev.next_retry_at, clock.now());
}

async fn cursor_reset_and_delete(store: Arc<dyn Store>) {
    let clock = ManualClock::new();
    let mgmt = management(store.clone(), &clock);
    let sub = mgmt
        .create_subscription(&alice(), 1, USDC, json!([]), "https://a.example/hook", vec![])
        .await
        .unwrap();
    store.advance_cursor(sub.id, 5_000).await.unwrap();

    mgmt.reset_cursor(&alice(), sub.id, 4_000).await.unwrap();
    assert_eq!(mgmt.get_subscription(&alice(), sub.id).await.unwrap().last_processed_block, 4_000);
    assert!(matches!(
        mgmt.reset_cursor(&bob(), sub.id, 0).await,
        Err(HookError::NotFound { .. })
    ));

    let ev = transfer(sub.id, "0xaa", &clock);
    store.insert_events(std::slice::from_ref(&ev)).await.unwrap();

    mgmt.delete_subscription(&alice(), sub.id).await.unwrap();
    assert!(matches!(
        mgmt.get_subscription(&alice(), sub.id).await,
        Err(HookError::NotFound { .. })
    ));
    // Captured history survives the subscription.
    assert!(store.event(ev.id).await.unwrap().is_some());
}

// ─── Backends ─────────────────────────────────────────────────────────────────

fn memory() -> Arc<dyn Store> {
    Arc::new(InMemoryStorage::new())
}

#[tokio::test]
async fn memory_create_is_validated_and_scoped() {
    create_is_validated_and_scoped(memory()).await;
}

#[tokio::test]
async fn memory_list_is_newest_first() {
    list_is_newest_first(memory()).await;
}

#[tokio::test]
async fn memory_update_changes_only_given_fields() {
    update_changes_only_given_fields(memory()).await;
}

#[tokio::test]
async fn memory_events_attempts_and_replay() {
    events_attempts_and_replay(memory()).await;
}

#[tokio::test]
async fn memory_cursor_reset_and_delete() {
    cursor_reset_and_delete(memory()).await;
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use chainhook_storage::SqliteStorage;

    async fn store() -> Arc<dyn Store> {
        Arc::new(SqliteStorage::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn create_is_validated_and_scoped() {
        super::create_is_validated_and_scoped(store().await).await;
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        super::list_is_newest_first(store().await).await;
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        super::update_changes_only_given_fields(store().await).await;
    }

    #[tokio::test]
    async fn events_attempts_and_replay() {
        super::events_attempts_and_replay(store().await).await;
    }

    #[tokio::test]
    async fn cursor_reset_and_delete() {
        super::cursor_reset_and_delete(store().await).await;
    }
}
