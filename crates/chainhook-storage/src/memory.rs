//! In-memory storage backend.
//!
//! Keeps subscriptions, events and attempts in RAM behind one lock, so every
//! trait call is atomic with respect to the others. All data is lost when
//! the process exits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use chainhook_core::error::HookError;
use chainhook_core::state::{DeliveryStatus, Resolution};
use chainhook_core::store::{AttemptLog, EventStore, SubscriptionStore};
use chainhook_core::types::{
    CapturedEvent, DeliveryAttempt, EventId, OwnerId, Subscription, SubscriptionId,
};

type DedupKey = (SubscriptionId, String, u64);

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    events: HashMap<EventId, CapturedEvent>,
    dedup: HashMap<DedupKey, EventId>,
    attempts: Vec<DeliveryAttempt>,
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of captured events.
    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    /// Total number of delivery attempts.
    pub async fn attempt_count(&self) -> usize {
        self.inner.lock().await.attempts.len()
    }
}

// ─── SubscriptionStore ────────────────────────────────────────────────────────

#[async_trait]
impl SubscriptionStore for InMemoryStorage {
    async fn insert_subscription(&self, sub: &Subscription) -> Result<(), HookError> {
        let mut inner = self.inner.lock().await;
        if inner.subscriptions.contains_key(&sub.id) {
            return Err(HookError::Storage(format!("subscription {} already exists", sub.id)));
        }
        inner.subscriptions.insert(sub.id, sub.clone());
        Ok(())
    }

    async fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, HookError> {
        Ok(self.inner.lock().await.subscriptions.get(&id).cloned())
    }

    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, HookError> {
        let inner = self.inner.lock().await;
        let mut subs: Vec<_> = inner
            .subscriptions
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(subs)
    }

    async fn subscriptions_for_owner(&self, owner: &OwnerId) -> Result<Vec<Subscription>, HookError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| &s.owner == owner)
            .cloned()
            .collect())
    }

    async fn advance_cursor(&self, id: SubscriptionId, block: u64) -> Result<bool, HookError> {
        let mut inner = self.inner.lock().await;
        match inner.subscriptions.get_mut(&id) {
            Some(sub) if sub.last_processed_block <= block => {
                sub.last_processed_block = block;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_cursor(&self, id: SubscriptionId, block: u64) -> Result<bool, HookError> {
        let mut inner = self.inner.lock().await;
        match inner.subscriptions.get_mut(&id) {
            Some(sub) => {
                sub.last_processed_block = block;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_subscription(&self, sub: &Subscription) -> Result<bool, HookError> {
        let mut inner = self.inner.lock().await;
        match inner.subscriptions.get_mut(&sub.id) {
            Some(stored) => {
                stored.webhook_url = sub.webhook_url.clone();
                stored.event_filters = sub.event_filters.clone();
                stored.status = sub.status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool, HookError> {
        Ok(self.inner.lock().await.subscriptions.remove(&id).is_some())
    }
}

// ─── EventStore ───────────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for InMemoryStorage {
    async fn insert_events(&self, events: &[CapturedEvent]) -> Result<usize, HookError> {
        let mut inner = self.inner.lock().await;
        let mut inserted = 0;
        for ev in events {
            let key = ev.dedup_key();
            if inner.dedup.contains_key(&key) || inner.events.contains_key(&ev.id) {
                continue;
            }
            inner.dedup.insert(key, ev.id);
            inner.events.insert(ev.id, ev.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn event(&self, id: EventId) -> Result<Option<CapturedEvent>, HookError> {
        Ok(self.inner.lock().await.events.get(&id).cloned())
    }

    async fn due_events(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CapturedEvent>, HookError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<_> = inner
            .events
            .values()
            .filter(|e| e.status == DeliveryStatus::Pending && e.next_retry_at <= now)
            .filter(|e| {
                inner
                    .subscriptions
                    .get(&e.subscription_id)
                    .map_or(false, |s| s.is_active())
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            (a.next_retry_at, a.created_at, a.block_number, a.log_index)
                .cmp(&(b.next_retry_at, b.created_at, b.block_number, b.log_index))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(&self, id: EventId) -> Result<bool, HookError> {
        let mut inner = self.inner.lock().await;
        match inner.events.get_mut(&id) {
            Some(ev) if ev.status == DeliveryStatus::Pending => {
                ev.status = DeliveryStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve(&self, id: EventId, resolution: &Resolution) -> Result<bool, HookError> {
        let mut inner = self.inner.lock().await;
        let Some(ev) = inner.events.get_mut(&id) else {
            return Ok(false);
        };
        if ev.status != DeliveryStatus::Processing {
            return Ok(false);
        }
        ev.status = resolution.status();
        if let Resolution::Retry {
            retry_count,
            next_retry_at,
        } = resolution
        {
            ev.retry_count = *retry_count;
            ev.next_retry_at = *next_retry_at;
        }
        Ok(true)
    }

    async fn replay(&self, id: EventId, now: DateTime<Utc>) -> Result<bool, HookError> {
        let mut inner = self.inner.lock().await;
        match inner.events.get_mut(&id) {
            Some(ev) => {
                ev.status = DeliveryStatus::Pending;
                ev.retry_count = 0;
                ev.next_retry_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn events_for_subscription(
        &self,
        subscription: SubscriptionId,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Result<Vec<CapturedEvent>, HookError> {
        let inner = self.inner.lock().await;
        let mut events: Vec<_> = inner
            .events
            .values()
            .filter(|e| e.subscription_id == subscription)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            (b.created_at, b.block_number, b.log_index).cmp(&(a.created_at, a.block_number, a.log_index))
        });
        events.truncate(limit);
        Ok(events)
    }

    async fn requeue_processing(&self) -> Result<Vec<EventId>, HookError> {
        let mut inner = self.inner.lock().await;
        let mut requeued = Vec::new();
        for ev in inner.events.values_mut() {
            if ev.status == DeliveryStatus::Processing {
                ev.status = DeliveryStatus::Pending;
                requeued.push(ev.id);
            }
        }
        Ok(requeued)
    }
}

// ─── AttemptLog ───────────────────────────────────────────────────────────────

#[async_trait]
impl AttemptLog for InMemoryStorage {
    async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), HookError> {
        self.inner.lock().await.attempts.push(attempt.clone());
        Ok(())
    }

    async fn attempts_for_event(&self, event: EventId) -> Result<Vec<DeliveryAttempt>, HookError> {
        let inner = self.inner.lock().await;
        let mut attempts: Vec<_> = inner
            .attempts
            .iter()
            .rev()
            .filter(|a| a.event_id == event)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.attempted_at.cmp(&a.attempted_at));
        Ok(attempts)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
