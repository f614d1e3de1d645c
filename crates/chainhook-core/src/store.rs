//! Storage traits shared by the poller, the delivery worker and management.
//!
//! Implementations live in `chainhook-storage` (in-memory and SQLite).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::HookError;
use crate::state::{DeliveryStatus, Resolution};
use crate::types::{CapturedEvent, DeliveryAttempt, EventId, OwnerId, Subscription, SubscriptionId};

/// Persistence for subscriptions and their block cursors.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert_subscription(&self, sub: &Subscription) -> Result<(), HookError>;

    async fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, HookError>;

    /// All subscriptions with status `active`, system-wide.
    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, HookError>;

    async fn subscriptions_for_owner(&self, owner: &OwnerId) -> Result<Vec<Subscription>, HookError>;

    /// Move the cursor forward to `block`. Never moves it backwards; returns
    /// `false` if the stored cursor was already past `block` or the
    /// subscription is gone.
    async fn advance_cursor(&self, id: SubscriptionId, block: u64) -> Result<bool, HookError>;

    /// Administrative override: set the cursor to any value.
    async fn reset_cursor(&self, id: SubscriptionId, block: u64) -> Result<bool, HookError>;

    /// Persist webhook URL, filters and status. The cursor is not touched.
    async fn update_subscription(&self, sub: &Subscription) -> Result<bool, HookError>;

    /// Remove the subscription. Its events and attempts are kept.
    async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool, HookError>;
}

/// Persistence for captured events and their delivery state.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert events, ignoring any whose (subscription, tx hash, log index)
    /// already exists. Returns how many were new.
    async fn insert_events(&self, events: &[CapturedEvent]) -> Result<usize, HookError>;

    async fn event(&self, id: EventId) -> Result<Option<CapturedEvent>, HookError>;

    /// PENDING events with `next_retry_at <= now` whose subscription exists
    /// and is active, oldest-due first.
    async fn due_events(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CapturedEvent>, HookError>;

    /// Atomic PENDING → PROCESSING. `false` if someone else got there first.
    async fn claim(&self, id: EventId) -> Result<bool, HookError>;

    /// Apply a resolution to a PROCESSING event. `false` if the event was
    /// not PROCESSING.
    async fn resolve(&self, id: EventId, resolution: &Resolution) -> Result<bool, HookError>;

    /// Reset any event to PENDING with `retry_count = 0`, due at `now`.
    async fn replay(&self, id: EventId, now: DateTime<Utc>) -> Result<bool, HookError>;

    /// Events of one subscription, newest first.
    async fn events_for_subscription(
        &self,
        subscription: SubscriptionId,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Result<Vec<CapturedEvent>, HookError>;

    /// Return every PROCESSING event to PENDING (schedule unchanged).
    /// Used on start-up after an interrupted run.
    async fn requeue_processing(&self) -> Result<Vec<EventId>, HookError>;
}

/// Append-only delivery audit trail.
#[async_trait]
pub trait AttemptLog: Send + Sync {
    async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), HookError>;

    /// Attempts for one event, newest first.
    async fn attempts_for_event(&self, event: EventId) -> Result<Vec<DeliveryAttempt>, HookError>;
}

/// Everything the pipeline needs from a backend.
pub trait Store: SubscriptionStore + EventStore + AttemptLog {}

impl<T: SubscriptionStore + EventStore + AttemptLog> Store for T {}
