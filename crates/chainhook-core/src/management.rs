//! Owner-scoped management operations.
//!
//! Every call is made on behalf of an owner; anything the owner does not own
//! reports `NotFound`, never a permission error, so ids cannot be enumerated.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::error::HookError;
use crate::state::DeliveryStatus;
use crate::store::Store;
use crate::types::{
    validate_webhook_url, CapturedEvent, DeliveryAttempt, EventId, OwnerId, Subscription,
    SubscriptionId, SubscriptionStatus,
};

/// Default page size for event listings.
pub const DEFAULT_EVENT_LIMIT: usize = 50;

/// Partial update of a subscription. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub webhook_url: Option<String>,
    pub event_filters: Option<Vec<String>>,
    pub status: Option<SubscriptionStatus>,
}

/// Management surface over a [`Store`].
pub struct Management {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    supported_chains: Option<HashSet<u64>>,
}

impl Management {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            supported_chains: None,
        }
    }

    /// Reject subscriptions on chains outside this set.
    pub fn with_supported_chains(mut self, chains: impl IntoIterator<Item = u64>) -> Self {
        self.supported_chains = Some(chains.into_iter().collect());
        self
    }

    pub async fn create_subscription(
        &self,
        owner: &OwnerId,
        chain_id: u64,
        contract_address: &str,
        abi: Value,
        webhook_url: &str,
        event_filters: Vec<String>,
    ) -> Result<Subscription, HookError> {
        if let Some(chains) = &self.supported_chains {
            if !chains.contains(&chain_id) {
                return Err(HookError::UnsupportedChain { chain_id });
            }
        }
        let sub = Subscription::new(
            owner.clone(),
            chain_id,
            contract_address,
            abi,
            webhook_url,
            self.clock.now(),
        )?
        .with_filters(event_filters);
        self.store.insert_subscription(&sub).await?;
        info!(subscription = %sub.id, owner = %owner, chain_id, "subscription created");
        Ok(sub)
    }

    /// Owner's subscriptions, newest first.
    pub async fn list_subscriptions(&self, owner: &OwnerId) -> Result<Vec<Subscription>, HookError> {
        let mut subs = self.store.subscriptions_for_owner(owner).await?;
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subs)
    }

    pub async fn get_subscription(
        &self,
        owner: &OwnerId,
        id: SubscriptionId,
    ) -> Result<Subscription, HookError> {
        match self.store.subscription(id).await? {
            Some(sub) if &sub.owner == owner => Ok(sub),
            _ => Err(HookError::not_found("subscription", id)),
        }
    }

    pub async fn update_subscription(
        &self,
        owner: &OwnerId,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription, HookError> {
        let mut sub = self.get_subscription(owner, id).await?;
        if let Some(url) = update.webhook_url {
            sub.webhook_url = validate_webhook_url(&url)?;
        }
        if let Some(filters) = update.event_filters {
            sub.event_filters = filters;
        }
        if let Some(status) = update.status {
            sub.status = status;
        }
        if !self.store.update_subscription(&sub).await? {
            return Err(HookError::not_found("subscription", id));
        }
        info!(subscription = %id, status = %sub.status, "subscription updated");
        Ok(sub)
    }

    pub async fn delete_subscription(&self, owner: &OwnerId, id: SubscriptionId) -> Result<(), HookError> {
        self.get_subscription(owner, id).await?;
        if !self.store.delete_subscription(id).await? {
            return Err(HookError::not_found("subscription", id));
        }
        info!(subscription = %id, "subscription deleted");
        Ok(())
    }

    /// Events of a subscription, newest first.
    pub async fn list_events(
        &self,
        owner: &OwnerId,
        id: SubscriptionId,
        status: Option<DeliveryStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<CapturedEvent>, HookError> {
        self.get_subscription(owner, id).await?;
        self.store
            .events_for_subscription(id, status, limit.unwrap_or(DEFAULT_EVENT_LIMIT))
            .await
    }

    /// Delivery attempts of one event, newest first.
    pub async fn list_attempts(
        &self,
        owner: &OwnerId,
        id: SubscriptionId,
        event_id: EventId,
    ) -> Result<Vec<DeliveryAttempt>, HookError> {
        self.owned_event(owner, id, event_id).await?;
        self.store.attempts_for_event(event_id).await
    }

    /// Put an event back in the queue: PENDING, `retry_count = 0`, due now.
    pub async fn replay_event(
        &self,
        owner: &OwnerId,
        id: SubscriptionId,
        event_id: EventId,
    ) -> Result<(), HookError> {
        self.owned_event(owner, id, event_id).await?;
        if !self.store.replay(event_id, self.clock.now()).await? {
            return Err(HookError::not_found("event", event_id));
        }
        info!(subscription = %id, event_id = %event_id, "event queued for replay");
        Ok(())
    }

    /// Administrative cursor reset. `0` re-initializes from the chain head.
    pub async fn reset_cursor(
        &self,
        owner: &OwnerId,
        id: SubscriptionId,
        block: u64,
    ) -> Result<(), HookError> {
        self.get_subscription(owner, id).await?;
        if !self.store.reset_cursor(id, block).await? {
            return Err(HookError::not_found("subscription", id));
        }
        info!(subscription = %id, block, "cursor reset");
        Ok(())
    }

    async fn owned_event(
        &self,
        owner: &OwnerId,
        id: SubscriptionId,
        event_id: EventId,
    ) -> Result<CapturedEvent, HookError> {
        self.get_subscription(owner, id).await?;
        match self.store.event(event_id).await? {
            Some(ev) if ev.subscription_id == id => Ok(ev),
            _ => Err(HookError::not_found("event", event_id)),
        }
    }
}
