//! Delivery worker: claims due events, posts them, records the attempt and
//! moves the event along the state machine.
//!
//! Every event that was claimed leaves PROCESSING with exactly one attempt
//! row, including deferrals. Each event's outcome is independent; nothing
//! that happens to one event aborts the batch.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use chainhook_core::backoff::BackoffPolicy;
use chainhook_core::clock::Clock;
use chainhook_core::config::DeliveryConfig;
use chainhook_core::error::HookError;
use chainhook_core::scheduler::Cycle;
use chainhook_core::state::Resolution;
use chainhook_core::store::Store;
use chainhook_core::types::{CapturedEvent, DeliveryAttempt, Subscription};

use crate::client::{WebhookBody, WebhookSender};

/// Error text recorded for events whose run was cut short by a restart.
pub const REQUEUED_ERROR: &str = "requeued after interrupted delivery";

/// What happened to one selected event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Delivered,
    /// Failed; will be retried.
    Retrying { retry_count: u32 },
    /// Retry budget exhausted.
    Failed,
    /// Subscription paused or gone.
    Deferred,
    /// Another worker claimed it first.
    NotClaimed,
    /// Storage failed mid-way.
    Error,
}

/// Summary of one delivery cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub selected: usize,
    pub delivered: usize,
    pub retrying: usize,
    pub failed: usize,
    pub deferred: usize,
    pub not_claimed: usize,
    pub errors: usize,
}

impl DeliveryReport {
    fn record(&mut self, outcome: &EventOutcome) {
        match outcome {
            EventOutcome::Delivered => self.delivered += 1,
            EventOutcome::Retrying { .. } => self.retrying += 1,
            EventOutcome::Failed => self.failed += 1,
            EventOutcome::Deferred => self.deferred += 1,
            EventOutcome::NotClaimed => self.not_claimed += 1,
            EventOutcome::Error => self.errors += 1,
        }
    }
}

pub struct DeliveryWorker {
    store: Arc<dyn Store>,
    sender: Arc<dyn WebhookSender>,
    backoff: BackoffPolicy,
    batch_size: usize,
    concurrency: usize,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<dyn WebhookSender>,
        config: &DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sender,
            backoff: config.backoff(),
            batch_size: config.batch_size,
            concurrency: config.concurrency.max(1),
            clock,
        }
    }

    /// Return events stranded in PROCESSING by an earlier run to PENDING,
    /// recording an attempt for each. Call once before the first cycle.
    pub async fn recover_interrupted(&self) -> Result<usize, HookError> {
        let ids = self.store.requeue_processing().await?;
        let now = self.clock.now();
        for id in &ids {
            let attempt = DeliveryAttempt::new(*id, None, None, Some(REQUEUED_ERROR.to_string()), now);
            self.store.append_attempt(&attempt).await?;
        }
        if !ids.is_empty() {
            warn!(count = ids.len(), "requeued events left in PROCESSING");
        }
        Ok(ids.len())
    }

    /// One delivery cycle. Never fails; per-event problems are logged and
    /// counted.
    pub async fn deliver_once(&self) -> DeliveryReport {
        let now = self.clock.now();
        let due = match self.store.due_events(now, self.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "could not select due events");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport {
            selected: due.len(),
            ..DeliveryReport::default()
        };

        let outcomes: Vec<EventOutcome> = stream::iter(due)
            .map(|event| async move { self.process(event).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }
        report
    }

    /// Deliver one selected event end to end.
    pub async fn process(&self, event: CapturedEvent) -> EventOutcome {
        match self.store.claim(event.id).await {
            Ok(true) => {}
            Ok(false) => return EventOutcome::NotClaimed,
            Err(e) => {
                error!(event_id = %event.id, error = %e, "claim failed");
                return EventOutcome::Error;
            }
        }

        match self.deliver_claimed(&event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(event_id = %event.id, error = %e, "delivery bookkeeping failed");
                // Release the claim; the event keeps its schedule.
                match self.store.resolve(event.id, &Resolution::Deferred).await {
                    Ok(true) => warn!(event_id = %event.id, "returned to queue after storage error"),
                    Ok(false) => {}
                    Err(e) => error!(event_id = %event.id, error = %e, "could not release claim"),
                }
                EventOutcome::Error
            }
        }
    }

    async fn deliver_claimed(&self, event: &CapturedEvent) -> Result<EventOutcome, HookError> {
        let sub = match self.store.subscription(event.subscription_id).await? {
            Some(sub) if sub.is_active() => sub,
            Some(_) => return self.defer(event, "deferred: subscription paused").await,
            None => return self.defer(event, "deferred: subscription not found").await,
        };

        let attempt_no = event.retry_count + 1;
        let (attempt, succeeded) = self.post(&sub, event, attempt_no).await;
        self.store.append_attempt(&attempt).await?;

        let now = self.clock.now();
        let resolution = if succeeded {
            Resolution::Delivered
        } else {
            self.backoff.on_failure(event.retry_count, now)
        };
        if !self.store.resolve(event.id, &resolution).await? {
            warn!(event_id = %event.id, "event left PROCESSING before it was resolved");
        }

        let outcome = match resolution {
            Resolution::Delivered => {
                info!(event_id = %event.id, subscription = %sub.id, attempt = attempt_no, "event delivered");
                EventOutcome::Delivered
            }
            Resolution::Retry {
                retry_count,
                next_retry_at,
            } => {
                debug!(event_id = %event.id, retry_count, next_retry_at = %next_retry_at, "delivery will be retried");
                EventOutcome::Retrying { retry_count }
            }
            Resolution::Failed => {
                let err = HookError::RetryExhausted {
                    retries: event.retry_count,
                };
                warn!(event_id = %event.id, subscription = %sub.id, error = %err, "event failed");
                EventOutcome::Failed
            }
            Resolution::Deferred => EventOutcome::Deferred,
        };
        Ok(outcome)
    }

    /// POST and turn the result into an attempt record.
    async fn post(&self, sub: &Subscription, event: &CapturedEvent, attempt_no: u32) -> (DeliveryAttempt, bool) {
        let body = WebhookBody::new(sub, event);
        let result = self.sender.send(&sub.webhook_url, &body, attempt_no).await;
        let now = self.clock.now();
        match result {
            Ok(resp) => {
                let ok = resp.is_success();
                if !ok {
                    warn!(event_id = %event.id, status = resp.status, attempt = attempt_no, "webhook rejected event");
                }
                (DeliveryAttempt::new(event.id, Some(resp.status), Some(resp.body), None, now), ok)
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, attempt = attempt_no, "webhook unreachable");
                (DeliveryAttempt::new(event.id, None, None, Some(e.to_string()), now), false)
            }
        }
    }

    async fn defer(&self, event: &CapturedEvent, reason: &str) -> Result<EventOutcome, HookError> {
        let attempt = DeliveryAttempt::new(event.id, None, None, Some(reason.to_string()), self.clock.now());
        self.store.append_attempt(&attempt).await?;
        self.store.resolve(event.id, &Resolution::Deferred).await?;
        debug!(event_id = %event.id, reason, "delivery deferred");
        Ok(EventOutcome::Deferred)
    }
}

#[async_trait]
impl Cycle for DeliveryWorker {
    fn name(&self) -> &'static str {
        "delivery"
    }

    async fn run_cycle(&self) {
        let report = self.deliver_once().await;
        if report.selected > 0 {
            info!(
                selected = report.selected,
                delivered = report.delivered,
                retrying = report.retrying,
                failed = report.failed,
                deferred = report.deferred,
                errors = report.errors,
                "delivery cycle finished"
            );
        }
    }
}
