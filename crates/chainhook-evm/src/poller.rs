//! Cursor-based poller: moves each active subscription's block cursor forward
//! and records every log in the range as a PENDING event.
//!
//! Per subscription and per cycle:
//! 1. read the chain head (failure skips the subscription, cursor untouched)
//! 2. cursor `0` → set it to the head, fetch nothing
//! 3. cursor `>= head` → nothing to do
//! 4. fetch logs in `(cursor, min(head, cursor + max_range)]`, decode, insert
//! 5. advance the cursor; this is the commit point, so a crash before it
//!    re-fetches the range and the idempotent insert absorbs the overlap.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use chainhook_core::clock::Clock;
use chainhook_core::config::PollerConfig;
use chainhook_core::error::HookError;
use chainhook_core::scheduler::Cycle;
use chainhook_core::store::Store;
use chainhook_core::types::{CapturedEvent, EventPayload, Subscription};

use crate::decoder::{raw_payload, EventDecoder};
use crate::pool::ChainClientPool;
use crate::rpc::RawLog;

/// What one subscription did in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// Cursor was 0 and is now the chain head.
    Initialized { head: u64 },
    UpToDate,
    /// `skipped` counts logs dropped for malformed block number or index.
    Advanced {
        from: u64,
        to: u64,
        inserted: usize,
        skipped: usize,
    },
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub subscriptions: usize,
    pub initialized: usize,
    pub advanced: usize,
    pub events_inserted: usize,
    pub logs_skipped: usize,
    pub failed: usize,
}

pub struct Poller {
    pool: Arc<ChainClientPool>,
    store: Arc<dyn Store>,
    config: PollerConfig,
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(
        pool: Arc<ChainClientPool>,
        store: Arc<dyn Store>,
        config: PollerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            store,
            config,
            clock,
        }
    }

    /// Run one cycle over all active subscriptions. Never fails: errors are
    /// logged per subscription and counted in the report.
    pub async fn poll_once(&self) -> PollReport {
        let subs = match self.store.active_subscriptions().await {
            Ok(subs) => subs,
            Err(e) => {
                warn!(error = %e, "could not load active subscriptions");
                return PollReport::default();
            }
        };

        let mut report = PollReport {
            subscriptions: subs.len(),
            ..PollReport::default()
        };

        // Each subscription appears once, so no two tasks share a cursor.
        let outcomes: Vec<_> = stream::iter(subs)
            .map(|sub| async move {
                let result = self.poll_subscription(&sub).await;
                (sub, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (sub, result) in outcomes {
            match result {
                Ok(SubscriptionOutcome::Initialized { head }) => {
                    report.initialized += 1;
                    info!(subscription = %sub.id, chain_id = sub.chain_id, head, "cursor initialized at chain head");
                }
                Ok(SubscriptionOutcome::UpToDate) => {
                    debug!(subscription = %sub.id, "up to date");
                }
                Ok(SubscriptionOutcome::Advanced {
                    from,
                    to,
                    inserted,
                    skipped,
                }) => {
                    report.advanced += 1;
                    report.events_inserted += inserted;
                    report.logs_skipped += skipped;
                    debug!(subscription = %sub.id, from, to, inserted, skipped, "cursor advanced");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(subscription = %sub.id, chain_id = sub.chain_id, error = %e, "poll skipped");
                }
            }
        }
        report
    }

    /// Process one subscription. Any error leaves its cursor where it was.
    pub async fn poll_subscription(&self, sub: &Subscription) -> Result<SubscriptionOutcome, HookError> {
        let client = self.pool.get_client(sub.chain_id).await?;
        let head = client.get_block_number().await?;
        let cursor = sub.last_processed_block;

        if cursor == 0 {
            self.store.advance_cursor(sub.id, head).await?;
            return Ok(SubscriptionOutcome::Initialized { head });
        }
        if cursor >= head {
            return Ok(SubscriptionOutcome::UpToDate);
        }

        let from = cursor + 1;
        let to = head.min(cursor.saturating_add(self.config.max_range));
        let logs = client.get_logs(&sub.contract_address, from, to).await?;
        let (events, skipped) = self.capture(sub, &logs);
        let inserted = self.store.insert_events(&events).await?;
        self.store.advance_cursor(sub.id, to).await?;

        Ok(SubscriptionOutcome::Advanced {
            from,
            to,
            inserted,
            skipped,
        })
    }

    /// Decode logs into PENDING events, applying the subscription's filters.
    /// Undecodable logs are always kept. Logs whose block number or index
    /// cannot be parsed have no dedup key and are skipped; the count is
    /// returned alongside the events.
    fn capture(&self, sub: &Subscription, logs: &[RawLog]) -> (Vec<CapturedEvent>, usize) {
        let decoder = EventDecoder::from_abi(&sub.abi);
        if let Err(e) = &decoder {
            warn!(subscription = %sub.id, error = %e, "subscription ABI unusable, capturing raw logs");
        }
        let now = self.clock.now();

        let mut events = Vec::with_capacity(logs.len());
        let mut skipped = 0;
        for log in logs.iter().filter(|l| !l.is_removed()) {
            let position = log
                .block_number_u64()
                .and_then(|block| Ok((block, log.log_index_u64()?)));
            let (block_number, log_index) = match position {
                Ok(position) => position,
                Err(e) => {
                    skipped += 1;
                    warn!(subscription = %sub.id, tx_hash = %log.tx_hash, error = %e, "skipping malformed log");
                    continue;
                }
            };

            let payload = match &decoder {
                Ok(decoder) => decoder.payload_for(log),
                Err(e) => raw_payload(log, e.to_string()),
            };
            if let EventPayload::Decoded { name, .. } = &payload {
                if !sub.forwards(name) {
                    continue;
                }
            }
            events.push(CapturedEvent::pending(
                sub.id,
                block_number,
                log.block_hash.clone(),
                log.tx_hash.to_ascii_lowercase(),
                log_index,
                payload,
                now,
            ));
        }
        (events, skipped)
    }
}

#[async_trait]
impl Cycle for Poller {
    fn name(&self) -> &'static str {
        "poller"
    }

    async fn run_cycle(&self) {
        let report = self.poll_once().await;
        if report.subscriptions > 0 {
            info!(
                subscriptions = report.subscriptions,
                advanced = report.advanced,
                initialized = report.initialized,
                events = report.events_inserted,
                skipped = report.logs_skipped,
                failed = report.failed,
                "poll cycle finished"
            );
        }
    }
}
