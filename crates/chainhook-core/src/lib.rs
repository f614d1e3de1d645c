//! chainhook-core: foundation for the contract-event webhook pipeline.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ──tick──▶ Poller (chainhook-evm)
//!                        ├── ChainClientPool  (one RPC client per chain id)
//!                        ├── EventDecoder     (subscription ABI → EventPayload)
//!                        └── EventStore       (insert PENDING, advance cursor)
//!
//! Scheduler ──tick──▶ DeliveryWorker (chainhook-delivery)
//!                        ├── EventStore       (select due, claim, resolve)
//!                        ├── WebhookSender    (HTTP POST)
//!                        └── AttemptLog       (append-only audit trail)
//! ```
//!
//! The two loops share nothing but the [`store::Store`] implementation.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod management;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChainEndpoint, ChainhookConfig, DeliveryConfig, LogConfig, PollerConfig};
pub use error::HookError;
pub use management::{Management, SubscriptionUpdate};
pub use scheduler::{Cycle, Scheduler};
pub use state::{DeliveryStatus, Resolution};
pub use store::{AttemptLog, EventStore, Store, SubscriptionStore};
pub use types::{
    ArgValue, CapturedEvent, DeliveryAttempt, EventArg, EventId, EventPayload, OwnerId,
    Subscription, SubscriptionId, SubscriptionStatus, UNKNOWN_EVENT,
};
