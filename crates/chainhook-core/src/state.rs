//! Delivery state machine for captured events.
//!
//! ```text
//! PENDING ──claim──▶ PROCESSING ──2xx──────────────────▶ DELIVERED
//!    ▲                   │
//!    ├───retry/defer─────┤
//!    │                   └──retries exhausted──────────▶ FAILED
//!    └──────────────────────replay─────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HookError;

/// Delivery state of a [`CapturedEvent`](crate::types::CapturedEvent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, HookError> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "DELIVERED" => Ok(Self::Delivered),
            "FAILED" => Ok(Self::Failed),
            other => Err(HookError::Invalid(format!("unknown delivery status '{other}'"))),
        }
    }

    /// Terminal until an explicit replay.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Transitions the worker may perform. Replay is not listed: it is an
    /// administrative override that may reset any state.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Delivered)
                | (Processing, Pending)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a claimed (PROCESSING) event leaves that state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Webhook answered 2xx.
    Delivered,
    /// Failed try with budget left: back to PENDING on a new schedule.
    Retry {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Retry budget exhausted.
    Failed,
    /// Subscription paused or gone: back to PENDING, schedule untouched.
    Deferred,
}

impl Resolution {
    /// Status the event ends up in.
    pub fn status(&self) -> DeliveryStatus {
        match self {
            Self::Delivered => DeliveryStatus::Delivered,
            Self::Retry { .. } | Self::Deferred => DeliveryStatus::Pending,
            Self::Failed => DeliveryStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_transitions() {
        use DeliveryStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Delivered));
        assert!(Processing.can_transition_to(Pending));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn status_roundtrip_through_text() {
        for s in [
            DeliveryStatus::Pending,
            DeliveryStatus::Processing,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(DeliveryStatus::parse(s.as_str()).unwrap(), s);
        }
        assert_eq!(DeliveryStatus::parse("failed").unwrap(), DeliveryStatus::Failed);
        assert!(DeliveryStatus::parse("LOST").is_err());
    }

    #[test]
    fn resolution_target_status() {
        assert_eq!(Resolution::Deferred.status(), DeliveryStatus::Pending);
        assert_eq!(Resolution::Failed.status(), DeliveryStatus::Failed);
        assert!(Resolution::Delivered.status().is_terminal());
    }
}
