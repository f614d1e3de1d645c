//! Shared types for the ingestion and delivery pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::HookError;
use crate::state::DeliveryStatus;

/// Event name stored for logs that could not be decoded against the subscription ABI.
pub const UNKNOWN_EVENT: &str = "UnknownEvent";

// ─── Identifiers ──────────────────────────────────────────────────────────────

/// Unique identifier of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the account owning a subscription, as resolved by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Subscription ─────────────────────────────────────────────────────────────

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Result<Self, HookError> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            other => Err(HookError::Invalid(format!("unknown subscription status '{other}'"))),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (owner, chain, contract, webhook) binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub owner: OwnerId,
    /// EVM chain id (e.g. `1` for Ethereum mainnet).
    pub chain_id: u64,
    /// Contract address, lowercase `0x…` hex.
    pub contract_address: String,
    /// Standard Ethereum ABI JSON (array of descriptors).
    pub abi: Value,
    pub webhook_url: String,
    /// Event names to forward; empty forwards everything.
    pub event_filters: Vec<String>,
    /// Last block fully processed; `0` means not yet initialized.
    pub last_processed_block: u64,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Build a new active subscription, validating address and webhook URL.
    pub fn new(
        owner: OwnerId,
        chain_id: u64,
        contract_address: &str,
        abi: Value,
        webhook_url: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, HookError> {
        if !abi.is_array() {
            return Err(HookError::Invalid("ABI must be a JSON array".into()));
        }
        Ok(Self {
            id: SubscriptionId::new(),
            owner,
            chain_id,
            contract_address: normalize_address(contract_address)?,
            abi,
            webhook_url: validate_webhook_url(webhook_url)?,
            event_filters: Vec::new(),
            last_processed_block: 0,
            status: SubscriptionStatus::Active,
            created_at,
        })
    }

    /// Restrict forwarding to the given event names.
    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.event_filters = filters;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Returns `true` if a decoded event with this name should be captured.
    pub fn forwards(&self, event_name: &str) -> bool {
        self.event_filters.is_empty() || self.event_filters.iter().any(|f| f == event_name)
    }
}

/// Lowercase and validate a 20-byte hex address.
pub fn normalize_address(address: &str) -> Result<String, HookError> {
    let trimmed = address.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| HookError::Invalid(format!("address '{address}' must start with 0x")))?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(HookError::Invalid(format!(
            "address '{address}' is not 20 hex-encoded bytes"
        )));
    }
    Ok(format!("0x{}", hex.to_ascii_lowercase()))
}

/// Accept only absolute http(s) URLs.
pub fn validate_webhook_url(raw: &str) -> Result<String, HookError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| HookError::Invalid(format!("webhook url '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(HookError::Invalid(format!(
            "webhook url scheme '{other}' is not http(s)"
        ))),
    }
}

// ─── Event payload ────────────────────────────────────────────────────────────

/// A decoded ABI value, tagged with its kind.
///
/// Integers are kept as decimal strings so 256-bit values survive JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Bool(bool),
    Uint(String),
    Int(String),
    /// Lowercase `0x…` address.
    Address(String),
    /// `bytesN`, `0x…` hex.
    FixedBytes(String),
    /// Dynamic `bytes`, `0x…` hex.
    Bytes(String),
    Str(String),
    Array(Vec<ArgValue>),
    Tuple(Vec<ArgValue>),
    /// Indexed reference type: only the keccak256 of the value is on chain.
    Hashed(String),
}

impl ArgValue {
    /// Plain JSON rendering used in webhook bodies.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Uint(s)
            | Self::Int(s)
            | Self::Address(s)
            | Self::FixedBytes(s)
            | Self::Bytes(s)
            | Self::Str(s)
            | Self::Hashed(s) => Value::String(s.clone()),
            Self::Array(items) | Self::Tuple(items) => {
                Value::Array(items.iter().map(ArgValue::to_json).collect())
            }
        }
    }
}

/// One named argument of a decoded event, in ABI order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventArg {
    pub name: String,
    pub indexed: bool,
    pub value: ArgValue,
}

/// What was captured for a log: either a decoded event or the raw log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Decoded {
        name: String,
        args: Vec<EventArg>,
    },
    Raw {
        /// Log data, `0x…` hex.
        data: String,
        topics: Vec<String>,
        error: String,
    },
}

impl EventPayload {
    /// Event name, or [`UNKNOWN_EVENT`] for raw logs.
    pub fn event_name(&self) -> &str {
        match self {
            Self::Decoded { name, .. } => name,
            Self::Raw { .. } => UNKNOWN_EVENT,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded { .. })
    }

    /// Arguments as a JSON object keyed by name (`arg{i}` for unnamed ones).
    ///
    /// Raw payloads have no arguments and render as `null`.
    pub fn args_json(&self) -> Value {
        match self {
            Self::Decoded { args, .. } => {
                let mut map = Map::new();
                for (i, arg) in args.iter().enumerate() {
                    let key = if arg.name.is_empty() {
                        format!("arg{i}")
                    } else {
                        arg.name.clone()
                    };
                    map.insert(key, arg.value.to_json());
                }
                Value::Object(map)
            }
            Self::Raw { .. } => Value::Null,
        }
    }

    /// Raw log section for unrecognized events.
    pub fn raw_json(&self) -> Option<Value> {
        match self {
            Self::Raw { data, topics, .. } => Some(json!({ "data": data, "topics": topics })),
            Self::Decoded { .. } => None,
        }
    }

    pub fn decode_error(&self) -> Option<&str> {
        match self {
            Self::Raw { error, .. } => Some(error),
            Self::Decoded { .. } => None,
        }
    }
}

// ─── CapturedEvent ────────────────────────────────────────────────────────────

/// One on-chain log destined for webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedEvent {
    pub id: EventId,
    pub subscription_id: SubscriptionId,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    /// Position of the log in its block; disambiguates several events per transaction.
    pub log_index: u64,
    pub event_name: String,
    pub payload: EventPayload,
    pub status: DeliveryStatus,
    pub next_retry_at: DateTime<Utc>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl CapturedEvent {
    /// A new PENDING event, due immediately.
    pub fn pending(
        subscription_id: SubscriptionId,
        block_number: u64,
        block_hash: impl Into<String>,
        tx_hash: impl Into<String>,
        log_index: u64,
        payload: EventPayload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            subscription_id,
            block_number,
            block_hash: block_hash.into(),
            tx_hash: tx_hash.into(),
            log_index,
            event_name: payload.event_name().to_string(),
            payload,
            status: DeliveryStatus::Pending,
            next_retry_at: now,
            retry_count: 0,
            created_at: now,
        }
    }

    /// The idempotency key: one event per (subscription, tx hash, log index).
    pub fn dedup_key(&self) -> (SubscriptionId, String, u64) {
        (self.subscription_id, self.tx_hash.to_ascii_lowercase(), self.log_index)
    }
}

// ─── DeliveryAttempt ──────────────────────────────────────────────────────────

/// Immutable record of one delivery try.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub event_id: EventId,
    /// HTTP status, if a response was received.
    pub response_status: Option<u16>,
    /// Response body, truncated.
    pub response_body: Option<String>,
    pub success: bool,
    /// Transport-level error (timeout, connection refused, deferral reason).
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(
        event_id: EventId,
        response_status: Option<u16>,
        response_body: Option<String>,
        error: Option<String>,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        let success = error.is_none()
            && response_status.map_or(false, |s| (200..300).contains(&s));
        Self {
            id: Uuid::new_v4(),
            event_id,
            response_status,
            response_body,
            success,
            error,
            attempted_at,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sub() -> Subscription {
        Subscription::new(
            OwnerId::new("user-1"),
            1,
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            json!([]),
            "https://example.com/hook",
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn address_is_lowercased() {
        assert_eq!(sub().contract_address, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    }

    #[test]
    fn bad_addresses_rejected() {
        assert!(normalize_address("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48").is_err());
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address("0xzzb86991c6218b36c1d19d4a2e9eb0ce3606eb48").is_err());
    }

    #[test]
    fn webhook_url_must_be_http() {
        assert!(validate_webhook_url("ftp://example.com").is_err());
        assert!(validate_webhook_url("not a url").is_err());
        assert!(validate_webhook_url("http://localhost:8080/hook").is_ok());
    }

    #[test]
    fn empty_filter_forwards_everything() {
        let s = sub();
        assert!(s.forwards("Transfer"));
        let s = s.with_filters(vec!["Approval".into()]);
        assert!(s.forwards("Approval"));
        assert!(!s.forwards("Transfer"));
    }

    #[test]
    fn raw_payload_is_unknown_event() {
        let payload = EventPayload::Raw {
            data: "0x".into(),
            topics: vec!["0xdead".into()],
            error: "no matching event".into(),
        };
        let ev = CapturedEvent::pending(SubscriptionId::new(), 5, "0xb", "0xt", 0, payload, Utc::now());
        assert_eq!(ev.event_name, UNKNOWN_EVENT);
        assert_eq!(ev.status, DeliveryStatus::Pending);
        assert!(ev.payload.args_json().is_null());
        assert_eq!(ev.payload.decode_error(), Some("no matching event"));
    }

    #[test]
    fn args_render_by_name() {
        let payload = EventPayload::Decoded {
            name: "Transfer".into(),
            args: vec![
                EventArg {
                    name: "from".into(),
                    indexed: true,
                    value: ArgValue::Address("0x01".into()),
                },
                EventArg {
                    name: String::new(),
                    indexed: false,
                    value: ArgValue::Uint("1000000000000000000000".into()),
                },
            ],
        };
        let args = payload.args_json();
        assert_eq!(args["from"], "0x01");
        assert_eq!(args["arg1"], "1000000000000000000000");
    }

    #[test]
    fn attempt_success_requires_2xx() {
        let id = EventId::new();
        assert!(DeliveryAttempt::new(id, Some(204), None, None, Utc::now()).success);
        assert!(!DeliveryAttempt::new(id, Some(500), None, None, Utc::now()).success);
        assert!(!DeliveryAttempt::new(id, None, None, Some("timeout".into()), Utc::now()).success);
    }
}
