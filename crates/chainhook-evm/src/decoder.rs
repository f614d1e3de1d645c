//! ABI event decoder: raw log topics/data → named event with typed arguments.
//!
//! # Indexed parameters
//! - **Value types** (uint, int, bool, address, bytesN) are padded into one
//!   32-byte topic and decoded directly.
//! - **Reference types** (string, bytes, arrays, tuples) are stored as the
//!   keccak256 of their encoding. The value is unrecoverable, so the topic is
//!   returned as [`ArgValue::Hashed`].

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::B256;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use chainhook_core::error::HookError;
use chainhook_core::types::{ArgValue, EventArg, EventPayload};

use crate::rpc::RawLog;

/// Why a log could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid ABI: {0}")]
    InvalidAbi(String),

    #[error("log has no topics (anonymous event)")]
    NoTopics,

    #[error("no event in ABI matches selector {0}")]
    UnknownSelector(String),

    #[error("event {event} expects {expected} indexed topics, log has {got}")]
    TopicCountMismatch {
        event: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("cannot resolve type of parameter '{param}': {reason}")]
    UnresolvableType { param: String, reason: String },

    #[error("ABI decode failed: {0}")]
    AbiDecode(String),
}

impl From<DecodeError> for HookError {
    fn from(e: DecodeError) -> Self {
        HookError::Decode(e.to_string())
    }
}

/// Decoder for one contract ABI, indexed by event selector.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    events: HashMap<B256, Event>,
}

impl EventDecoder {
    /// Parse a standard ABI JSON array. Anonymous events cannot be matched
    /// by selector and are left out.
    pub fn from_abi(abi: &Value) -> Result<Self, DecodeError> {
        let abi: JsonAbi =
            serde_json::from_value(abi.clone()).map_err(|e| DecodeError::InvalidAbi(e.to_string()))?;
        let events = abi
            .events()
            .filter(|e| !e.anonymous)
            .map(|e| (e.selector(), e.clone()))
            .collect();
        Ok(Self { events })
    }

    /// Number of selectable events in the ABI.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Decode a log given its hex data and hex topics.
    pub fn decode(&self, data: &str, topics: &[String]) -> Result<(String, Vec<EventArg>), DecodeError> {
        let selector_hex = topics.first().ok_or(DecodeError::NoTopics)?;
        let selector = B256::from_slice(&decode_word(selector_hex)?);
        let event = self
            .events
            .get(&selector)
            .ok_or_else(|| DecodeError::UnknownSelector(selector_hex.clone()))?;

        let indexed_topics = &topics[1..];
        let expected = event.inputs.iter().filter(|p| p.indexed).count();
        if indexed_topics.len() != expected {
            return Err(DecodeError::TopicCountMismatch {
                event: event.name.clone(),
                expected,
                got: indexed_topics.len(),
            });
        }

        let mut types = Vec::with_capacity(event.inputs.len());
        for param in &event.inputs {
            let ty = param.resolve().map_err(|e| DecodeError::UnresolvableType {
                param: param.name.clone(),
                reason: e.to_string(),
            })?;
            types.push(ty);
        }

        let data_types: Vec<DynSolType> = event
            .inputs
            .iter()
            .zip(&types)
            .filter(|(p, _)| !p.indexed)
            .map(|(_, t)| t.clone())
            .collect();
        let mut data_values = decode_data(data, data_types)?.into_iter();
        let mut topic_iter = indexed_topics.iter();

        let mut args = Vec::with_capacity(event.inputs.len());
        for (param, ty) in event.inputs.iter().zip(types) {
            let value = if param.indexed {
                let topic = topic_iter.next().ok_or(DecodeError::NoTopics)?;
                decode_topic(topic, &ty)?
            } else {
                let v = data_values
                    .next()
                    .ok_or_else(|| DecodeError::AbiDecode("data shorter than ABI".into()))?;
                to_arg_value(v)
            };
            args.push(EventArg {
                name: param.name.clone(),
                indexed: param.indexed,
                value,
            });
        }

        Ok((event.name.clone(), args))
    }

    /// Fail-open decode: a log that does not decode becomes a raw payload
    /// carrying the error text.
    pub fn payload_for(&self, log: &RawLog) -> EventPayload {
        match self.decode(&log.data, &log.topics) {
            Ok((name, args)) => EventPayload::Decoded { name, args },
            Err(e) => raw_payload(log, e.to_string()),
        }
    }
}

/// Raw payload for a log that could not be decoded.
pub fn raw_payload(log: &RawLog, error: String) -> EventPayload {
    EventPayload::Raw {
        data: log.data.clone(),
        topics: log.topics.clone(),
        error,
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, DecodeError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| DecodeError::InvalidHex(format!("'{s}': {e}")))
}

fn decode_word(s: &str) -> Result<Vec<u8>, DecodeError> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 32 {
        return Err(DecodeError::InvalidHex(format!(
            "topic '{s}' is {} bytes, expected 32",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn decode_topic(topic: &str, ty: &DynSolType) -> Result<ArgValue, DecodeError> {
    let bytes = decode_word(topic)?;
    if matches!(
        ty,
        DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(..)
            | DynSolType::Tuple(_)
    ) {
        return Ok(ArgValue::Hashed(prefixed_hex(&bytes)));
    }
    ty.abi_decode(&bytes)
        .map(to_arg_value)
        .map_err(|e| DecodeError::AbiDecode(format!("topic: {e}")))
}

fn decode_data(data: &str, types: Vec<DynSolType>) -> Result<Vec<DynSolValue>, DecodeError> {
    if types.is_empty() {
        return Ok(Vec::new());
    }
    let bytes = decode_hex(data)?;
    match DynSolType::Tuple(types).abi_decode_params(&bytes) {
        Ok(DynSolValue::Tuple(values)) => Ok(values),
        Ok(other) => Ok(vec![other]),
        Err(e) => Err(DecodeError::AbiDecode(format!("data: {e}"))),
    }
}

fn prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Map an alloy value onto the payload's tagged value kinds.
#[allow(unreachable_patterns)]
pub fn to_arg_value(value: DynSolValue) -> ArgValue {
    match value {
        DynSolValue::Bool(b) => ArgValue::Bool(b),
        DynSolValue::Int(i, _) => ArgValue::Int(i.to_string()),
        DynSolValue::Uint(u, _) => ArgValue::Uint(u.to_string()),
        DynSolValue::FixedBytes(word, size) => ArgValue::FixedBytes(prefixed_hex(&word[..size.min(32)])),
        DynSolValue::Address(a) => ArgValue::Address(prefixed_hex(a.as_slice())),
        DynSolValue::Function(f) => ArgValue::FixedBytes(prefixed_hex(f.as_slice())),
        DynSolValue::Bytes(b) => ArgValue::Bytes(prefixed_hex(&b)),
        DynSolValue::String(s) => ArgValue::Str(s),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            ArgValue::Array(items.into_iter().map(to_arg_value).collect())
        }
        DynSolValue::Tuple(items) => ArgValue::Tuple(items.into_iter().map(to_arg_value).collect()),
        other => ArgValue::Bytes(prefixed_hex(&other.abi_encode())),
    }
}
