//! JSON-RPC wire types and the HTTP client used to read chain heads and logs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chainhook_core::error::HookError;

// ─── Wire types ───────────────────────────────────────────────────────────────

/// Outgoing JSON-RPC 2.0 call.
#[derive(Debug, Serialize)]
struct RpcCall<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

/// JSON-RPC error object returned by the node.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// The parts of a reply the client reads.
#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

impl RpcReply {
    fn into_result(self) -> Result<Value, RpcErrorObject> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, HookError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u64(&self) -> Result<u64, HookError> {
        parse_hex_u64(&self.log_index)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, HookError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| HookError::RpcUnavailable(format!("invalid hex quantity '{s}': {e}")))
}

// ─── Client trait ─────────────────────────────────────────────────────────────

/// The two chain reads the poller needs.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn get_block_number(&self) -> Result<u64, HookError>;

    /// Logs emitted by `address` in `[from, to]` (inclusive).
    async fn get_logs(&self, address: &str, from: u64, to: u64) -> Result<Vec<RawLog>, HookError>;
}

// ─── HTTP implementation ──────────────────────────────────────────────────────

/// JSON-RPC over HTTP via `reqwest`, one request per call, bounded by a timeout.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HookError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HookError::RpcUnavailable(format!("building HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, HookError> {
        let req = RpcCall {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| HookError::RpcUnavailable(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(HookError::RpcUnavailable(format!("{method}: HTTP {status}: {body}")));
        }

        resp.json::<RpcReply>()
            .await
            .map_err(|e| HookError::RpcUnavailable(format!("{method}: {e}")))?
            .into_result()
            .map_err(|e| HookError::RpcUnavailable(format!("{method}: {e}")))
    }
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn get_block_number(&self) -> Result<u64, HookError> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| HookError::RpcUnavailable("eth_blockNumber: result is not a string".into()))?;
        parse_hex_u64(hex)
    }

    async fn get_logs(&self, address: &str, from: u64, to: u64) -> Result<Vec<RawLog>, HookError> {
        let filter = json!({
            "address": address,
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
        });
        let result = self.call("eth_getLogs", vec![filter]).await?;
        serde_json::from_value(result)
            .map_err(|e| HookError::RpcUnavailable(format!("eth_getLogs: malformed logs: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("1234").unwrap(), 0x1234);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn raw_log_from_rpc_json() {
        let log: RawLog = serde_json::from_value(json!({
            "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
            "data": "0x",
            "blockNumber": "0x12a05f200",
            "blockHash": "0xabc",
            "transactionHash": "0xdef",
            "logIndex": "0x5",
            "transactionIndex": "0x1"
        }))
        .unwrap();
        assert_eq!(log.block_number_u64().unwrap(), 5_000_000_000);
        assert_eq!(log.log_index_u64().unwrap(), 5);
        assert!(!log.is_removed());
    }

    #[test]
    fn response_error_surfaces() {
        let resp: RpcReply = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32005, "message": "query returned more than 10000 results" }
        }))
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32005);
        assert!(err.to_string().contains("10000 results"));
    }
}
