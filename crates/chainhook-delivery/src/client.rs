//! Webhook HTTP client.
//!
//! A response of any status is a [`WebhookResponse`]; only transport failures
//! (timeout, refused connection, DNS) are errors. The worker decides what a
//! non-2xx status means.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn, Instrument};

use chainhook_core::error::HookError;
use chainhook_core::types::{CapturedEvent, Subscription};

const USER_AGENT: &str = concat!("chainhook/", env!("CARGO_PKG_VERSION"));

/// JSON body POSTed to the subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookBody {
    pub event_id: String,
    pub subscription_id: String,
    pub chain_id: u64,
    pub contract_address: String,
    pub event_name: String,
    /// Decoded arguments by name; `null` for unrecognized events.
    pub args: Value,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub log_index: u64,
    /// Raw `{data, topics}` for unrecognized events.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub raw: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub decode_error: Option<String>,
}

impl WebhookBody {
    pub fn new(sub: &Subscription, event: &CapturedEvent) -> Self {
        Self {
            event_id: event.id.to_string(),
            subscription_id: sub.id.to_string(),
            chain_id: sub.chain_id,
            contract_address: sub.contract_address.clone(),
            event_name: event.event_name.clone(),
            args: event.payload.args_json(),
            block_number: event.block_number,
            block_hash: event.block_hash.clone(),
            transaction_hash: event.tx_hash.clone(),
            log_index: event.log_index,
            raw: event.payload.raw_json(),
            decode_error: event.payload.decode_error().map(str::to_string),
        }
    }
}

/// What the endpoint answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    /// Truncated response body.
    pub body: String,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one webhook request.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// `attempt` is 1-based and sent as `X-Chainhook-Delivery-Attempt`.
    async fn send(&self, url: &str, body: &WebhookBody, attempt: u32) -> Result<WebhookResponse, HookError>;
}

/// `reqwest`-backed sender with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
    timeout: Duration,
    body_limit: usize,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration, body_limit: usize) -> Result<Self, HookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HookError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout,
            body_limit,
        })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, body: &WebhookBody, attempt: u32) -> Result<WebhookResponse, HookError> {
        let span = info_span!("webhook_delivery", event_id = %body.event_id, url = %url, attempt);

        async move {
            let started = Instant::now();
            let result = self
                .client
                .post(url)
                .json(body)
                .header("X-Chainhook-Event-Id", &body.event_id)
                .header("X-Chainhook-Delivery-Attempt", attempt.to_string())
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    warn!(elapsed_ms, error = %e, "webhook request failed");
                    if e.is_timeout() {
                        return Err(HookError::Webhook(format!(
                            "timed out after {}ms",
                            self.timeout.as_millis()
                        )));
                    }
                    if e.is_connect() {
                        return Err(HookError::Webhook(format!("connection failed: {e}")));
                    }
                    return Err(HookError::Webhook(e.to_string()));
                }
            };

            let status = response.status().as_u16();
            let text = match response.bytes().await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => format!("[failed to read response body: {e}]"),
            };
            debug!(status, elapsed_ms = started.elapsed().as_millis() as u64, "webhook responded");

            Ok(WebhookResponse {
                status,
                body: truncate_body(&text, self.body_limit),
            })
        }
        .instrument(span)
        .await
    }
}

/// Cut `body` to at most `limit` bytes without splitting a character.
pub fn truncate_body(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut end = limit;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainhook_core::types::{ArgValue, EventArg, EventPayload, OwnerId};
    use chrono::Utc;
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn fixture() -> (Subscription, CapturedEvent) {
        let sub = Subscription::new(
            OwnerId::new("owner"),
            1,
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            json!([]),
            "https://example.com/hook",
            Utc::now(),
        )
        .unwrap();
        let ev = CapturedEvent::pending(
            sub.id,
            19_000_000,
            "0xblock",
            "0xtx",
            4,
            EventPayload::Decoded {
                name: "Transfer".into(),
                args: vec![EventArg {
                    name: "value".into(),
                    indexed: false,
                    value: ArgValue::Uint("5".into()),
                }],
            },
            Utc::now(),
        );
        (sub, ev)
    }

    #[test]
    fn body_uses_camel_case() {
        let (sub, ev) = fixture();
        let json = serde_json::to_value(WebhookBody::new(&sub, &ev)).unwrap();
        assert_eq!(json["eventName"], "Transfer");
        assert_eq!(json["blockNumber"], 19_000_000);
        assert_eq!(json["transactionHash"], "0xtx");
        assert_eq!(json["logIndex"], 4);
        assert_eq!(json["args"]["value"], "5");
        assert!(json.get("raw").is_none());
        assert!(json.get("decodeError").is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_body("hello", 10), "hello");
        assert_eq!(truncate_body("hello", 3), "hel");
        // 'é' is two bytes; cutting inside it backs off.
        assert_eq!(truncate_body("aé", 2), "a");
    }

    #[tokio::test]
    async fn successful_delivery_sends_headers() {
        let server = MockServer::start().await;
        let (sub, ev) = fixture();

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("X-Chainhook-Event-Id", ev.id.to_string().as_str()))
            .and(matchers::header("X-Chainhook-Delivery-Attempt", "2"))
            .and(matchers::body_partial_json(json!({ "eventName": "Transfer", "logIndex": 4 })))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let sender = HttpWebhookSender::new(Duration::from_secs(5), 1024).unwrap();
        let resp = sender
            .send(&format!("{}/hook", server.uri()), &WebhookBody::new(&sub, &ev), 2)
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.body, "OK");
    }

    #[tokio::test]
    async fn server_error_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(5000)))
            .mount(&server)
            .await;

        let (sub, ev) = fixture();
        let sender = HttpWebhookSender::new(Duration::from_secs(5), 1024).unwrap();
        let resp = sender.send(&server.uri(), &WebhookBody::new(&sub, &ev), 1).await.unwrap();
        assert_eq!(resp.status, 500);
        assert!(!resp.is_success());
        assert_eq!(resp.body.len(), 1024);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let (sub, ev) = fixture();
        let sender = HttpWebhookSender::new(Duration::from_millis(100), 1024).unwrap();
        let err = sender.send(&server.uri(), &WebhookBody::new(&sub, &ev), 1).await.unwrap_err();
        assert!(matches!(err, HookError::Webhook(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let sender = HttpWebhookSender::new(Duration::from_secs(1), 1024).unwrap();
        let (sub, ev) = fixture();
        let err = sender
            .send("http://127.0.0.1:1/hook", &WebhookBody::new(&sub, &ev), 1)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
