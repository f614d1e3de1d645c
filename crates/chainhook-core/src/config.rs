//! Service configuration, loaded from YAML.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::HookError;

/// RPC endpoint for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEndpoint {
    /// HTTP JSON-RPC endpoint, e.g. "https://ethereum-rpc.publicnode.com"
    pub rpc_url: String,
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string, e.g. `"info,chainhook_evm=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Cursor-based poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Largest block range fetched per subscription per cycle.
    #[serde(default = "default_max_range")]
    pub max_range: u64,
    /// Subscriptions processed in parallel within one cycle.
    #[serde(default = "default_poll_concurrency")]
    pub concurrency: usize,
}

fn default_poll_interval_ms() -> u64 { 10_000 }
fn default_max_range() -> u64 { 1_000 }
fn default_poll_concurrency() -> usize { 4 }

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_range: default_max_range(),
            concurrency: default_poll_concurrency(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Delivery worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_interval_ms")]
    pub interval_ms: u64,
    /// Due events selected per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Webhook calls in flight per cycle.
    #[serde(default = "default_delivery_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Per-request webhook timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Bytes of the response body kept on each attempt.
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit: usize,
}

fn default_delivery_interval_ms() -> u64 { 5_000 }
fn default_batch_size() -> usize { 100 }
fn default_delivery_concurrency() -> usize { 8 }
fn default_max_retries() -> u32 { 5 }
fn default_base_delay_ms() -> u64 { 10_000 }
fn default_max_delay_ms() -> u64 { 3_600_000 }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_response_body_limit() -> usize { 1_024 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_delivery_interval_ms(),
            batch_size: default_batch_size(),
            concurrency: default_delivery_concurrency(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_ms: default_timeout_ms(),
            response_body_limit: default_response_body_limit(),
        }
    }
}

impl DeliveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainhookConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// chain id → endpoint; extends and overrides the built-in chain table.
    #[serde(default)]
    pub chains: BTreeMap<u64, ChainEndpoint>,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_database_url() -> String {
    "sqlite:chainhook.db?mode=rwc".to_string()
}

fn default_rpc_timeout_ms() -> u64 { 10_000 }

impl Default for ChainhookConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            chains: BTreeMap::new(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            poller: PollerConfig::default(),
            delivery: DeliveryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ChainhookConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, HookError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| HookError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, HookError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HookError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), HookError> {
        let checks: [(bool, &str); 8] = [
            (self.rpc_timeout_ms == 0, "rpc_timeout_ms must be > 0"),
            (self.poller.interval_ms == 0, "poller.interval_ms must be > 0"),
            (self.poller.max_range == 0, "poller.max_range must be > 0"),
            (self.poller.concurrency == 0, "poller.concurrency must be > 0"),
            (self.delivery.interval_ms == 0, "delivery.interval_ms must be > 0"),
            (self.delivery.batch_size == 0, "delivery.batch_size must be > 0"),
            (self.delivery.concurrency == 0, "delivery.concurrency must be > 0"),
            (self.delivery.timeout_ms == 0, "delivery.timeout_ms must be > 0"),
        ];
        if let Some((_, msg)) = checks.iter().find(|(bad, _)| *bad) {
            return Err(HookError::Config((*msg).to_string()));
        }
        if self.delivery.base_delay_ms > self.delivery.max_delay_ms {
            return Err(HookError::Config(
                "delivery.base_delay_ms must not exceed delivery.max_delay_ms".into(),
            ));
        }
        for (chain_id, endpoint) in &self.chains {
            url::Url::parse(&endpoint.rpc_url).map_err(|e| {
                HookError::Config(format!("chains.{chain_id}.rpc_url '{}': {e}", endpoint.rpc_url))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let cfg = ChainhookConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg.database_url, "sqlite:chainhook.db?mode=rwc");
        assert_eq!(cfg.poller.max_range, 1_000);
        assert_eq!(cfg.poller.interval(), Duration::from_secs(10));
        assert_eq!(cfg.delivery.max_retries, 5);
        assert_eq!(cfg.delivery.response_body_limit, 1_024);
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn chains_and_overrides_parse() {
        let yaml = r#"
chains:
  1:
    rpc_url: "https://eth.example.com"
  31337:
    rpc_url: "http://127.0.0.1:8545"
poller:
  max_range: 500
delivery:
  max_retries: 3
  base_delay_ms: 1000
log:
  level: debug
  components:
    chainhook-evm: trace
"#;
        let cfg = ChainhookConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.chains[&31337].rpc_url, "http://127.0.0.1:8545");
        assert_eq!(cfg.poller.max_range, 500);
        assert_eq!(cfg.poller.concurrency, 4);
        assert_eq!(cfg.delivery.backoff().max_retries, 3);
        assert_eq!(cfg.delivery.backoff().base_delay, Duration::from_secs(1));
        assert_eq!(cfg.log.directives(), "debug,chainhook_evm=trace");
    }

    #[test]
    fn validation_rejects_zero_range() {
        let err = ChainhookConfig::from_yaml_str("poller:\n  max_range: 0\n").unwrap_err();
        assert!(matches!(err, HookError::Config(_)));
    }

    #[test]
    fn validation_rejects_inverted_delays() {
        let mut cfg = ChainhookConfig::default();
        cfg.delivery.base_delay_ms = 10;
        cfg.delivery.max_delay_ms = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_rpc_url() {
        let mut cfg = ChainhookConfig::default();
        cfg.chains.insert(1, ChainEndpoint { rpc_url: "not a url".into() });
        assert!(cfg.validate().is_err());
    }
}
