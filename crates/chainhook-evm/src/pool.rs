//! Chain Client Pool: one lazily-built RPC client per chain id.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use chainhook_core::error::HookError;

use crate::rpc::{EvmRpcClient, HttpRpcClient};

/// Builds a client for an endpoint. Swapped out in tests.
pub trait ClientFactory: Send + Sync {
    fn build(&self, chain_id: u64, rpc_url: &str) -> Result<Arc<dyn EvmRpcClient>, HookError>;
}

/// Builds [`HttpRpcClient`]s with a fixed request timeout.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    pub timeout: Duration,
}

impl ClientFactory for HttpClientFactory {
    fn build(&self, _chain_id: u64, rpc_url: &str) -> Result<Arc<dyn EvmRpcClient>, HookError> {
        Ok(Arc::new(HttpRpcClient::new(rpc_url, self.timeout)?))
    }
}

/// Caches one client per chain for the process lifetime.
///
/// Lookups and construction happen under one lock, so concurrent first calls
/// for a chain build exactly one client.
pub struct ChainClientPool {
    endpoints: BTreeMap<u64, String>,
    factory: Arc<dyn ClientFactory>,
    clients: Mutex<HashMap<u64, Arc<dyn EvmRpcClient>>>,
}

impl ChainClientPool {
    pub fn new(endpoints: BTreeMap<u64, String>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            endpoints,
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Pool of HTTP clients over `endpoints`.
    pub fn http(endpoints: BTreeMap<u64, String>, timeout: Duration) -> Self {
        Self::new(endpoints, Arc::new(HttpClientFactory { timeout }))
    }

    pub fn supports(&self, chain_id: u64) -> bool {
        self.endpoints.contains_key(&chain_id)
    }

    pub fn supported_chains(&self) -> impl Iterator<Item = u64> + '_ {
        self.endpoints.keys().copied()
    }

    /// Client for `chain_id`, built on first use.
    pub async fn get_client(&self, chain_id: u64) -> Result<Arc<dyn EvmRpcClient>, HookError> {
        let url = self
            .endpoints
            .get(&chain_id)
            .ok_or(HookError::UnsupportedChain { chain_id })?;

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&chain_id) {
            return Ok(Arc::clone(client));
        }
        let client = self.factory.build(chain_id, url)?;
        clients.insert(chain_id, Arc::clone(&client));
        info!(chain_id, rpc_url = %url, "rpc client created");
        Ok(client)
    }

    /// Number of clients built so far.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RawLog;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed;

    #[async_trait]
    impl EvmRpcClient for Fixed {
        async fn get_block_number(&self) -> Result<u64, HookError> {
            Ok(42)
        }

        async fn get_logs(&self, _: &str, _: u64, _: u64) -> Result<Vec<RawLog>, HookError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct Counting {
        built: AtomicUsize,
    }

    impl ClientFactory for Counting {
        fn build(&self, _: u64, _: &str) -> Result<Arc<dyn EvmRpcClient>, HookError> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Fixed))
        }
    }

    fn endpoints() -> BTreeMap<u64, String> {
        BTreeMap::from([(1, "http://a".to_string()), (137, "http://b".to_string())])
    }

    #[tokio::test]
    async fn unsupported_chain_fails_fast() {
        let pool = ChainClientPool::new(endpoints(), Arc::new(Counting::default()));
        let err = pool.get_client(999).await.err().unwrap();
        assert!(matches!(err, HookError::UnsupportedChain { chain_id: 999 }));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn client_built_once_per_chain() {
        let factory = Arc::new(Counting::default());
        let pool = Arc::new(ChainClientPool::new(endpoints(), factory.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move { pool.get_client(1).await.map(|_| ()) }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        pool.get_client(137).await.unwrap();

        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len().await, 2);
        assert_eq!(pool.get_client(1).await.unwrap().get_block_number().await.unwrap(), 42);
    }
}
