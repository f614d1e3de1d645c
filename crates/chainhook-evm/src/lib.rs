//! chainhook-evm: chain access for ChainHook: JSON-RPC client, client pool,
//! ABI event decoder and the cursor-based log poller.

pub mod chains;
pub mod decoder;
pub mod poller;
pub mod pool;
pub mod rpc;

pub use chains::{known_chain, known_chains, resolve_endpoints, KnownChain};
pub use decoder::{DecodeError, EventDecoder};
pub use poller::{PollReport, Poller, SubscriptionOutcome};
pub use pool::{ChainClientPool, ClientFactory, HttpClientFactory};
pub use rpc::{EvmRpcClient, HttpRpcClient, RawLog};
