//! Chain id → RPC endpoint table.
//!
//! The built-in entries are public, no-API-key endpoints. Configured chains
//! override or extend them.

use std::collections::BTreeMap;

use chainhook_core::config::ChainEndpoint;

/// A chain the pool can connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownChain {
    pub chain_id: u64,
    pub name: &'static str,
    pub rpc_url: &'static str,
}

const KNOWN: &[KnownChain] = &[
    KnownChain { chain_id: 1, name: "ethereum", rpc_url: "https://ethereum-rpc.publicnode.com" },
    KnownChain { chain_id: 10, name: "optimism", rpc_url: "https://optimism-rpc.publicnode.com" },
    KnownChain { chain_id: 56, name: "bsc", rpc_url: "https://bsc-rpc.publicnode.com" },
    KnownChain { chain_id: 97, name: "bsc-testnet", rpc_url: "https://bsc-testnet-rpc.publicnode.com" },
    KnownChain { chain_id: 137, name: "polygon", rpc_url: "https://polygon-bor-rpc.publicnode.com" },
    KnownChain { chain_id: 42161, name: "arbitrum", rpc_url: "https://arbitrum-one-rpc.publicnode.com" },
    KnownChain { chain_id: 80002, name: "polygon-amoy", rpc_url: "https://polygon-amoy-bor-rpc.publicnode.com" },
    KnownChain { chain_id: 11155111, name: "sepolia", rpc_url: "https://ethereum-sepolia-rpc.publicnode.com" },
];

/// Built-in chains.
pub fn known_chains() -> &'static [KnownChain] {
    KNOWN
}

pub fn known_chain(chain_id: u64) -> Option<&'static KnownChain> {
    KNOWN.iter().find(|c| c.chain_id == chain_id)
}

/// Endpoint map used by the pool: the built-in table with `overrides` applied.
pub fn resolve_endpoints(overrides: &BTreeMap<u64, ChainEndpoint>) -> BTreeMap<u64, String> {
    let mut endpoints: BTreeMap<u64, String> = KNOWN
        .iter()
        .map(|c| (c.chain_id, c.rpc_url.to_string()))
        .collect();
    for (chain_id, endpoint) in overrides {
        endpoints.insert(*chain_id, endpoint.rpc_url.clone());
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_is_known() {
        let eth = known_chain(1).unwrap();
        assert_eq!(eth.name, "ethereum");
        assert!(known_chain(999_999).is_none());
    }

    #[test]
    fn overrides_replace_and_extend() {
        let mut overrides = BTreeMap::new();
        overrides.insert(1, ChainEndpoint { rpc_url: "https://eth.internal".into() });
        overrides.insert(31337, ChainEndpoint { rpc_url: "http://127.0.0.1:8545".into() });
        let endpoints = resolve_endpoints(&overrides);
        assert_eq!(endpoints[&1], "https://eth.internal");
        assert_eq!(endpoints[&31337], "http://127.0.0.1:8545");
        assert_eq!(endpoints[&137], "https://polygon-bor-rpc.publicnode.com");
        assert_eq!(endpoints.len(), KNOWN.len() + 1);
    }
}
