//! Well-known EVM networks addressed by their x402 network names.
//!
//! x402 v1 envelopes name the network (`"base-sepolia"`) rather than its EIP-155 chain id.
//! This table resolves one to the other. Chains absent from the table can still be served by
//! setting `chain_id` explicitly in the configuration.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// A network name together with its EIP-155 chain id and a public RPC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub chain_id: u64,
    pub public_rpc: &'static str,
}

pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "base-sepolia",
        chain_id: 84532,
        public_rpc: "https://sepolia.base.org",
    },
    NetworkInfo {
        name: "sepolia",
        chain_id: 11155111,
        public_rpc: "https://ethereum-sepolia-rpc.publicnode.com",
    },
    NetworkInfo {
        name: "amoy",
        chain_id: 80002,
        public_rpc: "https://rpc-amoy.polygon.technology",
    },
    NetworkInfo {
        name: "holesky",
        chain_id: 17000,
        public_rpc: "https://ethereum-holesky.publicnode.com",
    },
    NetworkInfo {
        name: "zksync-sepolia",
        chain_id: 300,
        public_rpc: "https://sepolia.era.zksync.dev",
    },
    NetworkInfo {
        name: "arbitrum-sepolia",
        chain_id: 421614,
        public_rpc: "https://sepolia-rollup.arbitrum.io/rpc",
    },
    NetworkInfo {
        name: "op-sepolia",
        chain_id: 11155420,
        public_rpc: "https://optimism-sepolia.gateway.tenderly.co",
    },
    NetworkInfo {
        name: "base",
        chain_id: 8453,
        public_rpc: "https://mainnet.base.org",
    },
];

static BY_NAME: Lazy<HashMap<&'static str, &'static NetworkInfo>> =
    Lazy::new(|| KNOWN_NETWORKS.iter().map(|n| (n.name, n)).collect());

pub fn network_by_name(name: &str) -> Option<&'static NetworkInfo> {
    BY_NAME.get(name).copied()
}

pub fn chain_id_by_network_name(name: &str) -> Option<u64> {
    network_by_name(name).map(|n| n.chain_id)
}
