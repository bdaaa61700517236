//! Configuration for the facilitator server.
//!
//! Configuration is read from a JSON file (`--config`, `$CONFIG`, default `config.json`).
//! Secrets and endpoints may reference environment variables with `$VAR` or `${VAR}`, see
//! [`LiteralOrEnv`].
//!
//! ```json
//! {
//!   "port": 8080,
//!   "signer": "$FACILITATOR_PRIVATE_KEY",
//!   "chains": {
//!     "base-sepolia": { "rpc": [{ "http": "$BASE_SEPOLIA_RPC", "rate_limit": 20 }] },
//!     "arbitrum-sepolia": { "eip1559": false }
//!   },
//!   "schemes": [
//!     { "name": "exact", "network": "base-sepolia", "kind": "exact",
//!       "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
//!       "extra": { "name": "USDC", "version": "2" } }
//!   ],
//!   "tracker": { "poll_interval_secs": 5, "timeout_secs": 1800, "retention_secs": 7200 }
//! }
//! ```

use alloy_primitives::B256;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::networks;
use crate::scheme::SchemeConfig;

/// CLI arguments for the facilitator server.
#[derive(Parser, Debug)]
#[command(name = "sx402")]
#[command(about = "x402 facilitator for transfer, permit and cross-chain authorizations")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// `port` and `host` fall back to `$PORT`/`$HOST`, then to `8080`/`0.0.0.0`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    /// Facilitator key: pays gas, is the permit spender and the markup beneficiary.
    signer: LiteralOrEnv<EvmPrivateKey>,
    #[serde(default)]
    chains: ChainsConfig,
    #[serde(default)]
    schemes: Vec<SchemeConfig>,
    #[serde(default)]
    tracker: TrackerConfig,
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn signer(&self) -> &EvmPrivateKey {
        self.signer.inner()
    }

    /// Chains keyed by x402 network name.
    pub fn chains(&self) -> &ChainsConfig {
        &self.chains
    }

    pub fn schemes(&self) -> &Vec<SchemeConfig> {
        &self.schemes
    }

    pub fn tracker(&self) -> &TrackerConfig {
        &self.tracker
    }

    /// Load configuration from CLI arguments and the JSON file they point at.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
    pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 30 * 60;
    pub const DEFAULT_RECEIPT_RETENTION_SECS: u64 = 2 * 60 * 60;

    /// `$PORT`, then 8080.
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// `$HOST`, then `0.0.0.0`.
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    pub fn default_poll_interval_secs() -> u64 {
        DEFAULT_POLL_INTERVAL_SECS
    }

    pub fn default_timeout_secs() -> u64 {
        DEFAULT_RECEIPT_TIMEOUT_SECS
    }

    pub fn default_retention_secs() -> u64 {
        DEFAULT_RECEIPT_RETENTION_SECS
    }

    pub fn default_eip1559() -> bool {
        true
    }
}

/// Settlement tracker timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "config_defaults::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "config_defaults::default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long a confirmed receipt stays queryable after confirmation.
    #[serde(default = "config_defaults::default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: config_defaults::DEFAULT_POLL_INTERVAL_SECS,
            timeout_secs: config_defaults::DEFAULT_RECEIPT_TIMEOUT_SECS,
            retention_secs: config_defaults::DEFAULT_RECEIPT_RETENTION_SECS,
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// RPC provider configuration for a single endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcConfig {
    pub http: LiteralOrEnv<Url>,
    /// Requests per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

/// Configuration of one EVM chain, keyed by its x402 network name.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub network: String,
    pub chain_id: u64,
    pub inner: ChainConfigInner,
}

impl ChainConfig {
    pub fn eip1559(&self) -> bool {
        self.inner.eip1559
    }

    /// Configured endpoints, or the network's public endpoint when none are configured.
    pub fn rpc(&self) -> Vec<RpcConfig> {
        if !self.inner.rpc.is_empty() {
            return self.inner.rpc.clone();
        }
        networks::network_by_name(&self.network)
            .and_then(|n| Url::parse(n.public_rpc).ok())
            .map(|http| {
                vec![RpcConfig {
                    http: LiteralOrEnv::from_literal(http),
                    rate_limit: None,
                }]
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfigInner {
    /// Required for networks missing from [`networks::KNOWN_NETWORKS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default = "config_defaults::default_eip1559")]
    pub eip1559: bool,
    #[serde(default)]
    pub rpc: Vec<RpcConfig>,
}

/// Chains, serialized as a map from network name to [`ChainConfigInner`].
#[derive(Debug, Clone, Default)]
pub struct ChainsConfig(pub Vec<ChainConfig>);

impl Deref for ChainsConfig {
    type Target = Vec<ChainConfig>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for ChainsConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for chain in &self.0 {
            map.serialize_entry(&chain.network, &chain.inner)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChainsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{MapAccess, Visitor};
        use std::fmt;

        struct ChainsVisitor;

        impl<'de> Visitor<'de> for ChainsVisitor {
            type Value = ChainsConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of network names to chain configurations")
            }

            fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut chains = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(network) = access.next_key::<String>()? {
                    let inner: ChainConfigInner = access.next_value()?;
                    let chain_id = inner
                        .chain_id
                        .or_else(|| networks::chain_id_by_network_name(&network))
                        .ok_or_else(|| {
                            serde::de::Error::custom(format!(
                                "Unknown network {network}, set chain_id explicitly"
                            ))
                        })?;
                    chains.push(ChainConfig {
                        network,
                        chain_id,
                        inner,
                    });
                }
                Ok(ChainsConfig(chains))
            }
        }

        deserializer.deserialize_map(ChainsVisitor)
    }
}

/// A validated 32-byte EVM private key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_b256(&self) -> B256 {
        self.0
    }
}

impl std::fmt::Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EvmPrivateKey(..)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid evm private key: {}", e))
    }
}

/// A value given either literally or as an environment variable reference.
///
/// - literal: `"http://localhost:8545"`
/// - simple reference: `"$RPC_URL"`
/// - braced reference: `"${RPC_URL}"`
///
/// The reference is resolved once, during deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    #[allow(dead_code)]
    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name when `s` is `$VAR` or `${VAR}`.
    fn parse_env_var_syntax(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            return Some(braced);
        }
        let name = s.strip_prefix('$')?;
        let is_name = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
        is_name.then_some(name)
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = match Self::parse_env_var_syntax(&s) {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?,
            None => s,
        };
        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {}", e)))?;
        Ok(LiteralOrEnv(parsed))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}
