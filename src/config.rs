use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub blockchain: BlockchainConfig,
    pub tokens: TokenConfig,
    pub dexes: HashMap<String, DexConfig>,
    pub arbitrage: ArbitrageConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    pub database: DatabaseConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BlockchainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Helper contract exposing `getReservesByPairs` and `getPairsByIndexRange`.
    pub reserve_query_address: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_reserve_batch_size")]
    pub reserve_batch_size: usize,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenConfig {
    /// Reference asset every market is priced against (WETH on mainnet).
    pub reference: String,
    #[serde(default = "default_reference_decimals")]
    pub reference_decimals: u8,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DexConfig {
    pub name: String,
    pub factory_address: String,
    pub protocol: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArbitrageConfig {
    /// Minimum reference-asset reserve, in ether units, for a market to be considered.
    pub min_liquidity_eth: String,
    pub min_profit_eth: f64,
    #[serde(default = "default_fee_hops")]
    pub fee_hops: u32,
    #[serde(default = "default_lookup_concurrency")]
    pub lookup_concurrency: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub batch_size: u64,
    pub batch_count_limit: u64,
    pub start_index: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Empty means the in-memory store is used.
    #[serde(default)]
    pub url: String,
    pub max_connections: u32,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecutorConfig {
    pub bundle_executor_address: String,
    pub miner_reward_percentage: u32,
    #[serde(default = "default_target_block_offsets")]
    pub target_block_offsets: Vec<u64>,
    #[serde(default = "default_max_gas_estimate")]
    pub max_gas_estimate: u64,
    #[serde(default)]
    pub healthcheck_url: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: 1000,
            batch_count_limit: 100,
            start_index: 0,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reserve_batch_size() -> usize {
    1000
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_reference_decimals() -> u8 {
    18
}

fn default_fee_hops() -> u32 {
    2
}

fn default_lookup_concurrency() -> usize {
    16
}

fn default_connect_retries() -> u32 {
    5
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_target_block_offsets() -> Vec<u64> {
    vec![1, 2]
}

fn default_max_gas_estimate() -> u64 {
    1_400_000
}

fn default_queue_capacity() -> usize {
    16
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut settings = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::Environment::with_prefix("SEARCHER").separator("__"));

        // Override database URL from environment if present
        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            settings = settings.set_override("database.url", db_url)?;
        }

        // Override RPC URL from environment if present
        if let Ok(rpc_url) = std::env::var("ETHEREUM_RPC_URL") {
            settings = settings.set_override("blockchain.rpc_url", rpc_url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let raw = r#"{
            "blockchain": {
                "rpc_url": "http://127.0.0.1:8545",
                "chain_id": 1,
                "reserve_query_address": "0x5EF1009b9FCD4fec3094a5564047e190D72Bd511"
            },
            "tokens": { "reference": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2" },
            "dexes": {},
            "arbitrage": { "min_liquidity_eth": "3", "min_profit_eth": 0.001 },
            "database": { "max_connections": 5 },
            "executor": {
                "bundle_executor_address": "0xc35D77d25d81be78Ad60Ce14FEA7c92D438782E3",
                "miner_reward_percentage": 80
            }
        }"#;

        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.tokens.reference_decimals, 18);
        assert_eq!(config.arbitrage.fee_hops, 2);
        assert_eq!(config.executor.target_block_offsets, vec![1, 2]);
        assert_eq!(config.executor.max_gas_estimate, 1_400_000);
        assert!(!config.discovery.enabled);
        assert!(config.database.url.is_empty());
    }
}
