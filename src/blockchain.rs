use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    abi::Abi,
    contract::Contract,
    providers::{Http, Middleware, Provider},
    types::{Address, BlockId, BlockNumber, U256},
};
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{config::Config, types::TokenInfo};

/// Batch read of pool reserves, ordered like the requested market ids.
#[async_trait]
pub trait ReserveSource: Send + Sync {
    async fn fetch_reserves(&self, markets: &[Address], block: Option<u64>) -> Result<Vec<(U256, U256)>>;
}

/// Factory enumeration, each entry being `[token0, token1, pair]`.
#[async_trait]
pub trait PairSource: Send + Sync {
    async fn pairs_by_index_range(&self, factory: Address, start: u64, stop: u64) -> Result<Vec<[Address; 3]>>;
}

#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    async fn fetch_token(&self, address: Address) -> Result<TokenInfo>;
}

pub struct BlockchainClient {
    provider: Arc<Provider<Http>>,
}

impl BlockchainClient {
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Connecting to Ethereum RPC: {}", config.blockchain.rpc_url);

        let provider = Provider::<Http>::try_from(config.blockchain.rpc_url.as_str())
            .map_err(|e| anyhow!("Failed to create provider: {}", e))?;

        let provider = Arc::new(provider);

        // Verify connection by getting chain ID
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| anyhow!("Failed to get chain ID: {}", e))?;

        if chain_id.as_u64() != config.blockchain.chain_id {
            return Err(anyhow!(
                "Chain ID mismatch: expected {}, got {}",
                config.blockchain.chain_id,
                chain_id.as_u64()
            ));
        }

        info!("Successfully connected to Ethereum network (Chain ID: {})", chain_id);

        Ok(Self { provider })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    pub async fn get_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| anyhow!("Failed to get block number: {}", e))
    }

    pub async fn health_check(&self) -> Result<()> {
        debug!("Performing blockchain health check");

        let block_number = self.get_block_number().await?;
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| anyhow!("Failed to get gas price: {}", e))?;

        debug!(
            "Health check passed - Block: {}, Gas Price: {} wei",
            block_number,
            gas_price
        );

        Ok(())
    }
}

#[async_trait]
impl TokenMetadataSource for BlockchainClient {
    async fn fetch_token(&self, address: Address) -> Result<TokenInfo> {
        let token_abi: Abi = serde_json::from_str(
            r#"
        [
            {"inputs": [], "name": "name", "outputs": [{"internalType": "string", "name": "", "type": "string"}], "stateMutability": "view", "type": "function"},
            {"inputs": [], "name": "symbol", "outputs": [{"internalType": "string", "name": "", "type": "string"}], "stateMutability": "view", "type": "function"},
            {"inputs": [], "name": "decimals", "outputs": [{"internalType": "uint8", "name": "", "type": "uint8"}], "stateMutability": "view", "type": "function"}
        ]
        "#,
        )?;
        let contract = Contract::new(address, token_abi, self.provider.clone());

        let name: String = contract
            .method::<_, String>("name", ())?
            .call()
            .await
            .map_err(|e| anyhow!("name() failed for {:?}: {}", address, e))?;
        let symbol: String = contract
            .method::<_, String>("symbol", ())?
            .call()
            .await
            .map_err(|e| anyhow!("symbol() failed for {:?}: {}", address, e))?;
        let decimals: u8 = contract
            .method::<_, u8>("decimals", ())?
            .call()
            .await
            .map_err(|e| anyhow!("decimals() failed for {:?}: {}", address, e))?;

        Ok(TokenInfo {
            address,
            symbol,
            name,
            decimals,
            blacklisted: false,
        })
    }
}

/// Client of the on-chain lookup contract that batches pair enumeration and
/// reserve reads into single calls.
pub struct FlashQueryClient {
    query_contract: Contract<Provider<Http>>,
    batch_size: usize,
    max_concurrent_requests: usize,
}

impl FlashQueryClient {
    pub fn new(blockchain_client: &BlockchainClient, config: &Config) -> Result<Self> {
        let query_address = parse_address(&config.blockchain.reserve_query_address)?;

        let query_abi: Abi = serde_json::from_str(
            r#"
        [
            {
                "inputs": [
                    {"internalType": "contract IUniswapV2Factory", "name": "_uniswapFactory", "type": "address"},
                    {"internalType": "uint256", "name": "_start", "type": "uint256"},
                    {"internalType": "uint256", "name": "_stop", "type": "uint256"}
                ],
                "name": "getPairsByIndexRange",
                "outputs": [{"internalType": "address[3][]", "name": "", "type": "address[3][]"}],
                "stateMutability": "view",
                "type": "function"
            },
            {
                "inputs": [
                    {"internalType": "contract IUniswapV2Pair[]", "name": "_pairs", "type": "address[]"}
                ],
                "name": "getReservesByPairs",
                "outputs": [{"internalType": "uint256[3][]", "name": "", "type": "uint256[3][]"}],
                "stateMutability": "view",
                "type": "function"
            }
        ]
        "#,
        )?;

        let query_contract = Contract::new(query_address, query_abi, blockchain_client.provider());

        Ok(Self {
            query_contract,
            batch_size: config.blockchain.reserve_batch_size.max(1),
            max_concurrent_requests: config.blockchain.max_concurrent_requests.max(1),
        })
    }

    async fn fetch_reserve_chunk(&self, pairs: Vec<Address>, block: Option<u64>) -> Result<Vec<(U256, U256)>> {
        let expected = pairs.len();
        let mut call = self
            .query_contract
            .method::<_, Vec<Vec<U256>>>("getReservesByPairs", pairs)?;
        if let Some(block) = block {
            call = call.block(BlockId::Number(BlockNumber::Number(block.into())));
        }

        let rows = call
            .call()
            .await
            .map_err(|e| anyhow!("getReservesByPairs failed: {}", e))?;

        if rows.len() != expected {
            return Err(anyhow!("Expected {} reserve rows, got {}", expected, rows.len()));
        }

        rows.into_iter()
            .map(|row| match row.as_slice() {
                [reserve0, reserve1, ..] => Ok((*reserve0, *reserve1)),
                _ => Err(anyhow!("Malformed reserve row")),
            })
            .collect()
    }
}

#[async_trait]
impl ReserveSource for FlashQueryClient {
    async fn fetch_reserves(&self, markets: &[Address], block: Option<u64>) -> Result<Vec<(U256, U256)>> {
        // `buffered` keeps chunk order, so rows line up with `markets`
        let requests: Vec<Vec<Address>> = markets.chunks(self.batch_size).map(<[Address]>::to_vec).collect();
        let chunks: Vec<Vec<(U256, U256)>> = stream::iter(requests)
            .map(|chunk| self.fetch_reserve_chunk(chunk, block))
            .buffered(self.max_concurrent_requests)
            .try_collect()
            .await?;

        Ok(chunks.into_iter().flatten().collect())
    }
}

#[async_trait]
impl PairSource for FlashQueryClient {
    async fn pairs_by_index_range(&self, factory: Address, start: u64, stop: u64) -> Result<Vec<[Address; 3]>> {
        let rows = self
            .query_contract
            .method::<_, Vec<Vec<Address>>>(
                "getPairsByIndexRange",
                (factory, U256::from(start), U256::from(stop)),
            )?
            .call()
            .await
            .map_err(|e| anyhow!("getPairsByIndexRange failed: {}", e))?;

        rows.into_iter()
            .map(|row| match row.as_slice() {
                [token0, token1, pair] => Ok([*token0, *token1, *pair]),
                _ => Err(anyhow!("Malformed pair row")),
            })
            .collect()
    }
}

// Utility functions for address parsing and validation
pub fn parse_address(address_str: &str) -> Result<Address> {
    address_str
        .parse::<Address>()
        .map_err(|e| anyhow!("Invalid address format '{}': {}", address_str, e))
}

pub fn format_address(address: &Address) -> String {
    format!("{:?}", address)
}

// Lossy conversion, only for display
pub fn u256_to_f64(value: U256) -> f64 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);

    let mut result = 0.0f64;
    for (i, &byte) in bytes.iter().enumerate() {
        result += (byte as f64) * 256.0f64.powi(31 - i as i32);
    }
    result
}

pub fn wei_to_ether(wei: U256) -> f64 {
    u256_to_f64(wei) / 1e18
}
