use anyhow::{anyhow, Result};
use ethers::{
    types::{Address, U256},
    utils::parse_ether,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    arbitrage::{CrossingDetector, MarketGraph, Selector, TradeSolver},
    blockchain::{parse_address, ReserveSource},
    config::Config,
    database::TokenCache,
    dex::{uniswap_v2, SnapshotStore},
    error::ArbitrageError,
    types::{OpportunityBatch, TokenInfo},
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub reference: Address,
    pub reference_decimals: u8,
    pub min_liquidity: U256,
    pub min_profit: f64,
    pub fee_hops: u32,
    pub blacklist: HashSet<Address>,
    pub lookup_concurrency: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let reference = parse_address(&config.tokens.reference)?;
        let min_liquidity = parse_ether(config.arbitrage.min_liquidity_eth.as_str())
            .map_err(|e| anyhow!("Invalid min_liquidity_eth: {}", e))?;

        if !config.arbitrage.min_profit_eth.is_finite() || config.arbitrage.min_profit_eth < 0.0 {
            return Err(anyhow!("Invalid min_profit_eth: {}", config.arbitrage.min_profit_eth));
        }

        let blacklist = config
            .tokens
            .blacklist
            .iter()
            .map(|address| parse_address(address))
            .collect::<Result<HashSet<_>>>()?;

        Ok(Self {
            reference,
            reference_decimals: config.tokens.reference_decimals,
            min_liquidity,
            min_profit: config.arbitrage.min_profit_eth,
            fee_hops: config.arbitrage.fee_hops,
            blacklist,
            lookup_concurrency: config.arbitrage.lookup_concurrency,
        })
    }
}

/// Snapshot, graph, detection, solving and ranking for one block.
pub struct BlockPipeline {
    reserve_source: Arc<dyn ReserveSource>,
    token_cache: Arc<TokenCache>,
    snapshots: Arc<SnapshotStore>,
    selector: Arc<Selector>,
    settings: PipelineSettings,
}

impl BlockPipeline {
    pub fn new(
        reserve_source: Arc<dyn ReserveSource>,
        token_cache: Arc<TokenCache>,
        snapshots: Arc<SnapshotStore>,
        settings: PipelineSettings,
    ) -> Self {
        let selector = Selector::new(
            CrossingDetector::new(
                settings.reference,
                settings.reference_decimals,
                uniswap_v2::FEE_RETENTION,
                settings.fee_hops,
            ),
            TradeSolver::new(settings.reference, settings.reference_decimals, settings.min_profit),
        );

        Self {
            reserve_source,
            token_cache,
            snapshots,
            selector: Arc::new(selector),
            settings,
        }
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub async fn run(&self, block_number: u64, cancel: CancellationToken) -> Result<OpportunityBatch> {
        let snapshot = self
            .snapshots
            .refresh(self.reserve_source.as_ref(), block_number)
            .await?;
        if cancel.is_cancelled() {
            return Err(ArbitrageError::Cancelled.into());
        }

        let paired: Vec<Address> = snapshot
            .markets()
            .iter()
            .filter_map(|market| market.paired_token(self.settings.reference))
            .collect();
        let tokens = self.resolve_tokens(&paired).await;

        let mut blacklist = self.settings.blacklist.clone();
        blacklist.extend(tokens.values().filter(|t| t.blacklisted).map(|t| t.address));

        let graph = MarketGraph::build(
            snapshot.markets(),
            self.settings.reference,
            self.settings.min_liquidity,
            &blacklist,
        );
        debug!(
            "Block {}: {} tokens, {} crossable",
            block_number,
            graph.len(),
            graph.crossable_tokens()
        );

        let selector = self.selector.clone();
        let evaluation_cancel = cancel.clone();
        let opportunities = tokio::task::spawn_blocking(move || selector.evaluate(&graph, &tokens, &evaluation_cancel))
            .await
            .map_err(|e| anyhow!("Evaluation task failed: {}", e))??;

        Ok(OpportunityBatch::new(block_number, opportunities, snapshot))
    }

    /// Registry metadata for every non-blacklisted token, skipping tokens the
    /// registry does not know or could not answer for.
    async fn resolve_tokens(&self, addresses: &[Address]) -> HashMap<Address, TokenInfo> {
        let mut unique = HashSet::new();
        let wanted: Vec<Address> = addresses
            .iter()
            .copied()
            .filter(|address| !self.settings.blacklist.contains(address) && unique.insert(*address))
            .collect();

        let mut tokens = HashMap::with_capacity(wanted.len());
        let mut unknown = 0usize;

        for (address, outcome) in self
            .token_cache
            .resolve_many(&wanted, self.settings.lookup_concurrency)
            .await
        {
            match outcome {
                Ok(Some(token)) => {
                    tokens.insert(address, token);
                }
                Ok(None) => {
                    unknown += 1;
                    debug!("{}", ArbitrageError::UnknownToken(address));
                }
                Err(e) => warn!("Token lookup failed for {:?}: {}", address, e),
            }
        }

        if unknown > 0 {
            info!("{} tokens are not registered and were skipped", unknown);
        }

        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::InMemoryRepository,
        dex::{Market, ReserveSnapshot, UniswapV2Pair},
    };
    use async_trait::async_trait;

    struct FixedReserves(Vec<(U256, U256)>);

    #[async_trait]
    impl ReserveSource for FixedReserves {
        async fn fetch_reserves(&self, _markets: &[Address], _block: Option<u64>) -> Result<Vec<(U256, U256)>> {
            Ok(self.0.clone())
        }
    }

    fn weth() -> Address {
        Address::repeat_byte(0xee)
    }

    fn ether(amount: u64) -> U256 {
        U256::from(amount) * U256::exp10(18)
    }

    fn create_test_settings() -> PipelineSettings {
        PipelineSettings {
            reference: weth(),
            reference_decimals: 18,
            min_liquidity: ether(3),
            min_profit: 0.001,
            fee_hops: 2,
            blacklist: HashSet::new(),
            lookup_concurrency: 4,
        }
    }

    fn create_test_pipeline(tokens: Vec<TokenInfo>, reserves: Vec<(U256, U256)>) -> BlockPipeline {
        let token = Address::repeat_byte(1);
        let markets: Vec<Arc<dyn Market>> = vec![
            Arc::new(UniswapV2Pair::new(Address::repeat_byte(0xa), weth(), token)),
            Arc::new(UniswapV2Pair::new(Address::repeat_byte(0xb), token, weth())),
        ];
        let repository = Arc::new(InMemoryRepository::with_data(tokens, vec![]));

        BlockPipeline::new(
            Arc::new(FixedReserves(reserves)),
            Arc::new(TokenCache::new(repository)),
            Arc::new(SnapshotStore::new(ReserveSnapshot::new(0, markets))),
            create_test_settings(),
        )
    }

    fn scenario_reserves() -> Vec<(U256, U256)> {
        vec![(ether(100), ether(10_000)), (ether(10_500), ether(90))]
    }

    #[tokio::test]
    async fn test_run_finds_crossed_market() {
        let token = TokenInfo::new(Address::repeat_byte(1), "TKN", 18);
        let pipeline = create_test_pipeline(vec![token], scenario_reserves());

        let batch = pipeline.run(42, CancellationToken::new()).await.unwrap();

        assert_eq!(batch.block_number, 42);
        assert_eq!(batch.snapshot.block_number(), 42);
        assert_eq!(batch.opportunities.len(), 1);
        assert_eq!(batch.opportunities[0].buy_from_market, Address::repeat_byte(0xb));
        assert!((batch.best_profit().unwrap() - 0.265).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_unregistered_token_yields_empty_batch() {
        let pipeline = create_test_pipeline(vec![], scenario_reserves());

        let batch = pipeline.run(42, CancellationToken::new()).await.unwrap();
        assert!(batch.opportunities.is_empty());
    }

    #[tokio::test]
    async fn test_registry_blacklist_is_applied() {
        let token = TokenInfo::blacklisted(Address::repeat_byte(1));
        let pipeline = create_test_pipeline(vec![token], scenario_reserves());

        let batch = pipeline.run(42, CancellationToken::new()).await.unwrap();
        assert!(batch.opportunities.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_fails() {
        let token = TokenInfo::new(Address::repeat_byte(1), "TKN", 18);
        let pipeline = create_test_pipeline(vec![token], scenario_reserves());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = pipeline.run(42, cancel).await.unwrap_err();
        assert_eq!(error.downcast_ref::<ArbitrageError>(), Some(&ArbitrageError::Cancelled));
    }

    #[test]
    fn test_settings_reject_bad_liquidity() {
        let mut config: Config = serde_json::from_value(serde_json::json!({
            "blockchain": {"rpc_url": "http://127.0.0.1:8545", "chain_id": 1, "reserve_query_address": "0x5EF1009b9FCD4fec3094a5564047e190D72Bd511"},
            "tokens": {"reference": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"},
            "dexes": {},
            "arbitrage": {"min_liquidity_eth": "3", "min_profit_eth": 0.001},
            "database": {"max_connections": 1},
            "executor": {"bundle_executor_address": "0x0000000000000000000000000000000000000001", "miner_reward_percentage": 80}
        }))
        .unwrap();
        assert_eq!(PipelineSettings::from_config(&config).unwrap().min_liquidity, ether(3));

        config.arbitrage.min_liquidity_eth = "three".to_string();
        assert!(PipelineSettings::from_config(&config).is_err());
    }
}
