use anyhow::Result;
use ethers::types::Address;
use futures::{stream, StreamExt};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    blockchain::{parse_address, PairSource, TokenMetadataSource},
    config::{DexConfig, DiscoveryConfig},
    database::{MarketRepository, TokenRepository},
    types::{PairRecord, TokenInfo},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairOutcome {
    Added,
    AlreadyStored,
    Removed,
    Blacklisted,
    NoReference,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub pairs_seen: u64,
    pub pairs_added: u64,
    pub pairs_already_stored: u64,
    pub pairs_removed: u64,
    pub pairs_blacklisted: u64,
    pub pairs_without_reference: u64,
    pub pair_failures: u64,
}

impl DiscoveryStats {
    fn record(&mut self, outcome: &Result<PairOutcome>) {
        self.pairs_seen += 1;
        match outcome {
            Ok(PairOutcome::Added) => self.pairs_added += 1,
            Ok(PairOutcome::AlreadyStored) => self.pairs_already_stored += 1,
            Ok(PairOutcome::Removed) => self.pairs_removed += 1,
            Ok(PairOutcome::Blacklisted) => self.pairs_blacklisted += 1,
            Ok(PairOutcome::NoReference) => self.pairs_without_reference += 1,
            Err(_) => self.pair_failures += 1,
        }
    }

    fn merge(&mut self, other: &DiscoveryStats) {
        self.pages_fetched += other.pages_fetched;
        self.pages_failed += other.pages_failed;
        self.pairs_seen += other.pairs_seen;
        self.pairs_added += other.pairs_added;
        self.pairs_already_stored += other.pairs_already_stored;
        self.pairs_removed += other.pairs_removed;
        self.pairs_blacklisted += other.pairs_blacklisted;
        self.pairs_without_reference += other.pairs_without_reference;
        self.pair_failures += other.pair_failures;
    }
}

/// Enumerates factory pairs against the reference asset and keeps the
/// market and token registries in sync with them.
pub struct PoolDiscovery {
    pair_source: Arc<dyn PairSource>,
    metadata_source: Arc<dyn TokenMetadataSource>,
    tokens: Arc<dyn TokenRepository>,
    markets: Arc<dyn MarketRepository>,
    reference: Address,
    blacklist: HashSet<Address>,
    settings: DiscoveryConfig,
    concurrency: usize,
}

impl PoolDiscovery {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pair_source: Arc<dyn PairSource>,
        metadata_source: Arc<dyn TokenMetadataSource>,
        tokens: Arc<dyn TokenRepository>,
        markets: Arc<dyn MarketRepository>,
        reference: Address,
        blacklist: HashSet<Address>,
        settings: DiscoveryConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            pair_source,
            metadata_source,
            tokens,
            markets,
            reference,
            blacklist,
            settings,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run<'a>(&self, dexes: impl IntoIterator<Item = &'a DexConfig>) -> Result<DiscoveryStats> {
        let mut total = DiscoveryStats::default();

        for dex in dexes {
            let factory = parse_address(&dex.factory_address)?;
            info!("Discovering {} pairs from factory {:?}", dex.name, factory);

            let stats = self.discover_factory(factory, &dex.protocol).await;
            info!(
                "{}: {} pairs seen, {} added, {} removed, {} failures",
                dex.name, stats.pairs_seen, stats.pairs_added, stats.pairs_removed, stats.pair_failures
            );
            total.merge(&stats);
        }

        Ok(total)
    }

    pub async fn discover_factory(&self, factory: Address, protocol: &str) -> DiscoveryStats {
        let mut stats = DiscoveryStats::default();
        let batch_size = self.settings.batch_size.max(1);
        let end = self.settings.batch_count_limit.saturating_mul(batch_size);

        let mut start = self.settings.start_index;
        while start < end {
            let stop = start + batch_size;

            let page = match self.pair_source.pairs_by_index_range(factory, start, stop).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Pair page {}..{} of {:?} failed: {}", start, stop, factory, e);
                    stats.pages_failed += 1;
                    start = stop;
                    continue;
                }
            };
            stats.pages_fetched += 1;
            debug!("{:?} - batch {}..{}: {} pairs", factory, start, stop, page.len());

            let page_len = page.len() as u64;
            let outcomes: Vec<([Address; 3], Result<PairOutcome>)> = stream::iter(page)
                .map(|entry| async move { (entry, self.process_pair(entry, factory, protocol).await) })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (entry, outcome) in &outcomes {
                if let Err(e) = outcome {
                    warn!("Failed to process pair {:?}: {}", entry[2], e);
                }
                stats.record(outcome);
            }

            if page_len < batch_size {
                break;
            }
            start = stop;
        }

        stats
    }

    async fn process_pair(&self, entry: [Address; 3], factory: Address, protocol: &str) -> Result<PairOutcome> {
        let [token0, token1, market_address] = entry;

        let token = if token0 == self.reference {
            token1
        } else if token1 == self.reference {
            token0
        } else {
            return Ok(PairOutcome::NoReference);
        };

        let blacklisted = if self.blacklist.contains(&token) {
            true
        } else {
            self.ensure_token(token).await?.blacklisted
        };

        if blacklisted {
            if self.markets.delete_pair(market_address).await? {
                info!("Removed stored pair {:?} with blacklisted token {:?}", market_address, token);
                return Ok(PairOutcome::Removed);
            }
            return Ok(PairOutcome::Blacklisted);
        }

        if self.markets.get_pair(market_address).await?.is_some() {
            return Ok(PairOutcome::AlreadyStored);
        }

        self.markets
            .add_pair(&PairRecord {
                market_address,
                token0,
                token1,
                factory_address: factory,
                protocol: protocol.to_string(),
            })
            .await?;
        Ok(PairOutcome::Added)
    }

    /// Registered token, registering it first when it was never seen. A token
    /// whose ERC20 metadata cannot be read is registered as blacklisted.
    async fn ensure_token(&self, address: Address) -> Result<TokenInfo> {
        if let Some(token) = self.tokens.get_token(address).await? {
            return Ok(token);
        }

        let token = match self.metadata_source.fetch_token(address).await {
            Ok(token) => token,
            Err(e) => {
                debug!("Blacklisting token {:?}: {}", address, e);
                TokenInfo::blacklisted(address)
            }
        };

        self.tokens.add_token(&token).await?;
        Ok(token)
    }
}
