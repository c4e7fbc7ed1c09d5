use anyhow::Result;
use dashmap::DashMap;
use ethers::types::Address;
use futures::{stream, StreamExt};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::debug;

use crate::{database::traits::TokenRepository, types::TokenInfo};

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Read-through token metadata cache in front of the token registry.
///
/// Only registered tokens are cached; an unknown address is asked again on
/// the next lookup since discovery may register it in the meantime.
pub struct TokenCache {
    repository: Arc<dyn TokenRepository>,
    tokens: DashMap<Address, TokenInfo>,
    pub stats: CacheStats,
}

impl TokenCache {
    pub fn new(repository: Arc<dyn TokenRepository>) -> Self {
        Self {
            repository,
            tokens: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub async fn get(&self, address: Address) -> Result<Option<TokenInfo>> {
        if let Some(token) = self.tokens.get(&address) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(token.clone()));
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let token = self.repository.get_token(address).await?;
        if let Some(ref token) = token {
            self.tokens.insert(address, token.clone());
        }
        Ok(token)
    }

    /// Looks up many tokens with at most `concurrency` registry calls in
    /// flight, reporting one outcome per address.
    pub async fn resolve_many(
        &self,
        addresses: &[Address],
        concurrency: usize,
    ) -> Vec<(Address, Result<Option<TokenInfo>>)> {
        let outcomes: Vec<_> = stream::iter(addresses.iter().copied())
            .map(|address| async move { (address, self.get(address).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        debug!(
            "Resolved {} tokens (cache hit rate {:.1}%)",
            outcomes.len(),
            self.stats.hit_rate() * 100.0
        );

        outcomes
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
