use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{
    database::traits::{MarketRepository, TokenRepository},
    types::{PairRecord, TokenInfo},
};

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct InMemoryRepository {
    tokens: RwLock<HashMap<Address, TokenInfo>>,
    pairs: RwLock<Vec<PairRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_data(tokens: Vec<TokenInfo>, pairs: Vec<PairRecord>) -> Self {
        Self {
            tokens: RwLock::new(tokens.into_iter().map(|t| (t.address, t)).collect()),
            pairs: RwLock::new(pairs),
        }
    }

    #[cfg(test)]
    pub async fn token_count(&self) -> usize {
        self.tokens.read().await.len()
    }
}

#[async_trait]
impl TokenRepository for InMemoryRepository {
    async fn get_token(&self, address: Address) -> Result<Option<TokenInfo>> {
        Ok(self.tokens.read().await.get(&address).cloned())
    }

    async fn add_token(&self, token: &TokenInfo) -> Result<()> {
        self.tokens.write().await.insert(token.address, token.clone());
        Ok(())
    }

    async fn set_blacklisted(&self, address: Address, blacklisted: bool) -> Result<()> {
        if let Some(token) = self.tokens.write().await.get_mut(&address) {
            token.blacklisted = blacklisted;
        }
        Ok(())
    }
}

#[async_trait]
impl MarketRepository for InMemoryRepository {
    async fn get_pair(&self, market_address: Address) -> Result<Option<PairRecord>> {
        Ok(self
            .pairs
            .read()
            .await
            .iter()
            .find(|p| p.market_address == market_address)
            .cloned())
    }

    async fn add_pair(&self, pair: &PairRecord) -> Result<()> {
        let mut pairs = self.pairs.write().await;
        if !pairs.iter().any(|p| p.market_address == pair.market_address) {
            pairs.push(pair.clone());
        }
        Ok(())
    }

    async fn delete_pair(&self, market_address: Address) -> Result<bool> {
        let mut pairs = self.pairs.write().await;
        let before = pairs.len();
        pairs.retain(|p| p.market_address != market_address);
        Ok(pairs.len() != before)
    }

    async fn list_pairs(&self) -> Result<Vec<PairRecord>> {
        Ok(self.pairs.read().await.clone())
    }
}
