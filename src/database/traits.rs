use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;

use crate::types::{PairRecord, TokenInfo};

/// Token registry port. `get_token` returns `Ok(None)` for addresses never registered.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn get_token(&self, address: Address) -> Result<Option<TokenInfo>>;

    async fn add_token(&self, token: &TokenInfo) -> Result<()>;

    async fn set_blacklisted(&self, address: Address, blacklisted: bool) -> Result<()>;
}

#[async_trait]
pub trait MarketRepository: Send + Sync {
    async fn get_pair(&self, market_address: Address) -> Result<Option<PairRecord>>;

    async fn add_pair(&self, pair: &PairRecord) -> Result<()>;

    async fn delete_pair(&self, market_address: Address) -> Result<bool>;

    async fn list_pairs(&self) -> Result<Vec<PairRecord>>;
}
