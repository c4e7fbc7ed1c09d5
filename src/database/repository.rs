use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::Address;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::{
    blockchain::format_address,
    database::{
        models::{PairRow, TokenRow},
        traits::{MarketRepository, TokenRepository},
    },
    types::{PairRecord, TokenInfo},
};

pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn get_token(&self, address: Address) -> Result<Option<TokenInfo>> {
        let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE address = $1")
            .bind(format_address(&address))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to fetch token: {}", e))?;

        row.map(TokenInfo::try_from).transpose()
    }

    async fn add_token(&self, token: &TokenInfo) -> Result<()> {
        let row = TokenRow::from(token);

        sqlx::query(
            r#"
            INSERT INTO tokens (address, symbol, name, decimals, blacklisted)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (address) DO UPDATE
            SET symbol = EXCLUDED.symbol,
                name = EXCLUDED.name,
                decimals = EXCLUDED.decimals,
                blacklisted = EXCLUDED.blacklisted
            "#,
        )
        .bind(&row.address)
        .bind(&row.symbol)
        .bind(&row.name)
        .bind(row.decimals)
        .bind(row.blacklisted)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to save token: {}", e))?;

        debug!("Saved token {} ({})", row.symbol, row.address);
        Ok(())
    }

    async fn set_blacklisted(&self, address: Address, blacklisted: bool) -> Result<()> {
        let result = sqlx::query("UPDATE tokens SET blacklisted = $2 WHERE address = $1")
            .bind(format_address(&address))
            .bind(blacklisted)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to update token blacklist flag: {}", e))?;

        if result.rows_affected() == 0 {
            warn!("Blacklist flag not updated, token {:?} is not registered", address);
        }
        Ok(())
    }
}

pub struct PgMarketRepository {
    pool: PgPool,
}

impl PgMarketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketRepository for PgMarketRepository {
    async fn get_pair(&self, market_address: Address) -> Result<Option<PairRecord>> {
        let row = sqlx::query_as::<_, PairRow>("SELECT * FROM uniswappy_v2_pairs WHERE market_address = $1")
            .bind(format_address(&market_address))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to fetch pair: {}", e))?;

        row.map(PairRecord::try_from).transpose()
    }

    async fn add_pair(&self, pair: &PairRecord) -> Result<()> {
        let row = PairRow::from(pair);

        sqlx::query(
            r#"
            INSERT INTO uniswappy_v2_pairs (market_address, token0, token1, factory_address, protocol)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (market_address) DO NOTHING
            "#,
        )
        .bind(&row.market_address)
        .bind(&row.token0)
        .bind(&row.token1)
        .bind(&row.factory_address)
        .bind(&row.protocol)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to save pair: {}", e))?;

        debug!("Pair added: {}", row.market_address);
        Ok(())
    }

    async fn delete_pair(&self, market_address: Address) -> Result<bool> {
        let result = sqlx::query("DELETE FROM uniswappy_v2_pairs WHERE market_address = $1")
            .bind(format_address(&market_address))
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to delete pair: {}", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_pairs(&self) -> Result<Vec<PairRecord>> {
        let rows = sqlx::query_as::<_, PairRow>("SELECT * FROM uniswappy_v2_pairs ORDER BY created_at, market_address")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to list pairs: {}", e))?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows {
            match PairRecord::try_from(row) {
                Ok(pair) => pairs.push(pair),
                Err(e) => warn!("Skipping malformed pair row: {}", e),
            }
        }
        Ok(pairs)
    }
}
