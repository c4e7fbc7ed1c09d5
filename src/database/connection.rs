use anyhow::{anyhow, Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::DatabaseConfig;

pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database: {}", mask_database_url(&config.url));

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.url)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        // Test the connection
        let connection = Self { pool };
        connection.health_check().await?;

        info!("Successfully connected to database");
        Ok(connection)
    }

    /// Retries `new` with exponential backoff, giving up after `connect_retries` attempts.
    pub async fn connect_with_retry(config: &DatabaseConfig) -> Result<Self> {
        let attempts = config.connect_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match Self::new(config).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    if attempt < attempts {
                        let delay = retry_delay(config.retry_delay_seconds, attempt);
                        warn!(
                            "Database connection unsuccessful (retry #{} after {:?}): {}",
                            attempt, delay, e
                        );
                        sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("Database connection failed")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let row = sqlx::query("SELECT 1 as test")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        let test_value: i32 = row.try_get("test")?;
        if test_value != 1 {
            return Err(anyhow!("Database health check returned unexpected value"));
        }

        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                address VARCHAR(42) PRIMARY KEY,
                symbol VARCHAR(64) NOT NULL,
                name VARCHAR(256) NOT NULL,
                decimals INTEGER NOT NULL DEFAULT 18,
                blacklisted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to create tokens table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uniswappy_v2_pairs (
                market_address VARCHAR(42) PRIMARY KEY,
                token0 VARCHAR(42) NOT NULL,
                token1 VARCHAR(42) NOT NULL,
                factory_address VARCHAR(42) NOT NULL,
                protocol VARCHAR(32) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to create uniswappy_v2_pairs table: {}", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_uniswappy_v2_pairs_tokens ON uniswappy_v2_pairs(token0, token1)")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to create pair tokens index: {}", e))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}

fn retry_delay(base_seconds: u64, attempt: u32) -> Duration {
    let factor = 1u64 << (attempt.saturating_sub(1)).min(6);
    Duration::from_secs(base_seconds.saturating_mul(factor))
}

fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "****");
            return masked;
        }
    }
    url.to_string()
}
