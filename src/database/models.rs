use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{
    blockchain::{format_address, parse_address},
    types::{PairRecord, TokenInfo},
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TokenRow {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: i32,
    pub blacklisted: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PairRow {
    pub market_address: String,
    pub token0: String,
    pub token1: String,
    pub factory_address: String,
    pub protocol: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&TokenInfo> for TokenRow {
    fn from(token: &TokenInfo) -> Self {
        Self {
            address: format_address(&token.address),
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            decimals: token.decimals as i32,
            blacklisted: token.blacklisted,
            created_at: None,
        }
    }
}

impl TryFrom<TokenRow> for TokenInfo {
    type Error = anyhow::Error;

    fn try_from(row: TokenRow) -> Result<Self> {
        let decimals = u8::try_from(row.decimals)
            .map_err(|_| anyhow!("Invalid decimals {} for token {}", row.decimals, row.address))?;

        Ok(Self {
            address: parse_address(&row.address)?,
            symbol: row.symbol,
            name: row.name,
            decimals,
            blacklisted: row.blacklisted,
        })
    }
}

impl From<&PairRecord> for PairRow {
    fn from(pair: &PairRecord) -> Self {
        Self {
            market_address: format_address(&pair.market_address),
            token0: format_address(&pair.token0),
            token1: format_address(&pair.token1),
            factory_address: format_address(&pair.factory_address),
            protocol: pair.protocol.clone(),
            created_at: None,
        }
    }
}

impl TryFrom<PairRow> for PairRecord {
    type Error = anyhow::Error;

    fn try_from(row: PairRow) -> Result<Self> {
        Ok(Self {
            market_address: parse_address(&row.market_address)?,
            token0: parse_address(&row.token0)?,
            token1: parse_address(&row.token1)?,
            factory_address: parse_address(&row.factory_address)?,
            protocol: row.protocol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    #[test]
    fn test_token_row_conversion() {
        let token = TokenInfo::new(Address::repeat_byte(0x11), "USDC", 6);
        let row = TokenRow::from(&token);
        assert_eq!(row.decimals, 6);
        assert_eq!(TokenInfo::try_from(row).unwrap(), token);
    }

    #[test]
    fn test_token_row_rejects_bad_decimals() {
        let mut row = TokenRow::from(&TokenInfo::new(Address::repeat_byte(0x11), "BAD", 18));
        row.decimals = 300;
        assert!(TokenInfo::try_from(row).is_err());
    }

    #[test]
    fn test_pair_row_rejects_bad_address() {
        let mut row = PairRow::from(&PairRecord {
            market_address: Address::repeat_byte(0xaa),
            token0: Address::repeat_byte(1),
            token1: Address::repeat_byte(2),
            factory_address: Address::repeat_byte(0xff),
            protocol: "uniswap_v2".to_string(),
        });
        row.token1 = "not-an-address".to_string();
        assert!(PairRecord::try_from(row).is_err());
    }
}
