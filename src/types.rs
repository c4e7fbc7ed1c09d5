use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use ethers::utils::{parse_units, ParseUnits};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dex::ReserveSnapshot;

pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub blacklisted: bool,
}

impl TokenInfo {
    pub fn new(address: Address, symbol: &str, decimals: u8) -> Self {
        Self {
            address,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals,
            blacklisted: false,
        }
    }

    /// Placeholder record for tokens that do not implement the ERC20 metadata calls.
    pub fn blacklisted(address: Address) -> Self {
        Self {
            address,
            symbol: "---".to_string(),
            name: "- xxx -".to_string(),
            decimals: DEFAULT_TOKEN_DECIMALS,
            blacklisted: true,
        }
    }
}

/// A pool as stored by discovery, before any reserves are known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRecord {
    pub market_address: Address,
    pub token0: Address,
    pub token1: Address,
    pub factory_address: Address,
    pub protocol: String,
}

/// Best two-hop trade found for one token in one block.
///
/// Amounts are decimal-normalized reference-asset (or token) units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossedMarketOpportunity {
    pub token: Address,
    pub buy_from_market: Address,
    pub sell_to_market: Address,
    pub volume: f64,
    pub intermediate_amount: f64,
    pub output: f64,
    pub profit: f64,
}

impl CrossedMarketOpportunity {
    /// Trade volume in base units of a reference asset with `decimals` decimals.
    pub fn volume_wei(&self, decimals: u8) -> anyhow::Result<U256> {
        to_base_units(self.volume, decimals, "trade volume")
    }

    pub fn profit_wei(&self, decimals: u8) -> anyhow::Result<U256> {
        to_base_units(self.profit, decimals, "profit")
    }
}

fn to_base_units(amount: f64, decimals: u8, what: &str) -> anyhow::Result<U256> {
    match parse_units(format!("{:.*}", decimals as usize, amount), decimals as u32) {
        Ok(ParseUnits::U256(value)) => Ok(value),
        Ok(ParseUnits::I256(_)) => Err(anyhow::anyhow!("Negative {} {}", what, amount)),
        Err(e) => Err(anyhow::anyhow!("Invalid {} {}: {}", what, amount, e)),
    }
}

/// Ranked result of one block pass, handed to the executor.
#[derive(Debug, Clone)]
pub struct OpportunityBatch {
    pub block_number: u64,
    pub evaluated_at: DateTime<Utc>,
    pub opportunities: Vec<CrossedMarketOpportunity>,
    pub snapshot: Arc<ReserveSnapshot>,
}

impl OpportunityBatch {
    pub fn new(
        block_number: u64,
        opportunities: Vec<CrossedMarketOpportunity>,
        snapshot: Arc<ReserveSnapshot>,
    ) -> Self {
        Self {
            block_number,
            evaluated_at: Utc::now(),
            opportunities,
            snapshot,
        }
    }

    pub fn best_profit(&self) -> Option<f64> {
        self.opportunities.first().map(|opp| opp.profit)
    }
}
