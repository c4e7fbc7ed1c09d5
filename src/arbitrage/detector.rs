use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::{dex::Market, error::ArbitrageError, types::TokenInfo};

/// Ordered market pair whose prices diverge by more than the round-trip fees.
#[derive(Debug, Clone)]
pub struct CandidatePair {
    /// Market where the token is cheaper.
    pub buy_from: Arc<dyn Market>,
    pub sell_to: Arc<dyn Market>,
    pub arb_index: f64,
}

pub struct CrossingDetector {
    reference: Address,
    reference_decimals: u8,
    threshold: f64,
}

impl CrossingDetector {
    /// `fee_retention` is the per-swap γ, `hops` the number of swaps in the round trip.
    pub fn new(reference: Address, reference_decimals: u8, fee_retention: f64, hops: u32) -> Self {
        let threshold = (1.0 / fee_retention).powi(hops as i32);

        Self {
            reference,
            reference_decimals,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Reference ratio of every market that can be priced; the others are logged and left out.
    pub fn price_markets(&self, token: &TokenInfo, markets: &[Arc<dyn Market>]) -> Vec<(Arc<dyn Market>, f64)> {
        let mut priced = Vec::with_capacity(markets.len());

        for market in markets {
            match market.reference_ratio(self.reference, self.reference_decimals, token.decimals) {
                Ok(ratio) => priced.push((market.clone(), ratio)),
                Err(e @ ArbitrageError::ZeroReserves(_)) => {
                    trace!("Skipping market for {}: {}", token.symbol, e);
                }
                Err(e) => {
                    warn!(
                        "Cannot price market {:?} for token {} ({:?}): {}",
                        market.address(),
                        token.symbol,
                        token.address,
                        e
                    );
                }
            }
        }

        priced
    }

    pub fn detect(&self, token: &TokenInfo, markets: &[Arc<dyn Market>]) -> Vec<CandidatePair> {
        if markets.len() < 2 {
            return Vec::new();
        }

        let priced = self.price_markets(token, markets);
        let mut candidates = Vec::new();

        // Every ordered pair; at most one direction of a pair can clear a threshold above 1
        for (i, (sell_to, sell_ratio)) in priced.iter().enumerate() {
            for (j, (buy_from, buy_ratio)) in priced.iter().enumerate() {
                if i == j {
                    continue;
                }

                let arb_index = sell_ratio / buy_ratio;
                if arb_index > self.threshold {
                    candidates.push(CandidatePair {
                        buy_from: buy_from.clone(),
                        sell_to: sell_to.clone(),
                        arb_index,
                    });
                }
            }
        }

        if !candidates.is_empty() {
            debug!(
                "Token {} has {} crossed pairs across {} markets",
                token.symbol,
                candidates.len(),
                priced.len()
            );
        }

        candidates
    }
}
