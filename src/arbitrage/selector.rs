use ethers::types::Address;
use rayon::prelude::*;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    arbitrage::{
        calculator::TradeSolver,
        detector::CrossingDetector,
        graph::{MarketGraph, TokenMarkets},
    },
    error::ArbitrageError,
    types::{CrossedMarketOpportunity, TokenInfo},
};

/// One evaluation pass over a market graph: best trade per token, ranked by profit.
pub struct Selector {
    detector: CrossingDetector,
    solver: TradeSolver,
}

impl Selector {
    pub fn new(detector: CrossingDetector, solver: TradeSolver) -> Self {
        Self { detector, solver }
    }

    pub fn min_profit(&self) -> f64 {
        self.solver.min_profit()
    }

    /// Tokens are evaluated in parallel; a fault in one token never affects
    /// the others. Fails only when `cancel` fires during the pass.
    pub fn evaluate(
        &self,
        graph: &MarketGraph,
        tokens: &HashMap<Address, TokenInfo>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrossedMarketOpportunity>, ArbitrageError> {
        let outcomes: Vec<(Address, Result<Option<CrossedMarketOpportunity>, ArbitrageError>)> = graph
            .groups()
            .par_iter()
            .filter(|group| group.can_cross())
            .map(|group| {
                if cancel.is_cancelled() {
                    return (group.token, Err(ArbitrageError::Cancelled));
                }
                (group.token, self.evaluate_token(group, tokens))
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(ArbitrageError::Cancelled);
        }

        let mut opportunities = Vec::new();
        for (token, outcome) in outcomes {
            match outcome {
                Ok(Some(opportunity)) => opportunities.push(opportunity),
                Ok(None) => {}
                Err(e) if e.is_silent() => trace!("Token {:?} dropped: {}", token, e),
                Err(e) => warn!("Skipping token {:?}: {}", token, e),
            }
        }

        let min_profit = self.min_profit();
        opportunities.retain(|opportunity| opportunity.profit > min_profit);
        opportunities.sort_by(|a, b| b.profit.total_cmp(&a.profit));

        debug!(
            "Evaluated {} tokens, {} opportunities",
            graph.crossable_tokens(),
            opportunities.len()
        );

        Ok(opportunities)
    }

    fn evaluate_token(
        &self,
        group: &TokenMarkets,
        tokens: &HashMap<Address, TokenInfo>,
    ) -> Result<Option<CrossedMarketOpportunity>, ArbitrageError> {
        let token = tokens
            .get(&group.token)
            .ok_or(ArbitrageError::UnknownToken(group.token))?;
        if token.blacklisted {
            return Ok(None);
        }

        let mut best: Option<CrossedMarketOpportunity> = None;

        for candidate in self.detector.detect(token, &group.markets) {
            let solution = match self.solver.solve(token, candidate.buy_from.as_ref(), candidate.sell_to.as_ref()) {
                Ok(Some(solution)) => solution,
                Ok(None) => continue,
                Err(e @ ArbitrageError::ComputationFault { .. }) => return Err(e),
                Err(e) if e.is_silent() => {
                    trace!("Discarded pair for {}: {}", token.symbol, e);
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Skipping pair {:?} -> {:?} for {}: {}",
                        candidate.buy_from.address(),
                        candidate.sell_to.address(),
                        token.symbol,
                        e
                    );
                    continue;
                }
            };

            if best.as_ref().map_or(true, |current| solution.profit > current.profit) {
                best = Some(CrossedMarketOpportunity {
                    token: token.address,
                    buy_from_market: candidate.buy_from.address(),
                    sell_to_market: candidate.sell_to.address(),
                    volume: solution.volume,
                    intermediate_amount: solution.intermediate_amount,
                    output: solution.output,
                    profit: solution.profit,
                });
            }
        }

        Ok(best)
    }
}
