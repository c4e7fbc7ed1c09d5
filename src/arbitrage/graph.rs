use ethers::types::{Address, U256};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::debug;

use crate::dex::Market;

/// Markets trading one token against the reference asset.
#[derive(Debug, Clone)]
pub struct TokenMarkets {
    pub token: Address,
    pub markets: Vec<Arc<dyn Market>>,
}

impl TokenMarkets {
    pub fn can_cross(&self) -> bool {
        self.markets.len() >= 2
    }
}

/// Per-token grouping of the markets of one snapshot.
///
/// Groups keep the order in which their token was first seen, and markets
/// keep snapshot order inside a group.
#[derive(Debug, Clone)]
pub struct MarketGraph {
    groups: Vec<TokenMarkets>,
    index: HashMap<Address, usize>,
}

impl MarketGraph {
    pub fn build(
        markets: &[Arc<dyn Market>],
        reference: Address,
        min_liquidity: U256,
        blacklist: &HashSet<Address>,
    ) -> Self {
        let mut groups: Vec<TokenMarkets> = Vec::new();
        let mut index = HashMap::new();
        let mut below_floor = 0usize;

        for market in markets {
            let token = match market.paired_token(reference) {
                Some(token) => token,
                None => continue,
            };

            if market.tokens().iter().any(|t| blacklist.contains(t)) {
                continue;
            }

            let reference_reserve = match market.get_balance(reference) {
                Ok(reserve) => reserve,
                Err(_) => continue,
            };
            if reference_reserve < min_liquidity {
                below_floor += 1;
                continue;
            }

            let slot = *index.entry(token).or_insert_with(|| {
                groups.push(TokenMarkets {
                    token,
                    markets: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].markets.push(market.clone());
        }

        debug!(
            "Market graph: {} tokens from {} markets ({} below liquidity floor)",
            groups.len(),
            markets.len(),
            below_floor
        );

        Self {
            groups,
            index,
        }
    }

    pub fn groups(&self) -> &[TokenMarkets] {
        &self.groups
    }

    pub fn markets_for(&self, token: &Address) -> Option<&[Arc<dyn Market>]> {
        self.index
            .get(token)
            .map(|&i| self.groups[i].markets.as_slice())
    }

    pub fn tokens(&self) -> Vec<Address> {
        self.groups.iter().map(|group| group.token).collect()
    }

    /// Tokens with at least two markets; only those can ever cross.
    pub fn crossable_tokens(&self) -> usize {
        self.groups.iter().filter(|group| group.can_cross()).count()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Startup reduction of the stored market set: markets against `reference`
/// whose token is not blacklisted and trades in at least two such markets.
pub fn tradable_markets(
    markets: &[Arc<dyn Market>],
    reference: Address,
    blacklist: &HashSet<Address>,
) -> Vec<Arc<dyn Market>> {
    let graph = MarketGraph::build(markets, reference, U256::zero(), blacklist);

    graph
        .groups
        .into_iter()
        .filter(|group| group.can_cross())
        .flat_map(|group| group.markets)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::UniswapV2Pair;

    fn weth() -> Address {
        Address::repeat_byte(0xee)
    }

    fn ether(amount: u64) -> U256 {
        U256::from(amount) * U256::exp10(18)
    }

    fn create_test_market(id: u8, token: Address, reference_reserve: u64) -> Arc<dyn Market> {
        Arc::new(
            UniswapV2Pair::new(Address::repeat_byte(id), token, weth())
                .with_balances(ether(1000), ether(reference_reserve)),
        )
    }

    #[test]
    fn test_build_groups_by_token_in_first_seen_order() {
        let token_a = Address::repeat_byte(1);
        let token_b = Address::repeat_byte(2);
        let markets = vec![
            create_test_market(0x10, token_b, 10),
            create_test_market(0x11, token_a, 10),
            create_test_market(0x12, token_b, 20),
        ];

        let graph = MarketGraph::build(&markets, weth(), ether(3), &HashSet::new());

        assert_eq!(graph.tokens(), vec![token_b, token_a]);
        let b_markets = graph.markets_for(&token_b).unwrap();
        assert_eq!(b_markets.len(), 2);
        assert_eq!(b_markets[0].address(), Address::repeat_byte(0x10));
        assert_eq!(b_markets[1].address(), Address::repeat_byte(0x12));
        // single-market tokens are kept
        assert_eq!(graph.markets_for(&token_a).unwrap().len(), 1);
        assert_eq!(graph.crossable_tokens(), 1);
    }

    #[test]
    fn test_build_applies_liquidity_floor_and_blacklist() {
        let token_a = Address::repeat_byte(1);
        let banned = Address::repeat_byte(2);
        let markets = vec![
            create_test_market(0x10, token_a, 2),
            create_test_market(0x11, token_a, 3),
            create_test_market(0x12, banned, 50),
        ];
        let blacklist: HashSet<Address> = [banned].into_iter().collect();

        let graph = MarketGraph::build(&markets, weth(), ether(3), &blacklist);

        assert_eq!(graph.len(), 1);
        let kept = graph.markets_for(&token_a).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].address(), Address::repeat_byte(0x11));
        assert!(graph.markets_for(&banned).is_none());
    }

    #[test]
    fn test_build_ignores_markets_without_reference() {
        let market: Arc<dyn Market> = Arc::new(
            UniswapV2Pair::new(Address::repeat_byte(0x10), Address::repeat_byte(1), Address::repeat_byte(2))
                .with_balances(ether(10), ether(10)),
        );

        let graph = MarketGraph::build(&[market], weth(), U256::zero(), &HashSet::new());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_tradable_markets_keeps_crossable_tokens() {
        let token_a = Address::repeat_byte(1);
        let token_b = Address::repeat_byte(2);
        let markets = vec![
            create_test_market(0x10, token_a, 1),
            create_test_market(0x11, token_b, 1),
            create_test_market(0x12, token_a, 1),
        ];

        let tradable = tradable_markets(&markets, weth(), &HashSet::new());
        let ids: Vec<Address> = tradable.iter().map(|m| m.address()).collect();

        assert_eq!(ids, vec![Address::repeat_byte(0x10), Address::repeat_byte(0x12)]);
    }
}
