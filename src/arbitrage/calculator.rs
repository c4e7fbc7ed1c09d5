use ethers::types::Address;

use crate::{arbitrage::numeric, dex::Market, error::ArbitrageError, types::TokenInfo};

/// Decimal-normalized `(reference, token)` reserves of one market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reserves {
    pub reference: f64,
    pub token: f64,
}

impl Reserves {
    pub fn new(reference: f64, token: f64) -> Self {
        Self { reference, token }
    }

    fn invariant(&self) -> f64 {
        self.reference * self.token
    }
}

/// Optimal two-hop trade: `volume` reference in, `intermediate_amount` token
/// through the middle, `output` reference back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeSolution {
    pub volume: f64,
    pub intermediate_amount: f64,
    pub output: f64,
    pub profit: f64,
}

/// Closed-form optimum of buying a token on one constant-product market and
/// selling it on another, both priced in the reference asset.
pub struct TradeSolver {
    reference: Address,
    reference_decimals: u8,
    min_profit: f64,
}

impl TradeSolver {
    pub fn new(reference: Address, reference_decimals: u8, min_profit: f64) -> Self {
        Self {
            reference,
            reference_decimals,
            min_profit,
        }
    }

    pub fn min_profit(&self) -> f64 {
        self.min_profit
    }

    /// Solves one candidate pair.
    ///
    /// `Ok(None)` when no trade is possible or the profit does not clear the
    /// minimum; `Err(NegativeComputedVolume)` for pre-filter false positives.
    pub fn solve(
        &self,
        token: &TokenInfo,
        buy: &dyn Market,
        sell: &dyn Market,
    ) -> Result<Option<TradeSolution>, ArbitrageError> {
        let raw = [
            buy.get_balance(self.reference)?,
            buy.get_balance(token.address)?,
            sell.get_balance(self.reference)?,
            sell.get_balance(token.address)?,
        ];
        if raw.iter().any(|reserve| reserve.is_zero()) {
            return Ok(None);
        }

        let buy_reserves = Reserves::new(
            numeric::normalize(raw[0], self.reference_decimals)?,
            numeric::normalize(raw[1], token.decimals)?,
        );
        let sell_reserves = Reserves::new(
            numeric::normalize(raw[2], self.reference_decimals)?,
            numeric::normalize(raw[3], token.decimals)?,
        );
        if [buy_reserves, sell_reserves]
            .iter()
            .any(|r| r.reference == 0.0 || r.token == 0.0)
        {
            return Ok(None);
        }

        let gamma = buy.fee_retention();
        let solution = optimal_trade(buy_reserves, sell_reserves, gamma, sell.fee_retention());

        if !(solution.volume.is_finite()
            && solution.intermediate_amount.is_finite()
            && solution.output.is_finite()
            && solution.profit.is_finite())
        {
            return Err(ArbitrageError::ComputationFault {
                token: token.address,
                reason: format!(
                    "non-finite solution between {:?} and {:?}",
                    buy.address(),
                    sell.address()
                ),
            });
        }

        if solution.volume < 0.0 {
            return Err(ArbitrageError::NegativeComputedVolume(solution.volume));
        }

        if solution.profit > 0.0 && solution.profit > self.min_profit {
            Ok(Some(solution))
        } else {
            Ok(None)
        }
    }
}

/// `buy_gamma` and `sell_gamma` are the fee retention of each leg.
pub fn optimal_trade(buy: Reserves, sell: Reserves, buy_gamma: f64, sell_gamma: f64) -> TradeSolution {
    let k_buy = buy.invariant();
    let k_sell = sell.invariant();
    let sqrt_buy = k_buy.sqrt();
    let sqrt_sell = k_sell.sqrt();

    let num_a = sqrt_sell * buy.token;
    let num_b = (1.0 / buy_gamma) * sqrt_buy * sell.token;
    let den = sqrt_buy + sqrt_sell;

    let intermediate_amount = (num_a - num_b) / den;
    let volume = (1.0 / buy_gamma) * (k_buy / (buy.token - intermediate_amount) - buy.reference);
    let output = sell.reference - k_sell / (sell.token + sell_gamma * intermediate_amount);

    TradeSolution {
        volume,
        intermediate_amount,
        output,
        profit: output - volume,
    }
}

/// Swaps `volume` reference for token on `buy`, then that token back to
/// reference on `sell`. Returns `(token_received, reference_received)`.
pub fn simulate_round_trip(buy: Reserves, sell: Reserves, gamma: f64, volume: f64) -> (f64, f64) {
    let token_received = buy.token - buy.invariant() / (buy.reference + gamma * volume);
    let reference_received = sell.reference - sell.invariant() / (sell.token + gamma * token_received);
    (token_received, reference_received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::UniswapV2Pair;
    use ethers::types::U256;

    const GAMMA: f64 = 0.997;

    fn weth() -> Address {
        Address::repeat_byte(0xee)
    }

    fn create_test_token() -> TokenInfo {
        TokenInfo::new(Address::repeat_byte(1), "TKN", 18)
    }

    fn create_test_market(id: u8, reference_reserve: u64, token_reserve: u64) -> UniswapV2Pair {
        let scale = U256::exp10(18);
        UniswapV2Pair::new(Address::repeat_byte(id), create_test_token().address, weth())
            .with_balances(U256::from(token_reserve) * scale, U256::from(reference_reserve) * scale)
    }

    fn create_test_solver() -> TradeSolver {
        TradeSolver::new(weth(), 18, 0.001)
    }

    #[test]
    fn test_solve_reference_scenario() {
        let buy = create_test_market(0xb, 90, 10_500);
        let sell = create_test_market(0xa, 100, 10_000);

        let solution = create_test_solver()
            .solve(&create_test_token(), &buy, &sell)
            .unwrap()
            .unwrap();

        assert!((solution.intermediate_amount - 380.19).abs() < 0.5);
        assert!((solution.volume - 3.388).abs() < 0.01);
        assert!((solution.output - 3.653).abs() < 0.01);
        assert!((solution.profit - 0.265).abs() < 0.01);
        assert!((solution.profit - (solution.output - solution.volume)).abs() < 1e-12);
    }

    #[test]
    fn test_round_trip_reproduces_solution() {
        let cases = [
            (Reserves::new(90.0, 10_500.0), Reserves::new(100.0, 10_000.0)),
            (Reserves::new(1_000.0, 2_000_000.0), Reserves::new(50.0, 90_000.0)),
            (Reserves::new(5.5, 12.0), Reserves::new(7.0, 11.0)),
        ];

        for (buy, sell) in cases {
            let solution = optimal_trade(buy, sell, GAMMA, GAMMA);
            let (token_received, reference_received) = simulate_round_trip(buy, sell, GAMMA, solution.volume);

            assert!((token_received - solution.intermediate_amount).abs() < 1e-6 * solution.intermediate_amount.abs().max(1.0));
            assert!((reference_received - solution.output).abs() < 1e-9 * solution.output.abs().max(1.0));
            assert!((reference_received - solution.volume - solution.profit).abs() < 1e-9);
        }
    }

    #[test]
    fn test_profit_is_the_optimum() {
        let buy = Reserves::new(90.0, 10_500.0);
        let sell = Reserves::new(100.0, 10_000.0);
        let solution = optimal_trade(buy, sell, GAMMA, GAMMA);

        for factor in [0.5, 0.9, 1.1, 1.5] {
            let volume = solution.volume * factor;
            let (_, output) = simulate_round_trip(buy, sell, GAMMA, volume);
            assert!(output - volume <= solution.profit + 1e-12);
        }
    }

    #[test]
    fn test_profit_grows_with_buy_side_token_reserve() {
        let sell = Reserves::new(100.0, 10_000.0);
        let mut last_profit = f64::MIN;

        for token_reserve in [10_500.0, 11_000.0, 12_000.0, 15_000.0, 30_000.0] {
            let profit = optimal_trade(Reserves::new(90.0, token_reserve), sell, GAMMA, GAMMA).profit;
            assert!(profit >= last_profit);
            last_profit = profit;
        }
    }

    #[test]
    fn test_wrong_direction_is_negative_volume() {
        let buy = create_test_market(0xa, 100, 10_000);
        let sell = create_test_market(0xb, 90, 10_500);

        let result = create_test_solver().solve(&create_test_token(), &buy, &sell);
        assert!(matches!(result, Err(ArbitrageError::NegativeComputedVolume(v)) if v < 0.0));
        assert!(result.unwrap_err().is_silent());
    }

    #[test]
    fn test_zero_reserves_are_skipped() {
        let buy = UniswapV2Pair::new(Address::repeat_byte(0xb), create_test_token().address, weth());
        let sell = create_test_market(0xa, 100, 10_000);

        let result = create_test_solver().solve(&create_test_token(), &buy, &sell);
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_profit_below_minimum_is_rejected() {
        let buy = create_test_market(0xb, 90, 10_500);
        let sell = create_test_market(0xa, 100, 10_000);
        let solver = TradeSolver::new(weth(), 18, 1.0);

        assert_eq!(solver.solve(&create_test_token(), &buy, &sell), Ok(None));
    }

    #[test]
    fn test_oversized_reserves_fall_back_to_coarse_normalization() {
        // 10^15 tokens scale to 10^19 at four decimals, past 2^53
        let buy = create_test_market(0xb, 90, 1_050_000_000_000_000);
        let sell = create_test_market(0xa, 100, 1_000_000_000_000_000);

        let solution = create_test_solver()
            .solve(&create_test_token(), &buy, &sell)
            .unwrap()
            .unwrap();

        assert!(solution.volume.is_finite() && solution.profit.is_finite());
        assert!((solution.profit - 0.265).abs() < 0.01);
        assert!((solution.volume - 3.388).abs() < 0.01);
    }

    #[test]
    fn test_unrepresentable_reserves_are_an_error() {
        let sell = create_test_market(0xa, 100, 10_000);
        let buy = UniswapV2Pair::new(Address::repeat_byte(0xb), create_test_token().address, weth())
            .with_balances(U256::MAX / U256::from(2), U256::from(90) * U256::exp10(18));

        let result = create_test_solver().solve(&create_test_token(), &buy, &sell);
        assert!(matches!(result, Err(ArbitrageError::NumericOverflowUnderflow(_))));
        assert!(!result.unwrap_err().is_silent());
    }

    #[test]
    fn test_market_without_token_is_an_error() {
        let buy = create_test_market(0xb, 90, 10_500);
        let other = TokenInfo::new(Address::repeat_byte(7), "OTHER", 18);

        let result = create_test_solver().solve(&other, &buy, &buy);
        assert!(matches!(result, Err(ArbitrageError::UnknownMarketToken { .. })));
    }
}
