use anyhow::{anyhow, Result};
use ethers::{
    abi::parse_abi,
    contract::BaseContract,
    types::{Address, Bytes, U256},
};
use std::sync::Arc;

use crate::{dex::traits::Market, error::ArbitrageError};

pub const PROTOCOL: &str = "uniswap_v2";

const FEE_NUMERATOR: u64 = 997;
const FEE_DENOMINATOR: u64 = 1000;

/// γ of every Uniswap V2 swap.
pub const FEE_RETENTION: f64 = FEE_NUMERATOR as f64 / FEE_DENOMINATOR as f64;

/// Constant-product pool with the Uniswap V2 0.3% fee, shared by every
/// Uniswap V2 fork.
#[derive(Debug, Clone)]
pub struct UniswapV2Pair {
    address: Address,
    tokens: [Address; 2],
    reserves: [U256; 2],
    protocol: String,
}

impl UniswapV2Pair {
    pub fn new(address: Address, token0: Address, token1: Address) -> Self {
        Self {
            address,
            tokens: [token0, token1],
            reserves: [U256::zero(), U256::zero()],
            protocol: PROTOCOL.to_string(),
        }
    }

    pub fn with_balances(mut self, reserve0: U256, reserve1: U256) -> Self {
        self.reserves = [reserve0, reserve1];
        self
    }

    fn ordered_reserves(&self, token_in: Address, token_out: Address) -> Result<(U256, U256), ArbitrageError> {
        let reserve_in = self.get_balance(token_in)?;
        let reserve_out = self.get_balance(token_out)?;
        Ok((reserve_in, reserve_out))
    }

    fn overflow(&self) -> ArbitrageError {
        ArbitrageError::NumericOverflowUnderflow(format!("swap quote overflow on {:?}", self.address))
    }
}

pub fn get_amount_out(reserve_in: U256, reserve_out: U256, amount_in: U256) -> Option<U256> {
    let amount_in_with_fee = amount_in.checked_mul(U256::from(FEE_NUMERATOR))?;
    let numerator = amount_in_with_fee.checked_mul(reserve_out)?;
    let denominator = reserve_in
        .checked_mul(U256::from(FEE_DENOMINATOR))?
        .checked_add(amount_in_with_fee)?;
    numerator.checked_div(denominator)
}

pub fn get_amount_in(reserve_in: U256, reserve_out: U256, amount_out: U256) -> Option<U256> {
    let numerator = reserve_in
        .checked_mul(amount_out)?
        .checked_mul(U256::from(FEE_DENOMINATOR))?;
    let denominator = reserve_out
        .checked_sub(amount_out)?
        .checked_mul(U256::from(FEE_NUMERATOR))?;
    numerator.checked_div(denominator)?.checked_add(U256::one())
}

impl Market for UniswapV2Pair {
    fn address(&self) -> Address {
        self.address
    }

    fn tokens(&self) -> [Address; 2] {
        self.tokens
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn reserves(&self) -> [U256; 2] {
        self.reserves
    }

    fn fee_retention(&self) -> f64 {
        FEE_RETENTION
    }

    fn with_reserves(&self, reserves: [U256; 2]) -> Arc<dyn Market> {
        Arc::new(Self {
            reserves,
            ..self.clone()
        })
    }

    fn quote_output(&self, token_in: Address, token_out: Address, amount_in: U256) -> Result<U256, ArbitrageError> {
        let (reserve_in, reserve_out) = self.ordered_reserves(token_in, token_out)?;
        get_amount_out(reserve_in, reserve_out, amount_in).ok_or_else(|| self.overflow())
    }

    fn quote_input(&self, token_in: Address, token_out: Address, amount_out: U256) -> Result<U256, ArbitrageError> {
        let (reserve_in, reserve_out) = self.ordered_reserves(token_in, token_out)?;
        get_amount_in(reserve_in, reserve_out, amount_out).ok_or_else(|| self.overflow())
    }

    fn build_swap_call(&self, token_in: Address, amount_in: U256, recipient: Address) -> Result<Bytes> {
        if amount_in.is_zero() {
            return Err(anyhow!("Invalid amount: {}", amount_in));
        }

        let (amount0_out, amount1_out) = if token_in == self.tokens[0] {
            (U256::zero(), self.quote_output(token_in, self.tokens[1], amount_in)?)
        } else if token_in == self.tokens[1] {
            (self.quote_output(token_in, self.tokens[0], amount_in)?, U256::zero())
        } else {
            return Err(anyhow!("Bad token input address {:?}", token_in));
        };

        let pair_abi = parse_abi(&[
            "function swap(uint256 amount0Out, uint256 amount1Out, address to, bytes data)",
        ])?;
        let pair = BaseContract::from(pair_abi);

        pair.encode("swap", (amount0_out, amount1_out, recipient, Bytes::new()))
            .map_err(|e| anyhow!("Failed to encode swap call: {}", e))
    }
}
