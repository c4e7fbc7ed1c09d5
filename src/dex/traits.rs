use anyhow::Result;
use ethers::types::{Address, Bytes, U256};
use std::{fmt::Debug, sync::Arc};

use crate::{arbitrage::numeric, error::ArbitrageError};

/// Capability interface of a pool trading two tokens.
///
/// Values are immutable: a reserve refresh produces a new market through
/// [`Market::with_reserves`] instead of mutating a shared one.
pub trait Market: Send + Sync + Debug {
    fn address(&self) -> Address;

    fn tokens(&self) -> [Address; 2];

    fn protocol(&self) -> &str;

    /// Reserves ordered like [`Market::tokens`].
    fn reserves(&self) -> [U256; 2];

    /// Fraction of the input that is not taken as fee.
    fn fee_retention(&self) -> f64;

    fn with_reserves(&self, reserves: [U256; 2]) -> Arc<dyn Market>;

    fn quote_output(&self, token_in: Address, token_out: Address, amount_in: U256) -> Result<U256, ArbitrageError>;

    fn quote_input(&self, token_in: Address, token_out: Address, amount_out: U256) -> Result<U256, ArbitrageError>;

    /// Calldata that swaps `amount_in` of `token_in` held by the pool and sends the output to `recipient`.
    fn build_swap_call(&self, token_in: Address, amount_in: U256, recipient: Address) -> Result<Bytes>;

    fn get_balance(&self, token: Address) -> Result<U256, ArbitrageError> {
        let tokens = self.tokens();
        let reserves = self.reserves();
        tokens
            .iter()
            .position(|t| *t == token)
            .map(|i| reserves[i])
            .ok_or(ArbitrageError::UnknownMarketToken {
                market: self.address(),
                token,
            })
    }

    /// The token traded against `reference`, if this market trades the reference at all.
    fn paired_token(&self, reference: Address) -> Option<Address> {
        match self.tokens() {
            [a, b] if a == reference => Some(b),
            [a, b] if b == reference => Some(a),
            _ => None,
        }
    }

    fn reference_ratio(
        &self,
        reference: Address,
        reference_decimals: u8,
        token_decimals: u8,
    ) -> Result<f64, ArbitrageError> {
        let token = self.paired_token(reference).ok_or(ArbitrageError::UnknownMarketToken {
            market: self.address(),
            token: reference,
        })?;
        let reference_reserve = self.get_balance(reference)?;
        let token_reserve = self.get_balance(token)?;
        // A dust reserve that truncates to zero once scaled prices like an empty one
        let empty = |reserve: U256, decimals: u8| {
            numeric::scale_reserve(reserve, decimals).map(|scaled| scaled.is_zero())
        };
        if empty(reference_reserve, reference_decimals)? || empty(token_reserve, token_decimals)? {
            return Err(ArbitrageError::ZeroReserves(self.address()));
        }
        numeric::reference_ratio(reference_reserve, reference_decimals, token_reserve, token_decimals)
    }
}
