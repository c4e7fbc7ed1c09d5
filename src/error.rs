use ethers::types::Address;
use thiserror::Error;

/// Faults raised while evaluating crossed markets.
///
/// None of these abort a block pass: they are captured per market, per pair
/// or per token and the pass moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArbitrageError {
    #[error("market {market:?} does not trade token {token:?}")]
    UnknownMarketToken { market: Address, token: Address },

    #[error("token {0:?} is not registered")]
    UnknownToken(Address),

    #[error("market {0:?} has an empty reserve")]
    ZeroReserves(Address),

    #[error("numeric conversion out of safe range: {0}")]
    NumericOverflowUnderflow(String),

    #[error("computed negative trade volume {0}")]
    NegativeComputedVolume(f64),

    #[error("computation fault for token {token:?}: {reason}")]
    ComputationFault { token: Address, reason: String },

    #[error("evaluation pass cancelled")]
    Cancelled,
}

impl ArbitrageError {
    /// Expected outcomes of the pre-filter that are dropped without logging.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::NegativeComputedVolume(_) | Self::Cancelled)
    }
}
