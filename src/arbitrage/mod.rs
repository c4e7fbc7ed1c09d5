pub mod calculator;
pub mod detector;
pub mod graph;
pub mod numeric;
pub mod selector;

pub use calculator::{TradeSolution, TradeSolver};
pub use detector::{CandidatePair, CrossingDetector};
pub use graph::{tradable_markets, MarketGraph, TokenMarkets};
pub use selector::Selector;
