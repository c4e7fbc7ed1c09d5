pub mod config;
pub mod types;
pub mod error;
pub mod blockchain;
pub mod dex;
pub mod arbitrage;
pub mod database;
pub mod bot;

pub use config::Config;
pub use error::ArbitrageError;
pub use types::*;
