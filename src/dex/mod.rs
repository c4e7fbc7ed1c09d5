pub mod discovery;
pub mod snapshot;
pub mod traits;
pub mod uniswap_v2;

pub use discovery::PoolDiscovery;
pub use snapshot::{ReserveSnapshot, SnapshotStore};
pub use traits::*;
pub use uniswap_v2::UniswapV2Pair;

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::types::PairRecord;

pub fn create_market(record: &PairRecord) -> Result<Arc<dyn Market>> {
    match record.protocol.as_str() {
        uniswap_v2::PROTOCOL => Ok(Arc::new(UniswapV2Pair::new(
            record.market_address,
            record.token0,
            record.token1,
        ))),
        other => Err(anyhow!(
            "Unknown market protocol '{}' for {:?}",
            other,
            record.market_address
        )),
    }
}

/// Builds markets for every stored pair, skipping pairs of unknown protocols.
pub fn create_markets(records: &[PairRecord]) -> Vec<Arc<dyn Market>> {
    let mut markets = Vec::with_capacity(records.len());

    for record in records {
        match create_market(record) {
            Ok(market) => markets.push(market),
            Err(e) => {
                tracing::warn!("Skipping stored pair: {}", e);
            }
        }
    }

    markets
}
