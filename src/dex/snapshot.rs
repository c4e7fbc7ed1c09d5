use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use ethers::types::{Address, U256};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

use crate::{blockchain::ReserveSource, dex::traits::Market};

/// Markets with the reserves they held at one block.
#[derive(Debug, Clone)]
pub struct ReserveSnapshot {
    block_number: u64,
    markets: Vec<Arc<dyn Market>>,
    index: HashMap<Address, usize>,
}

impl ReserveSnapshot {
    pub fn new(block_number: u64, markets: Vec<Arc<dyn Market>>) -> Self {
        let index = markets
            .iter()
            .enumerate()
            .map(|(i, market)| (market.address(), i))
            .collect();

        Self {
            block_number,
            markets,
            index,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn markets(&self) -> &[Arc<dyn Market>] {
        &self.markets
    }

    pub fn market_ids(&self) -> Vec<Address> {
        self.markets.iter().map(|m| m.address()).collect()
    }

    pub fn get(&self, market: &Address) -> Option<&Arc<dyn Market>> {
        self.index.get(market).map(|&i| &self.markets[i])
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    /// New snapshot with `reserves[i]` applied to the i-th market.
    pub fn with_reserves(&self, block_number: u64, reserves: &[(U256, U256)]) -> Result<Self> {
        if reserves.len() != self.markets.len() {
            return Err(anyhow!(
                "Reserve count mismatch at block {}: expected {}, got {}",
                block_number,
                self.markets.len(),
                reserves.len()
            ));
        }

        let markets = self
            .markets
            .iter()
            .zip(reserves)
            .map(|(market, (reserve0, reserve1))| market.with_reserves([*reserve0, *reserve1]))
            .collect();

        Ok(Self::new(block_number, markets))
    }
}

/// Current snapshot behind an atomic pointer. Readers always see a whole
/// snapshot; a refresh replaces it wholesale.
pub struct SnapshotStore {
    current: ArcSwap<ReserveSnapshot>,
}

impl SnapshotStore {
    pub fn new(initial: ReserveSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn load(&self) -> Arc<ReserveSnapshot> {
        self.current.load_full()
    }

    pub async fn refresh(&self, source: &dyn ReserveSource, block_number: u64) -> Result<Arc<ReserveSnapshot>> {
        let current = self.load();
        let reserves = source
            .fetch_reserves(&current.market_ids(), Some(block_number))
            .await?;

        let snapshot = Arc::new(current.with_reserves(block_number, &reserves)?);

        // Blocks only move forward: an older refresh landing late never
        // replaces a newer snapshot, and never blocks one either.
        let previous = self.current.rcu(|installed| {
            if snapshot.block_number() > installed.block_number() {
                snapshot.clone()
            } else {
                installed.clone()
            }
        });
        if previous.block_number() >= block_number {
            return Err(anyhow!(
                "Reserve snapshot for block {} superseded by block {}",
                block_number,
                previous.block_number()
            ));
        }

        debug!(
            "Reserve snapshot swapped to block {} ({} markets)",
            block_number,
            snapshot.len()
        );

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::UniswapV2Pair;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::{sync::Notify, time::timeout};

    struct FixedReserves(Vec<(U256, U256)>);

    #[async_trait]
    impl ReserveSource for FixedReserves {
        async fn fetch_reserves(&self, _markets: &[Address], _block: Option<u64>) -> Result<Vec<(U256, U256)>> {
            Ok(self.0.clone())
        }
    }

    fn create_test_snapshot() -> ReserveSnapshot {
        let markets: Vec<Arc<dyn Market>> = vec![
            Arc::new(UniswapV2Pair::new(Address::repeat_byte(0xa1), Address::repeat_byte(1), Address::repeat_byte(2))),
            Arc::new(UniswapV2Pair::new(Address::repeat_byte(0xa2), Address::repeat_byte(1), Address::repeat_byte(3))),
        ];
        ReserveSnapshot::new(0, markets)
    }

    #[tokio::test]
    async fn test_refresh_swaps_whole_snapshot() {
        let store = SnapshotStore::new(create_test_snapshot());
        let before = store.load();

        let source = FixedReserves(vec![
            (U256::from(10), U256::from(20)),
            (U256::from(30), U256::from(40)),
        ]);
        let after = store.refresh(&source, 7).await.unwrap();

        assert_eq!(after.block_number(), 7);
        assert_eq!(store.load().block_number(), 7);
        assert_eq!(
            after.get(&Address::repeat_byte(0xa2)).unwrap().reserves(),
            [U256::from(30), U256::from(40)]
        );
        // Readers holding the old snapshot keep seeing it unchanged
        assert_eq!(before.block_number(), 0);
        assert_eq!(before.markets()[0].reserves(), [U256::zero(), U256::zero()]);
    }

    /// Reserve source that holds its answer until released.
    struct GatedReserves {
        reserves: Vec<(U256, U256)>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ReserveSource for GatedReserves {
        async fn fetch_reserves(&self, _markets: &[Address], _block: Option<u64>) -> Result<Vec<(U256, U256)>> {
            self.release.notified().await;
            Ok(self.reserves.clone())
        }
    }

    fn create_test_reserves(base: u64) -> Vec<(U256, U256)> {
        vec![
            (U256::from(base), U256::from(base + 1)),
            (U256::from(base + 2), U256::from(base + 3)),
        ]
    }

    #[tokio::test]
    async fn test_late_older_refresh_does_not_block_newer_block() {
        let store = SnapshotStore::new(create_test_snapshot());
        let older_release = Arc::new(Notify::new());
        let newer_release = Arc::new(Notify::new());
        let older = GatedReserves {
            reserves: create_test_reserves(10),
            release: older_release.clone(),
        };
        let newer = GatedReserves {
            reserves: create_test_reserves(11),
            release: newer_release.clone(),
        };

        let older_refresh = store.refresh(&older, 10);
        let newer_refresh = store.refresh(&newer, 11);
        tokio::pin!(older_refresh);
        tokio::pin!(newer_refresh);

        // Both fetches are in flight before either answers
        assert!(timeout(Duration::from_millis(10), &mut older_refresh).await.is_err());
        assert!(timeout(Duration::from_millis(10), &mut newer_refresh).await.is_err());

        older_release.notify_one();
        assert_eq!(older_refresh.await.unwrap().block_number(), 10);

        newer_release.notify_one();
        assert_eq!(newer_refresh.await.unwrap().block_number(), 11);
        assert_eq!(store.load().block_number(), 11);
    }

    #[tokio::test]
    async fn test_older_refresh_never_replaces_newer_snapshot() {
        let store = SnapshotStore::new(create_test_snapshot());

        store.refresh(&FixedReserves(create_test_reserves(11)), 11).await.unwrap();
        let error = store
            .refresh(&FixedReserves(create_test_reserves(10)), 10)
            .await
            .unwrap_err();

        assert!(error.to_string().contains("superseded by block 11"));
        assert_eq!(store.load().block_number(), 11);
        assert_eq!(
            store.load().get(&Address::repeat_byte(0xa1)).unwrap().reserves(),
            [U256::from(11), U256::from(12)]
        );
    }

    #[tokio::test]
    async fn test_refresh_rejects_mismatched_reserves() {
        let store = SnapshotStore::new(create_test_snapshot());
        let source = FixedReserves(vec![(U256::from(10), U256::from(20))]);

        assert!(store.refresh(&source, 3).await.is_err());
        assert_eq!(store.load().block_number(), 0);
    }
}
