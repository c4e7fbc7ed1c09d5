use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    abi::parse_abi,
    contract::BaseContract,
    types::{Address, Bytes, U256},
};
use std::time::Duration;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    blockchain::{parse_address, wei_to_ether},
    config::Config,
    types::{CrossedMarketOpportunity, OpportunityBatch},
};

/// Consumer of ranked opportunities. Failures are reported, never retried.
#[async_trait]
pub trait OpportunityExecutor: Send {
    async fn execute(&mut self, batch: OpportunityBatch) -> Result<()>;
}

/// Non-blocking producer side of the executor queue.
#[derive(Clone)]
pub struct ExecutorHandle {
    sender: mpsc::Sender<OpportunityBatch>,
}

impl ExecutorHandle {
    /// Queues `batch` without waiting; a full queue drops it.
    pub fn submit(&self, batch: OpportunityBatch) -> bool {
        let block_number = batch.block_number;
        match self.sender.try_send(batch) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Executor queue full, dropping opportunities of block {}", block_number);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Executor stopped, dropping opportunities of block {}", block_number);
                false
            }
        }
    }
}

pub fn spawn_executor<E>(mut executor: E, capacity: usize) -> (ExecutorHandle, JoinHandle<()>)
where
    E: OpportunityExecutor + 'static,
{
    let (sender, mut receiver) = mpsc::channel::<OpportunityBatch>(capacity.max(1));

    let handle = tokio::spawn(async move {
        info!("Executor started");
        while let Some(batch) = receiver.recv().await {
            let block_number = batch.block_number;
            if let Err(e) = executor.execute(batch).await {
                error!("Executor failed on block {}: {}", block_number, e);
            }
        }
        info!("Executor stopped");
    });

    (ExecutorHandle { sender }, handle)
}

#[derive(Debug, Clone)]
pub struct SwapCall {
    pub target: Address,
    pub data: Bytes,
}

/// Everything needed to submit one crossed-market trade, short of signing it.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub token: Address,
    pub volume: U256,
    pub intermediate_amount: U256,
    pub expected_output: U256,
    pub miner_reward: U256,
    pub calls: Vec<SwapCall>,
    pub executor_calldata: Bytes,
    pub target_blocks: Vec<u64>,
    pub gas_limit: u64,
}

/// Prints and plans every opportunity it receives, without signing or relaying anything.
pub struct DryRunExecutor {
    reference: Address,
    reference_decimals: u8,
    bundle_executor: Address,
    miner_reward_percentage: u32,
    target_block_offsets: Vec<u64>,
    max_gas_estimate: u64,
    healthcheck_url: Option<String>,
    http: reqwest::Client,
}

impl DryRunExecutor {
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.executor.miner_reward_percentage > 100 {
            return Err(anyhow!(
                "Invalid miner_reward_percentage: {}",
                config.executor.miner_reward_percentage
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            reference: parse_address(&config.tokens.reference)?,
            reference_decimals: config.tokens.reference_decimals,
            bundle_executor: parse_address(&config.executor.bundle_executor_address)?,
            miner_reward_percentage: config.executor.miner_reward_percentage,
            target_block_offsets: config.executor.target_block_offsets.clone(),
            max_gas_estimate: config.executor.max_gas_estimate,
            healthcheck_url: config.executor.healthcheck_url.clone().filter(|url| !url.is_empty()),
            http,
        })
    }

    pub fn build_plan(&self, batch: &OpportunityBatch, opportunity: &CrossedMarketOpportunity) -> Result<ExecutionPlan> {
        let buy = batch
            .snapshot
            .get(&opportunity.buy_from_market)
            .ok_or_else(|| anyhow!("Market {:?} not in snapshot", opportunity.buy_from_market))?;
        let sell = batch
            .snapshot
            .get(&opportunity.sell_to_market)
            .ok_or_else(|| anyhow!("Market {:?} not in snapshot", opportunity.sell_to_market))?;

        let volume = opportunity.volume_wei(self.reference_decimals)?;
        let intermediate_amount = buy.quote_output(self.reference, opportunity.token, volume)?;
        let expected_output = sell.quote_output(opportunity.token, self.reference, intermediate_amount)?;
        if expected_output <= volume {
            return Err(anyhow!(
                "Integer quote for {:?} is not profitable: {} in, {} out",
                opportunity.token,
                volume,
                expected_output
            ));
        }

        // Tokens bought on the first market go straight to the second one
        let calls = vec![
            SwapCall {
                target: buy.address(),
                data: buy.build_swap_call(self.reference, volume, sell.address())?,
            },
            SwapCall {
                target: sell.address(),
                data: sell.build_swap_call(opportunity.token, intermediate_amount, self.bundle_executor)?,
            },
        ];

        let miner_reward = (expected_output - volume) * U256::from(self.miner_reward_percentage) / U256::from(100);
        let executor_calldata = encode_executor_call(volume, miner_reward, &calls)?;

        Ok(ExecutionPlan {
            token: opportunity.token,
            volume,
            intermediate_amount,
            expected_output,
            miner_reward,
            calls,
            executor_calldata,
            target_blocks: self
                .target_block_offsets
                .iter()
                .map(|offset| batch.block_number + offset)
                .collect(),
            gas_limit: self.max_gas_estimate,
        })
    }

    async fn ping_healthcheck(&self) {
        let url = match &self.healthcheck_url {
            Some(url) => url,
            None => return,
        };

        if let Err(e) = self.http.get(url).send().await {
            warn!("Healthcheck ping failed: {}", e);
        }
    }
}

#[async_trait]
impl OpportunityExecutor for DryRunExecutor {
    async fn execute(&mut self, batch: OpportunityBatch) -> Result<()> {
        for opportunity in &batch.opportunities {
            print_crossed_market(&batch, opportunity);

            match self.build_plan(&batch, opportunity) {
                Ok(plan) => {
                    for call in &plan.calls {
                        debug!("  call {:?}: 0x{}", call.target, hex::encode(&call.data));
                    }
                    info!(
                        "Planned trade for {:?}: miner reward {:.6} ETH, target blocks {:?}, gas limit {}",
                        plan.token,
                        wei_to_ether(plan.miner_reward),
                        plan.target_blocks,
                        plan.gas_limit
                    );
                }
                Err(e) => warn!("Cannot plan trade for {:?}: {}", opportunity.token, e),
            }
        }

        info!("No arbitrage submitted to relay (dry run, block {})", batch.block_number);
        self.ping_healthcheck().await;
        Ok(())
    }
}

fn print_crossed_market(batch: &OpportunityBatch, opportunity: &CrossedMarketOpportunity) {
    let describe = |address: &Address| match batch.snapshot.get(address) {
        Some(market) => {
            let [token0, token1] = market.tokens();
            format!("{} ({:?}) {:?} => {:?}", market.protocol(), address, token0, token1)
        }
        None => format!("{:?}", address),
    };

    info!(
        "Crossed market: profit {:.6} volume {:.6} | buy {} | sell {}",
        opportunity.profit,
        opportunity.volume,
        describe(&opportunity.buy_from_market),
        describe(&opportunity.sell_to_market)
    );
}

fn encode_executor_call(volume: U256, miner_reward: U256, calls: &[SwapCall]) -> Result<Bytes> {
    let executor_abi = parse_abi(&[
        "function uniswapWeth(uint256 _wethAmountToFirstMarket, uint256 _ethAmountToCoinbase, address[] _targets, bytes[] _payloads)",
    ])?;
    let executor = BaseContract::from(executor_abi);

    let targets: Vec<Address> = calls.iter().map(|call| call.target).collect();
    let payloads: Vec<Bytes> = calls.iter().map(|call| call.data.clone()).collect();

    executor
        .encode("uniswapWeth", (volume, miner_reward, targets, payloads))
        .map_err(|e| anyhow!("Failed to encode executor call: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::{Market, ReserveSnapshot, UniswapV2Pair};
    use std::sync::{Arc, Mutex};
    use tokio::time::timeout;

    fn weth() -> Address {
        Address::repeat_byte(0xee)
    }

    fn token() -> Address {
        Address::repeat_byte(1)
    }

    fn ether(amount: u64) -> U256 {
        U256::from(amount) * U256::exp10(18)
    }

    fn create_test_executor() -> DryRunExecutor {
        DryRunExecutor {
            reference: weth(),
            reference_decimals: 18,
            bundle_executor: Address::repeat_byte(0xbe),
            miner_reward_percentage: 80,
            target_block_offsets: vec![1, 2],
            max_gas_estimate: 1_400_000,
            healthcheck_url: None,
            http: reqwest::Client::new(),
        }
    }

    fn create_test_batch() -> OpportunityBatch {
        let markets: Vec<Arc<dyn Market>> = vec![
            Arc::new(UniswapV2Pair::new(Address::repeat_byte(0xa), weth(), token()).with_balances(ether(100), ether(10_000))),
            Arc::new(UniswapV2Pair::new(Address::repeat_byte(0xb), weth(), token()).with_balances(ether(90), ether(10_500))),
        ];
        let opportunity = CrossedMarketOpportunity {
            token: token(),
            buy_from_market: Address::repeat_byte(0xb),
            sell_to_market: Address::repeat_byte(0xa),
            volume: 3.3907,
            intermediate_amount: 380.12,
            output: 3.6514,
            profit: 0.2607,
        };

        OpportunityBatch::new(100, vec![opportunity], Arc::new(ReserveSnapshot::new(100, markets)))
    }

    #[test]
    fn test_build_plan_routes_buy_output_to_sell_market() {
        let batch = create_test_batch();
        let plan = create_test_executor()
            .build_plan(&batch, &batch.opportunities[0])
            .unwrap();

        assert_eq!(plan.calls.len(), 2);
        assert_eq!(plan.calls[0].target, Address::repeat_byte(0xb));
        assert_eq!(plan.calls[1].target, Address::repeat_byte(0xa));
        // swap(amount0Out, amount1Out, to, data): `to` of the buy leg is the sell market
        let recipient = &plan.calls[0].data[4 + 64 + 12..4 + 96];
        assert_eq!(recipient, Address::repeat_byte(0xa).as_bytes());
        let recipient = &plan.calls[1].data[4 + 64 + 12..4 + 96];
        assert_eq!(recipient, Address::repeat_byte(0xbe).as_bytes());

        assert_eq!(plan.target_blocks, vec![101, 102]);
        assert_eq!(plan.gas_limit, 1_400_000);
        assert!(plan.expected_output > plan.volume);
        assert_eq!(
            plan.miner_reward,
            (plan.expected_output - plan.volume) * U256::from(80) / U256::from(100)
        );
        assert!(!plan.executor_calldata.is_empty());
    }

    #[test]
    fn test_build_plan_rejects_unknown_market() {
        let mut batch = create_test_batch();
        batch.opportunities[0].sell_to_market = Address::repeat_byte(0x77);

        let opportunity = batch.opportunities[0].clone();
        assert!(create_test_executor().build_plan(&batch, &opportunity).is_err());
    }

    struct RecordingExecutor {
        blocks: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl OpportunityExecutor for RecordingExecutor {
        async fn execute(&mut self, batch: OpportunityBatch) -> Result<()> {
            self.blocks.lock().unwrap().push(batch.block_number);
            Err(anyhow!("gas estimate too large"))
        }
    }

    #[tokio::test]
    async fn test_spawned_executor_consumes_batches() {
        let blocks = Arc::new(Mutex::new(Vec::new()));
        let (handle, task) = spawn_executor(RecordingExecutor { blocks: blocks.clone() }, 4);

        assert!(handle.submit(create_test_batch()));
        assert!(handle.submit(create_test_batch()));
        drop(handle);

        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(*blocks.lock().unwrap(), vec![100, 100]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_batch() {
        let (sender, _receiver) = mpsc::channel(1);
        let handle = ExecutorHandle { sender };

        assert!(handle.submit(create_test_batch()));
        assert!(!handle.submit(create_test_batch()));
    }

    #[tokio::test]
    async fn test_dry_run_execute_succeeds() {
        let mut executor = create_test_executor();
        assert!(executor.execute(create_test_batch()).await.is_ok());
    }
}
