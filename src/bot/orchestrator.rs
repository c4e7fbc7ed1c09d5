use anyhow::{anyhow, Result};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast::error::RecvError, RwLock},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    arbitrage::tradable_markets,
    blockchain::{BlockchainClient, FlashQueryClient},
    bot::{
        executor::{spawn_executor, DryRunExecutor, ExecutorHandle},
        metrics::SearchMetrics,
        pipeline::{BlockPipeline, PipelineSettings},
        scheduler::{BlockScheduler, PassEvent, PassSummary},
    },
    config::Config,
    database::{
        DatabaseConnection, InMemoryRepository, MarketRepository, PgMarketRepository, PgTokenRepository,
        TokenCache, TokenRepository,
    },
    dex::{create_markets, PoolDiscovery, ReserveSnapshot, SnapshotStore},
};

pub struct Searcher {
    config: Config,
    blockchain_client: Arc<BlockchainClient>,
    database: Option<Arc<DatabaseConnection>>,
    pipeline: Arc<BlockPipeline>,
    scheduler: BlockScheduler,
    executor: ExecutorHandle,
    executor_task: JoinHandle<()>,
    metrics: Arc<RwLock<SearchMetrics>>,
    is_running: bool,
}

impl Searcher {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing crossed market searcher");

        let settings = PipelineSettings::from_config(&config)?;

        // Initialize blockchain client
        let blockchain_client = Arc::new(BlockchainClient::new(&config).await?);
        let query_client = Arc::new(FlashQueryClient::new(&blockchain_client, &config)?);
        info!("Blockchain client initialized");

        // Initialize storage
        let (database, tokens, market_repository) = Self::open_storage(&config).await?;

        if config.discovery.enabled {
            let discovery = PoolDiscovery::new(
                query_client.clone(),
                blockchain_client.clone(),
                tokens.clone(),
                market_repository.clone(),
                settings.reference,
                settings.blacklist.clone(),
                config.discovery.clone(),
                config.arbitrage.lookup_concurrency,
            );
            let stats = discovery.run(config.dexes.values()).await?;
            info!(
                "Pool discovery finished: {} pairs seen, {} added, {} removed",
                stats.pairs_seen, stats.pairs_added, stats.pairs_removed
            );
        }

        let pairs = market_repository.list_pairs().await?;
        let all_markets = create_markets(&pairs);
        let markets = tradable_markets(&all_markets, settings.reference, &settings.blacklist);
        if markets.is_empty() {
            return Err(anyhow!("No tradable markets among {} stored pairs", pairs.len()));
        }
        info!(
            "Loaded {} stored pairs, {} markets trade tokens with more than one market",
            pairs.len(),
            markets.len()
        );

        let snapshots = Arc::new(SnapshotStore::new(ReserveSnapshot::new(0, markets)));
        let token_cache = Arc::new(TokenCache::new(tokens));
        let pipeline = Arc::new(BlockPipeline::new(query_client, token_cache, snapshots, settings));

        let (executor, executor_task) = spawn_executor(
            DryRunExecutor::from_config(&config)?,
            config.executor.queue_capacity,
        );

        info!("Searcher initialized successfully");

        Ok(Self {
            config,
            blockchain_client,
            database,
            pipeline,
            scheduler: BlockScheduler::new(),
            executor,
            executor_task,
            metrics: Arc::new(RwLock::new(SearchMetrics::new())),
            is_running: false,
        })
    }

    async fn open_storage(
        config: &Config,
    ) -> Result<(
        Option<Arc<DatabaseConnection>>,
        Arc<dyn TokenRepository>,
        Arc<dyn MarketRepository>,
    )> {
        if config.database.url.is_empty() {
            warn!("No database configured, using in-memory registry");
            let repository = Arc::new(InMemoryRepository::new());
            let tokens: Arc<dyn TokenRepository> = repository.clone();
            let markets: Arc<dyn MarketRepository> = repository;
            return Ok((None, tokens, markets));
        }

        let database = Arc::new(DatabaseConnection::connect_with_retry(&config.database).await?);
        database.run_migrations().await?;

        let tokens: Arc<dyn TokenRepository> = Arc::new(PgTokenRepository::new(database.pool().clone()));
        let markets: Arc<dyn MarketRepository> = Arc::new(PgMarketRepository::new(database.pool().clone()));
        Ok((Some(database), tokens, markets))
    }

    /// Polls for new blocks until `shutdown` fires.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        if self.is_running {
            return Err(anyhow!("Searcher is already running"));
        }

        info!("Starting crossed market searcher");
        self.is_running = true;

        // Perform initial health checks
        self.perform_health_checks().await?;

        let listener = self.spawn_metrics_listener();
        let result = self.run_polling_loop(&shutdown).await;

        self.stop().await;
        listener.abort();
        result
    }

    async fn run_polling_loop(&mut self, shutdown: &CancellationToken) -> Result<()> {
        let poll_interval = Duration::from_millis(self.config.blockchain.poll_interval_ms.max(1));
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Watching for new blocks every {:?}", poll_interval);

        while self.is_running {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let block_number = match self.blockchain_client.get_block_number().await {
                Ok(block_number) => block_number,
                Err(e) => {
                    warn!("Failed to poll block number: {}", e);
                    continue;
                }
            };

            if !self.scheduler.is_newer(block_number) {
                continue;
            }

            debug!("New block {}", block_number);
            self.metrics.write().await.record_block(block_number);
            self.schedule_pass(block_number);
        }

        info!("Block polling stopped");
        Ok(())
    }

    fn schedule_pass(&mut self, block_number: u64) {
        let pipeline = self.pipeline.clone();
        let executor = self.executor.clone();

        self.scheduler.schedule(block_number, move |cancel| async move {
            let batch = pipeline.run(block_number, cancel.clone()).await?;
            let summary = PassSummary {
                opportunities: batch.opportunities.len(),
                best_profit: batch.best_profit(),
            };

            match summary.best_profit {
                Some(best_profit) => info!(
                    "Block {}: {} crossed markets, best profit {:.6} ETH",
                    block_number, summary.opportunities, best_profit
                ),
                None => debug!("Block {}: no crossed markets", block_number),
            }

            if !batch.opportunities.is_empty() && !cancel.is_cancelled() {
                executor.submit(batch);
            }

            Ok(summary)
        });
    }

    fn spawn_metrics_listener(&self) -> JoinHandle<()> {
        let mut events = self.scheduler.subscribe();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        match &event {
                            PassEvent::Failed { block, message } => {
                                error!("Evaluation pass for block {} failed: {}", block, message)
                            }
                            PassEvent::Cancelled { block } => debug!("Evaluation pass for block {} cancelled", block),
                            _ => {}
                        }
                        metrics.write().await.record_event(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Metrics listener skipped {} pass events", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn perform_health_checks(&self) -> Result<()> {
        info!("Performing health checks");

        // Check blockchain connection
        self.blockchain_client
            .health_check()
            .await
            .map_err(|e| anyhow!("Blockchain health check failed: {}", e))?;

        // Check database connection
        if let Some(database) = &self.database {
            database
                .health_check()
                .await
                .map_err(|e| anyhow!("Database health check failed: {}", e))?;
        }

        if self.pipeline.snapshots().load().is_empty() {
            return Err(anyhow!("No markets to watch"));
        }

        info!("All health checks passed");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if !self.is_running {
            return;
        }

        info!("Stopping crossed market searcher");
        self.is_running = false;
        self.scheduler.shutdown().await;

        if self.executor_task.is_finished() {
            warn!("Executor task already stopped");
        }

        if let Some(database) = &self.database {
            database.close().await;
        }

        info!("{}", self.metrics.read().await.generate_report());
    }
}
