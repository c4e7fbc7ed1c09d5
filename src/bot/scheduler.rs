use anyhow::Result;
use std::future::Future;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    pub opportunities: usize,
    pub best_profit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassEvent {
    Started { block: u64 },
    Completed { block: u64, summary: PassSummary },
    Failed { block: u64, message: String },
    Cancelled { block: u64 },
}

struct InFlightPass {
    block: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs one evaluation pass per new block. A newer block cancels the pass
/// still running for an older one; blocks that are not newer than the last
/// scheduled block are ignored.
pub struct BlockScheduler {
    latest_block: Option<u64>,
    in_flight: Option<InFlightPass>,
    event_sender: broadcast::Sender<PassEvent>,
}

impl BlockScheduler {
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(100);

        Self {
            latest_block: None,
            in_flight: None,
            event_sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PassEvent> {
        self.event_sender.subscribe()
    }

    pub fn latest_block(&self) -> Option<u64> {
        self.latest_block
    }

    pub fn is_newer(&self, block: u64) -> bool {
        self.latest_block.map_or(true, |latest| block > latest)
    }

    /// Starts `pass` for `block`, returning false when the block was ignored.
    pub fn schedule<F, Fut>(&mut self, block: u64, pass: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<PassSummary>> + Send + 'static,
    {
        if !self.is_newer(block) {
            debug!("Ignoring block {}, already scheduled {:?}", block, self.latest_block);
            return false;
        }
        self.latest_block = Some(block);
        self.cancel_in_flight();

        let cancel = CancellationToken::new();
        let future = pass(cancel.clone());
        let events = self.event_sender.clone();
        let pass_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let _ = events.send(PassEvent::Started { block });

            let event = tokio::select! {
                biased;
                _ = pass_cancel.cancelled() => PassEvent::Cancelled { block },
                result = future => match result {
                    Ok(summary) => PassEvent::Completed { block, summary },
                    Err(_) if pass_cancel.is_cancelled() => PassEvent::Cancelled { block },
                    Err(e) => PassEvent::Failed {
                        block,
                        message: e.to_string(),
                    },
                },
            };

            let _ = events.send(event);
        });

        self.in_flight = Some(InFlightPass { block, cancel, handle });
        true
    }

    pub fn cancel_in_flight(&mut self) {
        if let Some(pass) = self.in_flight.take() {
            if !pass.handle.is_finished() {
                info!("Cancelling evaluation pass for block {}", pass.block);
            }
            pass.cancel.cancel();
        }
    }

    /// Cancels the running pass and waits for its task to wind down.
    pub async fn shutdown(&mut self) {
        if let Some(pass) = self.in_flight.take() {
            pass.cancel.cancel();
            if let Err(e) = pass.handle.await {
                warn!("Pass task for block {} ended abnormally: {}", pass.block, e);
            }
        }
    }
}

impl Default for BlockScheduler {
    fn default() -> Self {
        Self::new()
    }
}
