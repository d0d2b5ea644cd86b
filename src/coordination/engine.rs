//! Polling engine that drives every non-terminal record forward

use super::lifecycle::AtomicTxProcessor;
use super::swap::SwapOrchestrator;
use crate::config::ProcessorConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::state::{AtomicTxState, Store, SwapState};

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Transaction states with work left to do, in lifecycle order
const ACTIVE_TX_STATES: [AtomicTxState; 5] = [
    AtomicTxState::New,
    AtomicTxState::Submitted,
    AtomicTxState::AwaitingSignature,
    AtomicTxState::Signed,
    AtomicTxState::Broadcast,
];

const ACTIVE_SWAP_STATES: [SwapState; 4] = [
    SwapState::New,
    SwapState::Exporting,
    SwapState::Exported,
    SwapState::Importing,
];

/// Swap processing engine
pub struct CoordinationEngine {
    /// Persisted records
    store: Arc<dyn Store>,
    /// Per-transaction lifecycle driver
    processor: Arc<AtomicTxProcessor>,
    /// Export/import pairing
    orchestrator: Arc<SwapOrchestrator>,
    /// Configuration
    config: ProcessorConfig,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
}

impl CoordinationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        processor: Arc<AtomicTxProcessor>,
        orchestrator: Arc<SwapOrchestrator>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            processor,
            orchestrator,
            config,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main processing loop
    pub async fn run(&self) -> RelayerResult<()> {
        let mut process_interval = interval(Duration::from_millis(self.config.poll_interval_ms));

        info!(
            "Coordination engine started (poll every {}ms, {} concurrent)",
            self.config.poll_interval_ms, self.config.max_concurrent
        );

        loop {
            if *self.shutdown.read().await {
                break;
            }

            process_interval.tick().await;
            if let Err(e) = self.run_pass().await {
                error!("Error in processing pass: {}", e);
            }
        }

        info!("Coordination engine stopped");
        Ok(())
    }

    /// One sweep over transactions, then swaps.
    ///
    /// Each sweep works from a snapshot taken before any record is touched,
    /// so a record is advanced at most once per sweep.
    pub async fn run_pass(&self) -> RelayerResult<()> {
        let started = Instant::now();
        let mut transactions = Vec::new();
        for state in ACTIVE_TX_STATES {
            transactions.extend(self.store.atomic_txs_in_state(state).await?);
        }
        if !transactions.is_empty() {
            debug!("Processing {} atomic transactions", transactions.len());
        }

        stream::iter(transactions)
            .for_each_concurrent(self.config.max_concurrent, |tx| async move {
                let id = tx.id();
                if let Err(e) = self.processor.process(tx).await {
                    log_outcome("atomic transaction", id, &e);
                }
            })
            .await;
        metrics::record_pass_latency("atomic_tx", started.elapsed().as_secs_f64());

        let started = Instant::now();
        let mut swaps = Vec::new();
        for state in ACTIVE_SWAP_STATES {
            swaps.extend(self.store.swaps_in_state(state).await?);
        }
        if !swaps.is_empty() {
            debug!("Processing {} swaps", swaps.len());
        }

        stream::iter(swaps)
            .for_each_concurrent(self.config.max_concurrent, |swap| async move {
                let id = swap.id();
                if let Err(e) = self.orchestrator.process_swap(swap).await {
                    log_outcome("swap", id, &e);
                }
            })
            .await;
        metrics::record_pass_latency("swap", started.elapsed().as_secs_f64());

        Ok(())
    }

    /// Stop the engine after the current pass
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Coordination engine shutdown initiated");
    }
}

fn log_outcome(entity: &str, id: uuid::Uuid, e: &RelayerError) {
    match e {
        RelayerError::StaleState { .. } => debug!("{} {} moved underneath us: {}", entity, id, e),
        e if e.is_retryable() => warn!("{} {} will be retried: {}", entity, id, e),
        e => error!("{} {} failed: {}", entity, id, e),
    }
}
