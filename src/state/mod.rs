//! State management with PostgreSQL persistence
//!
//! Handles:
//! - Atomic transaction and swap records with guarded transitions
//! - Compare-and-swap updates so one row has at most one writer
//! - Creating a swap together with its export leg, and attaching its import leg
//! - Per-state statistics

mod manager;
#[cfg(test)]
mod memory;
pub mod model;

pub use manager::PgStore;
#[cfg(test)]
pub use memory::MemoryStore;
pub use model::{AtomicTxRecord, AtomicTxState, SwapRecord, SwapState, TxIntent};

use crate::error::RelayerResult;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Record counts keyed by state name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub transactions: BTreeMap<String, u64>,
    pub swaps: BTreeMap<String, u64>,
}

/// Durable storage for transaction and swap records
///
/// Every update takes the state the caller read the record in. The write
/// applies only while the stored row is still in that state; otherwise it
/// fails with `StaleState` and nothing changes.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_atomic_tx(&self, id: Uuid) -> RelayerResult<AtomicTxRecord>;

    /// Oldest first
    async fn atomic_txs_in_state(&self, state: AtomicTxState)
        -> RelayerResult<Vec<AtomicTxRecord>>;

    async fn update_atomic_tx(
        &self,
        tx: &AtomicTxRecord,
        expected: AtomicTxState,
    ) -> RelayerResult<()>;

    /// Persist a swap and its export leg together
    async fn create_swap(&self, export: &AtomicTxRecord, swap: &SwapRecord) -> RelayerResult<()>;

    async fn get_swap(&self, id: Uuid) -> RelayerResult<SwapRecord>;

    /// Oldest first
    async fn swaps_in_state(&self, state: SwapState) -> RelayerResult<Vec<SwapRecord>>;

    async fn update_swap(&self, swap: &SwapRecord, expected: SwapState) -> RelayerResult<()>;

    /// Persist an import leg and the swap that now references it, together
    async fn attach_import(
        &self,
        swap: &SwapRecord,
        import: &AtomicTxRecord,
        expected: SwapState,
    ) -> RelayerResult<()>;

    async fn stats(&self) -> RelayerResult<StoreStats>;

    async fn health_check(&self) -> RelayerResult<()>;
}
