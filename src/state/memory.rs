//! In-process store backing the unit tests

use super::{AtomicTxRecord, AtomicTxState, Store, StoreStats, SwapRecord, SwapState};
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// `DashMap`-backed [`Store`] with the same compare-and-swap semantics as
/// the database
#[derive(Default)]
pub struct MemoryStore {
    transactions: DashMap<Uuid, AtomicTxRecord>,
    swaps: DashMap<Uuid, SwapRecord>,
    /// Serialises writes that touch both maps
    pair_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a lone transaction record, outside any swap
    pub async fn insert_atomic_tx(&self, tx: &AtomicTxRecord) -> RelayerResult<()> {
        let _guard = self.lock()?;
        self.insert_new(tx)
    }

    fn check_unique(&self, tx: &AtomicTxRecord) -> RelayerResult<()> {
        let clash = self.transactions.iter().any(|other| {
            other.id != tx.id
                && ((tx.custody_job_id.is_some() && other.custody_job_id == tx.custody_job_id)
                    || (tx.ledger_tx_id.is_some() && other.ledger_tx_id == tx.ledger_tx_id))
        });

        if clash {
            return Err(RelayerError::Internal(format!(
                "duplicate custody job or ledger id on {}",
                tx.id
            )));
        }
        Ok(())
    }

    fn insert_new(&self, tx: &AtomicTxRecord) -> RelayerResult<()> {
        self.check_unique(tx)?;
        match self.transactions.entry(tx.id) {
            Entry::Occupied(_) => Err(RelayerError::Internal(format!(
                "atomic transaction {} already exists",
                tx.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
                Ok(())
            }
        }
    }

    fn lock(&self) -> RelayerResult<std::sync::MutexGuard<'_, ()>> {
        self.pair_lock
            .lock()
            .map_err(|_| RelayerError::Internal("memory store lock poisoned".to_string()))
    }
}

fn oldest_first<T>(
    items: impl Iterator<Item = T>,
    created_at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(created_at);
    items
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_atomic_tx(&self, id: Uuid) -> RelayerResult<AtomicTxRecord> {
        self.transactions
            .get(&id)
            .map(|tx| tx.clone())
            .ok_or_else(|| RelayerError::NotFound {
                entity: "atomic transaction",
                id: id.to_string(),
            })
    }

    async fn atomic_txs_in_state(
        &self,
        state: AtomicTxState,
    ) -> RelayerResult<Vec<AtomicTxRecord>> {
        Ok(oldest_first(
            self.transactions
                .iter()
                .filter(|tx| tx.state == state)
                .map(|tx| tx.clone()),
            |tx| tx.created_at,
        ))
    }

    async fn update_atomic_tx(
        &self,
        tx: &AtomicTxRecord,
        expected: AtomicTxState,
    ) -> RelayerResult<()> {
        let _guard = self.lock()?;
        self.check_unique(tx)?;

        let mut stored = self
            .transactions
            .get_mut(&tx.id)
            .ok_or_else(|| RelayerError::NotFound {
                entity: "atomic transaction",
                id: tx.id.to_string(),
            })?;

        if stored.state != expected {
            return Err(RelayerError::StaleState {
                entity: "atomic transaction",
                id: tx.id.to_string(),
                expected: expected.to_string(),
            });
        }

        *stored = tx.clone();
        Ok(())
    }

    async fn create_swap(&self, export: &AtomicTxRecord, swap: &SwapRecord) -> RelayerResult<()> {
        let _guard = self.lock()?;
        if self.swaps.contains_key(&swap.id) {
            return Err(RelayerError::Internal(format!(
                "swap {} already exists",
                swap.id
            )));
        }
        self.insert_new(export)?;
        self.swaps.insert(swap.id, swap.clone());
        Ok(())
    }

    async fn get_swap(&self, id: Uuid) -> RelayerResult<SwapRecord> {
        self.swaps
            .get(&id)
            .map(|swap| swap.clone())
            .ok_or_else(|| RelayerError::NotFound {
                entity: "swap",
                id: id.to_string(),
            })
    }

    async fn swaps_in_state(&self, state: SwapState) -> RelayerResult<Vec<SwapRecord>> {
        Ok(oldest_first(
            self.swaps
                .iter()
                .filter(|swap| swap.state == state)
                .map(|swap| swap.clone()),
            |swap| swap.created_at,
        ))
    }

    async fn update_swap(&self, swap: &SwapRecord, expected: SwapState) -> RelayerResult<()> {
        let _guard = self.lock()?;
        let mut stored = self
            .swaps
            .get_mut(&swap.id)
            .ok_or_else(|| RelayerError::NotFound {
                entity: "swap",
                id: swap.id.to_string(),
            })?;

        if stored.state != expected {
            return Err(RelayerError::StaleState {
                entity: "swap",
                id: swap.id.to_string(),
                expected: expected.to_string(),
            });
        }

        *stored = swap.clone();
        Ok(())
    }

    async fn attach_import(
        &self,
        swap: &SwapRecord,
        import: &AtomicTxRecord,
        expected: SwapState,
    ) -> RelayerResult<()> {
        let _guard = self.lock()?;
        {
            let stored = self.swaps.get(&swap.id).ok_or_else(|| RelayerError::NotFound {
                entity: "swap",
                id: swap.id.to_string(),
            })?;
            if stored.state != expected || stored.import_tx_id.is_some() {
                return Err(RelayerError::StaleState {
                    entity: "swap",
                    id: swap.id.to_string(),
                    expected: expected.to_string(),
                });
            }
        }

        self.insert_new(import)?;
        self.swaps.insert(swap.id, swap.clone());
        Ok(())
    }

    async fn stats(&self) -> RelayerResult<StoreStats> {
        let mut stats = StoreStats::default();
        for tx in self.transactions.iter() {
            *stats
                .transactions
                .entry(tx.state.as_str().to_string())
                .or_default() += 1;
        }
        for swap in self.swaps.iter() {
            *stats
                .swaps
                .entry(swap.state.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::model::tests::{export_record, import_record};

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();
        let mut tx = export_record();
        store.insert_atomic_tx(&tx).await.unwrap();

        tx.submit().unwrap();
        store
            .update_atomic_tx(&tx, AtomicTxState::New)
            .await
            .unwrap();

        // A second writer that also read `New` loses
        let mut stale = tx.clone();
        stale.state = AtomicTxState::New;
        stale.submit().unwrap();
        let result = store.update_atomic_tx(&stale, AtomicTxState::New).await;
        assert!(matches!(result, Err(RelayerError::StaleState { .. })));

        let stored = store.get_atomic_tx(tx.id()).await.unwrap();
        assert_eq!(stored.state(), AtomicTxState::Submitted);
    }

    #[tokio::test]
    async fn test_unique_custody_job() {
        let store = MemoryStore::new();
        let mut first = export_record();
        let mut second = export_record();
        store.insert_atomic_tx(&first).await.unwrap();
        store.insert_atomic_tx(&second).await.unwrap();

        first.submit().unwrap();
        first.queue("job-1".to_string()).unwrap();
        store
            .update_atomic_tx(&first, AtomicTxState::New)
            .await
            .unwrap();

        second.submit().unwrap();
        second.queue("job-1".to_string()).unwrap();
        assert!(store
            .update_atomic_tx(&second, AtomicTxState::New)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_swap_creation_and_attach() {
        let store = MemoryStore::new();
        let export = export_record();
        let mut swap = SwapRecord::new(&export);
        store.create_swap(&export, &swap).await.unwrap();
        assert!(store.get_atomic_tx(export.id()).await.is_ok());

        swap.state = SwapState::Exported;
        store.update_swap(&swap, SwapState::New).await.unwrap();

        let import = import_record();
        swap.attach_import(&import).unwrap();
        store
            .attach_import(&swap, &import, SwapState::Exported)
            .await
            .unwrap();

        // Attaching twice is refused and leaves no orphan
        let orphan = import_record();
        let result = store.attach_import(&swap, &orphan, SwapState::Exported).await;
        assert!(matches!(result, Err(RelayerError::StaleState { .. })));
        assert!(store.get_atomic_tx(orphan.id()).await.is_err());

        let stored = store.get_swap(swap.id()).await.unwrap();
        assert_eq!(stored.import_tx_id(), Some(import.id()));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.transactions.get("new"), Some(&2));
        assert_eq!(stats.swaps.get("exported"), Some(&1));
    }

    #[tokio::test]
    async fn test_missing_records() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_swap(Uuid::new_v4()).await,
            Err(RelayerError::NotFound { entity: "swap", .. })
        ));
        assert!(store
            .atomic_txs_in_state(AtomicTxState::New)
            .await
            .unwrap()
            .is_empty());
    }
}
