//! Swap orchestration: pair an export leg with the import that completes it

use crate::chain::{Chain, LedgerRpc};
use crate::custody::KeyRing;
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::state::{AtomicTxRecord, AtomicTxState, Store, SwapRecord, SwapState, TxIntent};
use crate::tx::{EvmExportRequest, FeePolicy, ImportRequest, TxBuilder, UtxoExportRequest};

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ENTITY: &str = "swap";

/// Move `amount` nAVAX from the key at `from_path` on `source_chain` to the
/// key at `to_path` on `destination_chain`
#[derive(Debug, Clone, Deserialize)]
pub struct SwapRequest {
    pub source_chain: Chain,
    pub destination_chain: Chain,
    pub from_path: String,
    pub to_path: String,
    pub amount: u64,
}

pub struct SwapOrchestrator {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerRpc>,
    keys: Arc<KeyRing>,
    builder: TxBuilder,
}

impl SwapOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn LedgerRpc>,
        keys: Arc<KeyRing>,
        builder: TxBuilder,
    ) -> Self {
        Self {
            store,
            ledger,
            keys,
            builder,
        }
    }

    /// Build the export leg and persist it together with a new swap
    pub async fn create_swap(&self, request: &SwapRequest) -> RelayerResult<SwapRecord> {
        let source = request.source_chain;
        let destination = request.destination_chain;
        if source == destination {
            return Err(RelayerError::Build(format!(
                "swap source and destination are both {}-chain",
                source
            )));
        }
        if request.amount == 0 || i64::try_from(request.amount).is_err() {
            return Err(RelayerError::Build(format!(
                "swap amount {} out of range",
                request.amount
            )));
        }

        let from = self.keys.get(&request.from_path)?;
        let to = self.keys.get(&request.to_path)?;
        let policy = FeePolicy::for_source(source);

        let unsigned = if source.is_account_model() {
            let nonce = self.ledger.evm_nonce(from.evm_address).await?;
            self.builder.evm_export(
                &EvmExportRequest {
                    from: from.evm_address,
                    nonce,
                    to: to.short_id,
                    amount: request.amount,
                    destination,
                },
                policy,
            )?
        } else {
            let utxos = self
                .ledger
                .get_utxos(source, vec![from.chain_address(source)], None)
                .await?;
            self.builder.utxo_export(
                &UtxoExportRequest {
                    source,
                    from: from.short_id,
                    to: to.short_id,
                    amount: request.amount,
                    destination,
                },
                &utxos,
                policy,
            )?
        };

        let intent = TxIntent {
            from_path: request.from_path.clone(),
            from_address: from.display_address(source),
            to_path: request.to_path.clone(),
            to_address: to.chain_address(destination),
            amount: request.amount,
            description: format!("{}-Chain export to {}-Chain", source, destination),
            source_chain: source,
            destination_chain: destination,
        };

        let export = AtomicTxRecord::new(intent, &unsigned);
        let swap = SwapRecord::new(&export);
        self.store.create_swap(&export, &swap).await?;

        info!(
            "Created swap {} ({}-chain -> {}-chain, {} nAVAX) with export {}",
            swap.id(),
            source,
            destination,
            request.amount,
            export.id()
        );
        Ok(swap)
    }

    /// Advance a swap as far as its legs allow in one pass
    pub async fn process_swap(&self, mut swap: SwapRecord) -> RelayerResult<SwapRecord> {
        loop {
            let state = swap.state();
            let import = swap.import_tx_id();
            swap = self.step(swap).await?;
            if swap.state() == state && swap.import_tx_id() == import {
                return Ok(swap);
            }
        }
    }

    async fn step(&self, mut swap: SwapRecord) -> RelayerResult<SwapRecord> {
        let expected = swap.state();
        match expected {
            SwapState::New => swap.exporting()?,
            SwapState::Exporting => {
                let export = self.store.get_atomic_tx(swap.export_tx_id()).await?;
                if swap.should_fail(&export, None) {
                    warn!(
                        "Swap {} failing: export {} is {}",
                        swap.id(),
                        export.id(),
                        export.state()
                    );
                    swap.fail()?;
                } else if export.state() == AtomicTxState::Confirmed {
                    swap.exported(&export)?;
                } else {
                    return Ok(swap);
                }
            }
            SwapState::Exported => match swap.import_tx_id() {
                None => return self.create_import(swap).await,
                Some(_) => swap.importing()?,
            },
            SwapState::Importing => {
                let export = self.store.get_atomic_tx(swap.export_tx_id()).await?;
                let import_id = swap.import_tx_id().ok_or_else(|| {
                    RelayerError::Internal(format!("swap {} importing without import", swap.id()))
                })?;
                let import = self.store.get_atomic_tx(import_id).await?;

                if swap.should_fail(&export, Some(&import)) {
                    warn!(
                        "Swap {} failing: import {} is {}",
                        swap.id(),
                        import.id(),
                        import.state()
                    );
                    swap.fail()?;
                } else if import.state() == AtomicTxState::Confirmed {
                    swap.complete(&import)?;
                } else {
                    return Ok(swap);
                }
            }
            SwapState::Complete | SwapState::Failed => return Ok(swap),
        }

        self.store.update_swap(&swap, expected).await?;
        metrics::record_transition(ENTITY, swap.state().as_str());
        if swap.state() == SwapState::Failed {
            metrics::record_failure(ENTITY);
        }
        info!("Swap {}: {} -> {}", swap.id(), expected, swap.state());
        Ok(swap)
    }

    /// Build the import leg from the destination chain's atomic UTXOs.
    ///
    /// The swap stays `Exported` until the exported funds show up.
    async fn create_import(&self, mut swap: SwapRecord) -> RelayerResult<SwapRecord> {
        let export = self.store.get_atomic_tx(swap.export_tx_id()).await?;
        let source = swap.source_chain();
        let destination = swap.destination_chain();
        let owner = self.keys.get(&export.intent().to_path)?;

        let utxos = match self
            .ledger
            .get_utxos(destination, vec![owner.chain_address(destination)], Some(source))
            .await
        {
            Ok(utxos) => utxos,
            Err(e) if e.is_retryable() => {
                warn!("Swap {}: atomic UTXO lookup failed: {}", swap.id(), e);
                return Ok(swap);
            }
            Err(e) => return Err(e),
        };

        if utxos.is_empty() {
            debug!(
                "Swap {}: no atomic UTXOs on {}-chain yet",
                swap.id(),
                destination
            );
            return Ok(swap);
        }

        let request = ImportRequest {
            source,
            destination,
            owner: owner.short_id,
            to: if destination.is_account_model() {
                owner.evm_address
            } else {
                owner.short_id
            },
        };
        let unsigned = match self.builder.import(&request, &utxos) {
            Ok(unsigned) => unsigned,
            Err(e) => {
                warn!("Swap {}: import not buildable yet: {}", swap.id(), e);
                return Ok(swap);
            }
        };

        let intent = TxIntent {
            from_path: export.intent().to_path.clone(),
            from_address: owner.chain_address(destination),
            to_path: export.intent().to_path.clone(),
            to_address: owner.display_address(destination),
            amount: export.intent().amount,
            description: format!("{}-Chain import from {}-Chain", destination, source),
            source_chain: source,
            destination_chain: destination,
        };
        let import = AtomicTxRecord::new(intent, &unsigned);

        swap.attach_import(&import)?;
        self.store
            .attach_import(&swap, &import, SwapState::Exported)
            .await?;
        info!("Swap {}: import {} created", swap.id(), import.id());
        Ok(swap)
    }
}
