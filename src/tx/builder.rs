//! Builders for the four swap legs
//!
//! The codec accepts any structurally valid transaction. Everything about
//! whether a transaction makes sense (single exported output, non-empty
//! inputs, amounts covering fees) is checked here.

use super::atomic::{
    AvmExportTx, AvmImportTx, BaseTx, EvmExportTx, EvmImportTx, PlatformExportTx,
    PlatformImportTx,
};
use super::envelope::{AtomicTx, UnsignedTransaction, Utxo};
use super::fields::{
    EvmInput, EvmOutput, ShortId, SecpTransferInput, SecpTransferOutput, TransferableInput,
    TransferableOutput,
};
use crate::chain::{Chain, NetworkParams};
use crate::error::{RelayerError, RelayerResult};

use tracing::{debug, warn};

/// Longest memo the UTXO chains accept
pub const MAX_MEMO_LEN: usize = 256;

/// Who absorbs the fees of moving funds between chains.
///
/// Both behaviours exist in production flows: exports from the account chain
/// gross the amount up so the recipient nets exactly `amount`, while exports
/// from the UTXO chains deduct the export fee from `amount`, and the import fee
/// is deducted again on the way in. Which one is right depends on the ledger's
/// current fee schedule, so the choice stays explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePolicy {
    /// Export `amount + import fee`; sender also pays the export fee
    GrossUp,
    /// Debit exactly `amount`; the export fee comes out of it
    Deduct,
}

impl FeePolicy {
    /// Policy used by swaps leaving `source`
    pub fn for_source(source: Chain) -> Self {
        match source {
            Chain::C => FeePolicy::GrossUp,
            Chain::X | Chain::P => FeePolicy::Deduct,
        }
    }

    /// `(debited from sender, exported to destination)`.
    ///
    /// The exported amount must stay above `import_fee`, otherwise the
    /// destination could never import it.
    fn amounts(self, amount: u64, export_fee: u64, import_fee: u64) -> RelayerResult<(u64, u64)> {
        if amount == 0 {
            return Err(RelayerError::Build("amount must be positive".to_string()));
        }

        let overflow = || RelayerError::Build(format!("amount {} overflows with fees", amount));
        let (debited, exported) = match self {
            FeePolicy::GrossUp => {
                let exported = amount.checked_add(import_fee).ok_or_else(overflow)?;
                let debited = exported.checked_add(export_fee).ok_or_else(overflow)?;
                (debited, exported)
            }
            FeePolicy::Deduct => {
                if amount <= export_fee {
                    return Err(RelayerError::Build(format!(
                        "amount {} does not cover export fee {}",
                        amount, export_fee
                    )));
                }
                (amount, amount - export_fee)
            }
        };

        if exported <= import_fee {
            return Err(RelayerError::Build(format!(
                "exported amount {} does not cover import fee {}",
                exported, import_fee
            )));
        }
        Ok((debited, exported))
    }
}

/// Account-chain export parameters
#[derive(Debug, Clone)]
pub struct EvmExportRequest {
    pub from: ShortId,
    pub nonce: u64,
    pub to: ShortId,
    pub amount: u64,
    pub destination: Chain,
}

/// UTXO-chain export parameters
#[derive(Debug, Clone)]
pub struct UtxoExportRequest {
    pub source: Chain,
    /// Owner of the spent UTXOs; change returns here
    pub from: ShortId,
    pub to: ShortId,
    pub amount: u64,
    pub destination: Chain,
}

/// Import parameters: spend every atomic UTXO owned by `owner`
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: Chain,
    pub destination: Chain,
    pub owner: ShortId,
    /// Credited account (C) or short address (P/X)
    pub to: ShortId,
}

pub struct TxBuilder {
    params: NetworkParams,
}

impl TxBuilder {
    pub fn new(params: NetworkParams) -> Self {
        Self { params }
    }

    fn transferable_output(&self, amount: u64, to: ShortId) -> TransferableOutput {
        TransferableOutput {
            asset_id: self.params.avax_asset_id,
            output: SecpTransferOutput::to_address(amount, to),
        }
    }

    /// Export from the account chain to a UTXO chain
    pub fn evm_export(
        &self,
        request: &EvmExportRequest,
        policy: FeePolicy,
    ) -> RelayerResult<UnsignedTransaction> {
        if request.destination.is_account_model() {
            return Err(RelayerError::Build(
                "account-chain export must target a UTXO chain".to_string(),
            ));
        }

        let (debited, exported) = policy.amounts(
            request.amount,
            self.params.export_fee(Chain::C),
            self.params.import_fee(request.destination),
        )?;

        let tx = EvmExportTx {
            network_id: self.params.network_id,
            blockchain_id: self.params.chain_id(Chain::C),
            destination_chain: self.params.chain_id(request.destination),
            inputs: vec![EvmInput {
                debit: EvmOutput {
                    address: request.from,
                    amount: debited,
                    asset_id: self.params.avax_asset_id,
                },
                nonce: request.nonce,
            }],
            exported_outputs: vec![self.transferable_output(exported, request.to)],
        };

        debug!(
            "Built C-chain export of {} (debit {}) to {}-chain",
            exported, debited, request.destination
        );
        finish(AtomicTx::EvmExport(tx))
    }

    /// Export from a UTXO chain, spending `utxos` in order until the debit is covered
    pub fn utxo_export(
        &self,
        request: &UtxoExportRequest,
        utxos: &[Utxo],
        policy: FeePolicy,
    ) -> RelayerResult<UnsignedTransaction> {
        let (required, exported) = policy.amounts(
            request.amount,
            self.params.export_fee(request.source),
            self.params.import_fee(request.destination),
        )?;

        let mut inputs = Vec::new();
        let mut consumed: u64 = 0;
        for utxo in utxos {
            if consumed >= required {
                break;
            }
            let Some(input) = self.spend(utxo, &request.from) else {
                continue;
            };
            consumed = consumed.saturating_add(utxo.amount());
            inputs.push(input);
        }

        if consumed < required {
            return Err(RelayerError::Build(format!(
                "{}-chain UTXOs hold {} of the {} required",
                request.source, consumed, required
            )));
        }

        let change = consumed - required;
        let outputs = if change > 0 {
            vec![self.transferable_output(change, request.from)]
        } else {
            Vec::new()
        };
        sort_inputs(&mut inputs);

        let base = BaseTx {
            network_id: self.params.network_id,
            blockchain_id: self.params.chain_id(request.source),
            outputs,
            inputs,
            memo: memo(&format!(
                "{}-Chain export to {}-Chain",
                request.source, request.destination
            ))?,
        };
        let destination = self.params.chain_id(request.destination);
        let outs = vec![self.transferable_output(exported, request.to)];

        let tx = match request.source {
            Chain::P => AtomicTx::PlatformExport(PlatformExportTx::new(base, destination, outs)),
            Chain::X => AtomicTx::AvmExport(AvmExportTx::new(base, destination, outs)),
            Chain::C => {
                return Err(RelayerError::Build(
                    "use evm_export for exports from the account chain".to_string(),
                ))
            }
        };

        debug!(
            "Built {}-chain export of {} with {} change",
            request.source, exported, change
        );
        finish(tx)
    }

    /// Import every usable atomic UTXO into a UTXO chain, one output per UTXO
    pub fn utxo_import(
        &self,
        request: &ImportRequest,
        utxos: &[Utxo],
    ) -> RelayerResult<UnsignedTransaction> {
        let fee = self.params.import_fee(request.destination);
        let (ins, amounts) = self.collect_imports(request, utxos, fee)?;

        let outputs = amounts
            .iter()
            .map(|amount| self.transferable_output(amount - fee, request.to))
            .collect();

        let base = BaseTx {
            network_id: self.params.network_id,
            blockchain_id: self.params.chain_id(request.destination),
            outputs,
            inputs: Vec::new(),
            memo: memo(&format!(
                "{}-Chain import from {}-Chain",
                request.destination, request.source
            ))?,
        };
        let source = self.params.chain_id(request.source);

        let tx = match request.destination {
            Chain::P => AtomicTx::PlatformImport(PlatformImportTx::new(base, source, ins)),
            Chain::X => AtomicTx::AvmImport(AvmImportTx::new(base, source, ins)),
            Chain::C => {
                return Err(RelayerError::Build(
                    "use evm_import for imports into the account chain".to_string(),
                ))
            }
        };
        finish(tx)
    }

    /// Import every usable atomic UTXO into the account chain
    pub fn evm_import(
        &self,
        request: &ImportRequest,
        utxos: &[Utxo],
    ) -> RelayerResult<UnsignedTransaction> {
        if !request.destination.is_account_model() {
            return Err(RelayerError::Build(
                "use utxo_import for imports into a UTXO chain".to_string(),
            ));
        }

        let fee = self.params.import_fee(Chain::C);
        let (imported_inputs, amounts) = self.collect_imports(request, utxos, fee)?;

        let outs = amounts
            .iter()
            .map(|amount| EvmOutput {
                address: request.to,
                amount: amount - fee,
                asset_id: self.params.avax_asset_id,
            })
            .collect();

        finish(AtomicTx::EvmImport(EvmImportTx {
            network_id: self.params.network_id,
            blockchain_id: self.params.chain_id(Chain::C),
            source_chain: self.params.chain_id(request.source),
            imported_inputs,
            outs,
        }))
    }

    /// Import dispatch on the destination chain
    pub fn import(&self, request: &ImportRequest, utxos: &[Utxo]) -> RelayerResult<UnsignedTransaction> {
        if request.destination.is_account_model() {
            self.evm_import(request, utxos)
        } else {
            self.utxo_import(request, utxos)
        }
    }

    /// Sorted inputs and matching amounts for every UTXO worth importing
    fn collect_imports(
        &self,
        request: &ImportRequest,
        utxos: &[Utxo],
        fee: u64,
    ) -> RelayerResult<(Vec<TransferableInput>, Vec<u64>)> {
        let mut spends: Vec<(TransferableInput, u64)> = utxos
            .iter()
            .filter(|utxo| {
                if utxo.amount() <= fee {
                    warn!(
                        "Skipping atomic UTXO {}:{} worth {} (fee {})",
                        hex::encode(utxo.tx_id),
                        utxo.output_index,
                        utxo.amount(),
                        fee
                    );
                    return false;
                }
                true
            })
            .filter_map(|utxo| self.spend(utxo, &request.owner).map(|i| (i, utxo.amount())))
            .collect();

        if spends.is_empty() {
            return Err(RelayerError::Build(format!(
                "no importable {}-chain UTXOs on {}-chain",
                request.source, request.destination
            )));
        }

        spends.sort_by(|a, b| input_key(&a.0).cmp(&input_key(&b.0)));
        Ok(spends.into_iter().unzip())
    }

    /// Input spending `utxo` with `owner`'s signature, if `owner` alone can spend it
    fn spend(&self, utxo: &Utxo, owner: &ShortId) -> Option<TransferableInput> {
        if utxo.asset_id != self.params.avax_asset_id
            || utxo.output.locktime != 0
            || utxo.output.threshold != 1
        {
            return None;
        }
        let index = utxo.output.addresses.iter().position(|a| a == owner)?;

        Some(TransferableInput {
            tx_id: utxo.tx_id,
            output_index: utxo.output_index,
            asset_id: utxo.asset_id,
            input: SecpTransferInput {
                amount: utxo.amount(),
                address_indices: vec![index as u32],
            },
        })
    }
}

fn input_key(input: &TransferableInput) -> ([u8; 32], u32) {
    (input.tx_id, input.output_index)
}

fn sort_inputs(inputs: &mut [TransferableInput]) {
    inputs.sort_by_key(input_key);
}

fn memo(text: &str) -> RelayerResult<Vec<u8>> {
    if text.len() > MAX_MEMO_LEN {
        return Err(RelayerError::Build(format!(
            "memo of {} bytes exceeds {}",
            text.len(),
            MAX_MEMO_LEN
        )));
    }
    Ok(text.as_bytes().to_vec())
}

/// Check the list-of-one shapes the ledger requires, then wrap the transaction
fn finish(tx: AtomicTx) -> RelayerResult<UnsignedTransaction> {
    let single = |what: &str, len: usize| {
        if len == 1 {
            Ok(())
        } else {
            Err(RelayerError::Build(format!("expected exactly one {}, found {}", what, len)))
        }
    };
    let non_empty = |what: &str, len: usize| {
        if len > 0 {
            Ok(())
        } else {
            Err(RelayerError::Build(format!("transaction has no {}", what)))
        }
    };

    match &tx {
        AtomicTx::EvmExport(t) => {
            single("account input", t.inputs.len())?;
            single("exported output", t.exported_outputs.len())?;
        }
        AtomicTx::EvmImport(t) => {
            non_empty("imported input", t.imported_inputs.len())?;
            non_empty("account output", t.outs.len())?;
        }
        AtomicTx::AvmExport(t) => {
            non_empty("input", t.base.inputs.len())?;
            single("exported output", t.outs.len())?;
        }
        AtomicTx::PlatformExport(t) => {
            non_empty("input", t.base.inputs.len())?;
            single("exported output", t.outs.len())?;
        }
        AtomicTx::AvmImport(t) => non_empty("imported input", t.ins.len())?,
        AtomicTx::PlatformImport(t) => non_empty("imported input", t.ins.len())?,
    }

    Ok(UnsignedTransaction::new(tx))
}
