//! Persisted entities and their guarded state transitions
//!
//! Every mutable field of a record changes only through a transition method.
//! A transition whose source set does not contain the current state returns
//! [`RelayerError::IllegalTransition`] and leaves the record untouched.

use crate::chain::Chain;
use crate::error::{CodecResult, RelayerError, RelayerResult};
use crate::tx::UnsignedTransaction;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of one atomic transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicTxState {
    New,
    Submitted,
    AwaitingSignature,
    Signed,
    Broadcast,
    Confirmed,
    Rejected,
    Cancelled,
    Failed,
}

impl AtomicTxState {
    pub const ALL: [AtomicTxState; 9] = [
        AtomicTxState::New,
        AtomicTxState::Submitted,
        AtomicTxState::AwaitingSignature,
        AtomicTxState::Signed,
        AtomicTxState::Broadcast,
        AtomicTxState::Confirmed,
        AtomicTxState::Rejected,
        AtomicTxState::Cancelled,
        AtomicTxState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AtomicTxState::New => "new",
            AtomicTxState::Submitted => "submitted",
            AtomicTxState::AwaitingSignature => "awaiting_signature",
            AtomicTxState::Signed => "signed",
            AtomicTxState::Broadcast => "broadcast",
            AtomicTxState::Confirmed => "confirmed",
            AtomicTxState::Rejected => "rejected",
            AtomicTxState::Cancelled => "cancelled",
            AtomicTxState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AtomicTxState::Confirmed
                | AtomicTxState::Rejected
                | AtomicTxState::Cancelled
                | AtomicTxState::Failed
        )
    }

    /// Terminal without having reached the ledger
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AtomicTxState::Rejected | AtomicTxState::Cancelled | AtomicTxState::Failed
        )
    }
}

impl fmt::Display for AtomicTxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AtomicTxState {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| RelayerError::Internal(format!("unknown transaction state {}", s)))
    }
}

/// What a record was created to do. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIntent {
    pub from_path: String,
    pub from_address: String,
    pub to_path: String,
    pub to_address: String,
    /// nAVAX
    pub amount: u64,
    pub description: String,
    pub source_chain: Chain,
    pub destination_chain: Chain,
}

/// One export or import leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtomicTxRecord {
    pub(in crate::state) id: Uuid,
    pub(in crate::state) intent: TxIntent,
    /// CB58 unsigned envelope
    pub(in crate::state) unsigned_transaction: String,
    pub(in crate::state) custody_job_id: Option<String>,
    /// CB58 signed envelope
    pub(in crate::state) signed_transaction: Option<String>,
    pub(in crate::state) ledger_tx_id: Option<String>,
    pub(in crate::state) state: AtomicTxState,
    /// Consecutive failed remote calls in the current state
    pub(in crate::state) attempts: u32,
    pub(in crate::state) last_error: Option<String>,
    pub(in crate::state) created_at: DateTime<Utc>,
    pub(in crate::state) updated_at: DateTime<Utc>,
}

impl AtomicTxRecord {
    pub fn new(intent: TxIntent, unsigned: &UnsignedTransaction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            intent,
            unsigned_transaction: unsigned.to_cb58(),
            custody_job_id: None,
            signed_transaction: None,
            ledger_tx_id: None,
            state: AtomicTxState::New,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn intent(&self) -> &TxIntent {
        &self.intent
    }

    pub fn state(&self) -> AtomicTxState {
        self.state
    }

    /// Decode the stored unsigned envelope. Corruption is an error, never `None`.
    pub fn unsigned(&self) -> CodecResult<UnsignedTransaction> {
        UnsignedTransaction::from_cb58(&self.unsigned_transaction)
    }

    /// Raw bytes of the stored signed envelope
    #[cfg(test)]
    pub fn signed_bytes(&self) -> CodecResult<Option<Vec<u8>>> {
        self.signed_transaction
            .as_deref()
            .map(crate::codec::cb58::decode)
            .transpose()
    }

    pub fn custody_job_id(&self) -> Option<&str> {
        self.custody_job_id.as_deref()
    }

    pub fn signed_transaction(&self) -> Option<&str> {
        self.signed_transaction.as_deref()
    }

    pub fn ledger_tx_id(&self) -> Option<&str> {
        self.ledger_tx_id.as_deref()
    }

    #[cfg(test)]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[cfg(test)]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn submit(&mut self) -> RelayerResult<()> {
        self.advance("submit", &[AtomicTxState::New], AtomicTxState::Submitted)
    }

    pub fn queue(&mut self, custody_job_id: String) -> RelayerResult<()> {
        self.advance(
            "queue",
            &[AtomicTxState::Submitted],
            AtomicTxState::AwaitingSignature,
        )?;
        self.custody_job_id = Some(custody_job_id);
        Ok(())
    }

    pub fn sign(&mut self, signed_transaction: String) -> RelayerResult<()> {
        self.advance(
            "sign",
            &[AtomicTxState::AwaitingSignature],
            AtomicTxState::Signed,
        )?;
        self.signed_transaction = Some(signed_transaction);
        Ok(())
    }

    pub fn broadcast(&mut self) -> RelayerResult<()> {
        self.advance("broadcast", &[AtomicTxState::Signed], AtomicTxState::Broadcast)
    }

    pub fn confirm(&mut self, ledger_tx_id: String) -> RelayerResult<()> {
        self.advance("confirm", &[AtomicTxState::Broadcast], AtomicTxState::Confirmed)?;
        self.ledger_tx_id = Some(ledger_tx_id);
        Ok(())
    }

    pub fn reject(&mut self) -> RelayerResult<()> {
        self.advance("reject", &[AtomicTxState::New], AtomicTxState::Rejected)
    }

    pub fn cancel(&mut self) -> RelayerResult<()> {
        self.advance("cancel", &[AtomicTxState::New], AtomicTxState::Cancelled)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> RelayerResult<()> {
        self.advance(
            "fail",
            &[
                AtomicTxState::New,
                AtomicTxState::Submitted,
                AtomicTxState::AwaitingSignature,
                AtomicTxState::Broadcast,
            ],
            AtomicTxState::Failed,
        )?;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Count a failed remote call without changing state
    pub fn record_attempt(&mut self, error: impl Into<String>) -> RelayerResult<u32> {
        if self.state.is_terminal() {
            return Err(self.illegal("record_attempt"));
        }
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
        Ok(self.attempts)
    }

    fn advance(
        &mut self,
        transition: &str,
        sources: &[AtomicTxState],
        target: AtomicTxState,
    ) -> RelayerResult<()> {
        if !sources.contains(&self.state) {
            return Err(self.illegal(transition));
        }
        self.state = target;
        self.attempts = 0;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `IllegalTransition` for `transition` from the current state
    pub(crate) fn illegal(&self, transition: &str) -> RelayerError {
        RelayerError::IllegalTransition {
            entity: "atomic transaction",
            id: self.id.to_string(),
            from: self.state.to_string(),
            transition: transition.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    New,
    Exporting,
    Exported,
    Importing,
    Complete,
    Failed,
}

impl SwapState {
    pub const ALL: [SwapState; 6] = [
        SwapState::New,
        SwapState::Exporting,
        SwapState::Exported,
        SwapState::Importing,
        SwapState::Complete,
        SwapState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapState::New => "new",
            SwapState::Exporting => "exporting",
            SwapState::Exported => "exported",
            SwapState::Importing => "importing",
            SwapState::Complete => "complete",
            SwapState::Failed => "failed",
        }
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapState {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| RelayerError::Internal(format!("unknown swap state {}", s)))
    }
}

/// An export leg paired with the import that completes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapRecord {
    pub(in crate::state) id: Uuid,
    pub(in crate::state) source_chain: Chain,
    pub(in crate::state) destination_chain: Chain,
    pub(in crate::state) export_tx_id: Uuid,
    pub(in crate::state) import_tx_id: Option<Uuid>,
    pub(in crate::state) state: SwapState,
    pub(in crate::state) created_at: DateTime<Utc>,
    pub(in crate::state) updated_at: DateTime<Utc>,
}

impl SwapRecord {
    pub fn new(export: &AtomicTxRecord) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_chain: export.intent.source_chain,
            destination_chain: export.intent.destination_chain,
            export_tx_id: export.id,
            import_tx_id: None,
            state: SwapState::New,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source_chain(&self) -> Chain {
        self.source_chain
    }

    pub fn destination_chain(&self) -> Chain {
        self.destination_chain
    }

    pub fn export_tx_id(&self) -> Uuid {
        self.export_tx_id
    }

    pub fn import_tx_id(&self) -> Option<Uuid> {
        self.import_tx_id
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn exporting(&mut self) -> RelayerResult<()> {
        self.advance("exporting", &[SwapState::New], SwapState::Exporting)
    }

    pub fn exported(&mut self, export: &AtomicTxRecord) -> RelayerResult<()> {
        if export.id != self.export_tx_id || export.state != AtomicTxState::Confirmed {
            return Err(self.illegal("exported (export not confirmed)"));
        }
        self.advance("exported", &[SwapState::Exporting], SwapState::Exported)
    }

    /// Link the import leg. Allowed once, while `Exported`.
    pub fn attach_import(&mut self, import: &AtomicTxRecord) -> RelayerResult<()> {
        if self.state != SwapState::Exported || self.import_tx_id.is_some() {
            return Err(self.illegal("attach_import"));
        }
        self.import_tx_id = Some(import.id);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn importing(&mut self) -> RelayerResult<()> {
        if self.import_tx_id.is_none() {
            return Err(self.illegal("importing (no import)"));
        }
        self.advance("importing", &[SwapState::Exported], SwapState::Importing)
    }

    pub fn complete(&mut self, import: &AtomicTxRecord) -> RelayerResult<()> {
        if self.import_tx_id != Some(import.id) || import.state != AtomicTxState::Confirmed {
            return Err(self.illegal("complete (import not confirmed)"));
        }
        self.advance("complete", &[SwapState::Importing], SwapState::Complete)
    }

    pub fn fail(&mut self) -> RelayerResult<()> {
        self.advance(
            "fail",
            &[SwapState::Exporting, SwapState::Importing],
            SwapState::Failed,
        )
    }

    /// True once either leg has ended without reaching the ledger
    pub fn should_fail(&self, export: &AtomicTxRecord, import: Option<&AtomicTxRecord>) -> bool {
        export.state.is_failure() || import.map_or(false, |tx| tx.state.is_failure())
    }

    fn advance(
        &mut self,
        transition: &str,
        sources: &[SwapState],
        target: SwapState,
    ) -> RelayerResult<()> {
        if !sources.contains(&self.state) {
            return Err(self.illegal(transition));
        }
        self.state = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `IllegalTransition` for `transition` from the current state
    pub(crate) fn illegal(&self, transition: &str) -> RelayerError {
        RelayerError::IllegalTransition {
            entity: "swap",
            id: self.id.to_string(),
            from: self.state.to_string(),
            transition: transition.to_string(),
        }
    }
}
