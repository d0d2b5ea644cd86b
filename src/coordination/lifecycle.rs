//! Driving operations for the atomic transaction lifecycle
//!
//! Each operation reads a record, applies a guarded transition, persists it
//! with compare-and-swap, and only then performs the remote call. A failed
//! remote call never rolls back the state already written.

use crate::chain::LedgerRpc;
use crate::custody::{CustodySigner, KeyRing, SigningPoll, SigningRequest};
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::state::{AtomicTxRecord, AtomicTxState, Store};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

const ENTITY: &str = "atomic_tx";

/// Moves atomic transactions from `New` to `Confirmed`
pub struct AtomicTxProcessor {
    store: Arc<dyn Store>,
    custody: Arc<dyn CustodySigner>,
    ledger: Arc<dyn LedgerRpc>,
    keys: Arc<KeyRing>,
    max_attempts: Option<u32>,
}

impl AtomicTxProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        custody: Arc<dyn CustodySigner>,
        ledger: Arc<dyn LedgerRpc>,
        keys: Arc<KeyRing>,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            store,
            custody,
            ledger,
            keys,
            max_attempts,
        }
    }

    /// Apply whichever operation matches the record's current state
    pub async fn process(&self, tx: AtomicTxRecord) -> RelayerResult<AtomicTxRecord> {
        match tx.state() {
            AtomicTxState::New | AtomicTxState::Submitted => self.send_for_signing(tx).await,
            AtomicTxState::AwaitingSignature => self.check_for_signature(tx).await,
            AtomicTxState::Signed | AtomicTxState::Broadcast => {
                self.broadcast_transaction(tx).await
            }
            _ => Ok(tx),
        }
    }

    /// Hand the unsigned envelope's hash to custody.
    ///
    /// From `New` the record is persisted as `Submitted` before custody is
    /// called. From `Submitted` custody is only asked for a job it already
    /// holds under the record id; nothing is submitted twice.
    pub async fn send_for_signing(&self, mut tx: AtomicTxRecord) -> RelayerResult<AtomicTxRecord> {
        match tx.state() {
            AtomicTxState::New => {
                let hash = tx.unsigned()?.hash();
                if let Err(e) = self.keys.get(&tx.intent().from_path) {
                    return self.fail(tx, e).await;
                }

                tx.submit()?;
                self.store
                    .update_atomic_tx(&tx, AtomicTxState::New)
                    .await?;
                metrics::record_transition(ENTITY, tx.state().as_str());

                let request = SigningRequest {
                    request_id: tx.id().to_string(),
                    derivation_path: tx.intent().from_path.clone(),
                    message_hash: hash,
                    note: tx.intent().description.clone(),
                };

                match self.custody.submit_for_signing(&request).await {
                    Ok(job_id) => {
                        metrics::record_remote_call("custody", true);
                        self.queue(tx, job_id).await
                    }
                    Err(e) => {
                        metrics::record_remote_call("custody", false);
                        self.retry_later(tx, e).await
                    }
                }
            }
            AtomicTxState::Submitted => {
                let request_id = tx.id().to_string();
                match self.custody.find_by_request(&request_id).await {
                    Ok(Some(job_id)) => {
                        metrics::record_remote_call("custody", true);
                        self.queue(tx, job_id).await
                    }
                    Ok(None) => {
                        metrics::record_remote_call("custody", true);
                        let e = RelayerError::CustodyFailed {
                            job_id: request_id,
                            reason: "no signing job recorded for this request".to_string(),
                        };
                        self.retry_later(tx, e).await
                    }
                    Err(e) => {
                        metrics::record_remote_call("custody", false);
                        self.retry_later(tx, e).await
                    }
                }
            }
            _ => Err(tx.illegal("send_for_signing")),
        }
    }

    /// Poll custody; a returned signature must recover to the sender's key
    pub async fn check_for_signature(
        &self,
        mut tx: AtomicTxRecord,
    ) -> RelayerResult<AtomicTxRecord> {
        if tx.state() != AtomicTxState::AwaitingSignature {
            return Err(tx.illegal("check_for_signature"));
        }
        let job_id = tx
            .custody_job_id()
            .ok_or_else(|| RelayerError::Internal(format!("{} has no custody job", tx.id())))?
            .to_string();

        let poll = match self.custody.poll(&job_id).await {
            Ok(poll) => {
                metrics::record_remote_call("custody", true);
                poll
            }
            Err(e) => {
                metrics::record_remote_call("custody", false);
                return self.retry_later(tx, e).await;
            }
        };

        match poll {
            SigningPoll::Pending => {
                debug!("Transaction {} still awaiting signature ({})", tx.id(), job_id);
                Ok(tx)
            }
            SigningPoll::PermanentFailure(reason) => {
                self.fail(tx, RelayerError::CustodyFailed { job_id, reason })
                    .await
            }
            SigningPoll::Signed(raw) => {
                let unsigned = tx.unsigned()?;
                let hash = unsigned.hash();
                let signature = match self.keys.verify(&tx.intent().from_path, &hash, &raw) {
                    Ok(signature) => signature,
                    Err(e) => return self.fail(tx, e).await,
                };

                tx.sign(unsigned.sign_with(signature).to_cb58())?;
                self.store
                    .update_atomic_tx(&tx, AtomicTxState::AwaitingSignature)
                    .await?;
                metrics::record_transition(ENTITY, tx.state().as_str());
                info!("Transaction {} signed", tx.id());
                Ok(tx)
            }
        }
    }

    /// Issue the signed payload on the chain that owns the envelope's variant.
    ///
    /// A record left in `Broadcast` by an unreachable node re-issues the same
    /// payload; the ledger answers a duplicate with the original id.
    pub async fn broadcast_transaction(
        &self,
        mut tx: AtomicTxRecord,
    ) -> RelayerResult<AtomicTxRecord> {
        if !matches!(
            tx.state(),
            AtomicTxState::Signed | AtomicTxState::Broadcast
        ) {
            return Err(tx.illegal("broadcast_transaction"));
        }

        let chain = tx.unsigned()?.tx.issuing_chain();
        let payload = tx
            .signed_transaction()
            .ok_or_else(|| RelayerError::Internal(format!("{} has no signed payload", tx.id())))?
            .to_string();

        if tx.state() == AtomicTxState::Signed {
            tx.broadcast()?;
            self.store
                .update_atomic_tx(&tx, AtomicTxState::Signed)
                .await?;
            metrics::record_transition(ENTITY, tx.state().as_str());
        }

        match self.ledger.issue_tx(chain, &payload).await {
            Ok(ledger_tx_id) => {
                metrics::record_remote_call("ledger", true);
                tx.confirm(ledger_tx_id)?;
                self.store
                    .update_atomic_tx(&tx, AtomicTxState::Broadcast)
                    .await?;
                metrics::record_transition(ENTITY, tx.state().as_str());
                info!(
                    "Transaction {} accepted on {}-chain as {}",
                    tx.id(),
                    chain,
                    tx.ledger_tx_id().unwrap_or_default()
                );
                Ok(tx)
            }
            Err(e) if e.is_retryable() => {
                metrics::record_remote_call("ledger", false);
                self.retry_later(tx, e).await
            }
            Err(e) => {
                metrics::record_remote_call("ledger", false);
                self.fail(tx, e).await
            }
        }
    }

    async fn queue(&self, mut tx: AtomicTxRecord, job_id: String) -> RelayerResult<AtomicTxRecord> {
        tx.queue(job_id)?;
        self.store
            .update_atomic_tx(&tx, AtomicTxState::Submitted)
            .await?;
        metrics::record_transition(ENTITY, tx.state().as_str());
        info!(
            "Transaction {} queued for signing as {}",
            tx.id(),
            tx.custody_job_id().unwrap_or_default()
        );
        Ok(tx)
    }

    /// Swallow a remote error: count it and stay put, unless the attempt
    /// ceiling is reached
    async fn retry_later(
        &self,
        mut tx: AtomicTxRecord,
        cause: RelayerError,
    ) -> RelayerResult<AtomicTxRecord> {
        let expected = tx.state();
        let attempts = tx.record_attempt(cause.to_string())?;
        warn!(
            "Transaction {} in {} will be retried (attempt {}): {}",
            tx.id(),
            expected,
            attempts,
            cause
        );

        if let Some(max) = self.max_attempts {
            if attempts >= max {
                return self
                    .fail(
                        tx,
                        RelayerError::Internal(format!(
                            "gave up after {} attempts: {}",
                            attempts, cause
                        )),
                    )
                    .await;
            }
        }

        self.store.update_atomic_tx(&tx, expected).await?;
        Ok(tx)
    }

    /// Persist `Failed` and surface the cause
    async fn fail(
        &self,
        mut tx: AtomicTxRecord,
        cause: RelayerError,
    ) -> RelayerResult<AtomicTxRecord> {
        let expected = tx.state();
        tx.fail(cause.to_string())?;
        self.store.update_atomic_tx(&tx, expected).await?;
        metrics::record_transition(ENTITY, tx.state().as_str());
        metrics::record_failure(ENTITY);

        if cause.should_alert() {
            error!("ALERT: transaction {} failed: {}", tx.id(), cause);
        } else {
            error!("Transaction {} failed: {}", tx.id(), cause);
        }
        Err(cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::rpc::MockLedgerRpc;
    use crate::chain::Chain;
    use crate::codec::Encode;
    use crate::custody::keys::tests::{key_ring, sign};
    use crate::custody::MockCustodySigner;
    use crate::state::model::tests::{export_intent, export_record, import_record};
    use crate::state::{MemoryStore, TxIntent};
    use crate::tx::envelope::tests::EVM_EXPORT_HASH;

    struct Harness {
        store: Arc<MemoryStore>,
        custody: MockCustodySigner,
        ledger: MockLedgerRpc,
        max_attempts: Option<u32>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                custody: MockCustodySigner::new(),
                ledger: MockLedgerRpc::new(),
                max_attempts: None,
            }
        }

        fn build(self) -> (AtomicTxProcessor, Arc<MemoryStore>) {
            let processor = AtomicTxProcessor::new(
                self.store.clone(),
                Arc::new(self.custody),
                Arc::new(self.ledger),
                Arc::new(key_ring()),
                self.max_attempts,
            );
            (processor, self.store)
        }
    }

    async fn stored(store: &MemoryStore, tx: &AtomicTxRecord) -> AtomicTxRecord {
        store.get_atomic_tx(tx.id()).await.unwrap()
    }

    /// Drive a fresh export record to `Signed` through a cooperative custody
    async fn signed_record(store: &MemoryStore) -> AtomicTxRecord {
        let mut tx = export_record();
        store.insert_atomic_tx(&tx).await.unwrap();
        let hash = tx.unsigned().unwrap().hash();

        tx.submit().unwrap();
        tx.queue("job-signed".to_string()).unwrap();
        let signature = sign(0x11, &hash).to_bytes();
        let signed = tx.unsigned().unwrap().sign_with(signature).to_cb58();
        tx.sign(signed).unwrap();
        store
            .update_atomic_tx(&tx, AtomicTxState::New)
            .await
            .unwrap();
        tx
    }

    #[tokio::test]
    async fn test_send_for_signing_submits_hash() {
        let mut harness = Harness::new();
        harness
            .custody
            .expect_submit_for_signing()
            .withf(|request: &SigningRequest| {
                hex::encode(request.message_hash) == EVM_EXPORT_HASH
                    && request.derivation_path == "44/1/0/0/0"
            })
            .times(1)
            .returning(|_| Ok("job-1".to_string()));
        let (processor, store) = harness.build();

        let tx = export_record();
        store.insert_atomic_tx(&tx).await.unwrap();

        let tx = processor.send_for_signing(tx).await.unwrap();
        assert_eq!(tx.state(), AtomicTxState::AwaitingSignature);
        assert_eq!(tx.custody_job_id(), Some("job-1"));
        assert_eq!(stored(&store, &tx).await, tx);
    }

    #[tokio::test]
    async fn test_custody_error_leaves_submitted_and_retry_never_resubmits() {
        let mut harness = Harness::new();
        harness
            .custody
            .expect_submit_for_signing()
            .times(1)
            .returning(|_| Err(RelayerError::remote("custody", "connection reset")));
        harness
            .custody
            .expect_find_by_request()
            .times(1)
            .returning(|_| Ok(Some("job-late".to_string())));
        let (processor, store) = harness.build();

        let tx = export_record();
        store.insert_atomic_tx(&tx).await.unwrap();

        let tx = processor.send_for_signing(tx).await.unwrap();
        assert_eq!(tx.state(), AtomicTxState::Submitted);
        assert_eq!(tx.attempts(), 1);
        assert_eq!(stored(&store, &tx).await.state(), AtomicTxState::Submitted);

        // Second pass sees `Submitted` and only looks the job up
        let tx = processor.send_for_signing(tx).await.unwrap();
        assert_eq!(tx.state(), AtomicTxState::AwaitingSignature);
        assert_eq!(tx.custody_job_id(), Some("job-late"));
    }

    #[tokio::test]
    async fn test_attempt_ceiling_fails_record() {
        let mut harness = Harness::new();
        harness.max_attempts = Some(2);
        harness
            .custody
            .expect_find_by_request()
            .times(2)
            .returning(|_| Ok(None));
        let (processor, store) = harness.build();

        let mut tx = export_record();
        store.insert_atomic_tx(&tx).await.unwrap();
        tx.submit().unwrap();
        store
            .update_atomic_tx(&tx, AtomicTxState::New)
            .await
            .unwrap();

        let tx = processor.send_for_signing(tx).await.unwrap();
        assert_eq!(tx.state(), AtomicTxState::Submitted);

        assert!(processor.send_for_signing(tx.clone()).await.is_err());
        assert_eq!(stored(&store, &tx).await.state(), AtomicTxState::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_pass_loses_compare_and_swap() {
        let mut harness = Harness::new();
        harness.custody.expect_submit_for_signing().never();
        let (processor, store) = harness.build();

        let tx = export_record();
        store.insert_atomic_tx(&tx).await.unwrap();
        let mut other = tx.clone();
        other.submit().unwrap();
        store
            .update_atomic_tx(&other, AtomicTxState::New)
            .await
            .unwrap();

        let result = processor.send_for_signing(tx).await;
        assert!(matches!(result, Err(RelayerError::StaleState { .. })));
    }

    #[tokio::test]
    async fn test_unknown_key_fails_before_custody() {
        let mut harness = Harness::new();
        harness.custody.expect_submit_for_signing().never();
        let (processor, store) = harness.build();

        let intent = TxIntent {
            from_path: "44/1/9/9/9".to_string(),
            ..export_intent()
        };
        let tx = AtomicTxRecord::new(intent, &import_record().unsigned().unwrap());
        store.insert_atomic_tx(&tx).await.unwrap();

        let result = processor.send_for_signing(tx.clone()).await;
        assert!(matches!(result, Err(RelayerError::UnknownKey(_))));
        assert_eq!(stored(&store, &tx).await.state(), AtomicTxState::Failed);
    }

    #[tokio::test]
    async fn test_send_for_signing_refuses_other_states() {
        let (processor, store) = Harness::new().build();
        let mut tx = export_record();
        store.insert_atomic_tx(&tx).await.unwrap();
        tx.reject().unwrap();

        assert!(matches!(
            processor.send_for_signing(tx).await,
            Err(RelayerError::IllegalTransition { .. })
        ));
    }

    async fn awaiting(store: &MemoryStore) -> AtomicTxRecord {
        let mut tx = export_record();
        store.insert_atomic_tx(&tx).await.unwrap();
        tx.submit().unwrap();
        tx.queue("job-9".to_string()).unwrap();
        store
            .update_atomic_tx(&tx, AtomicTxState::New)
            .await
            .unwrap();
        tx
    }

    #[tokio::test]
    async fn test_verified_signature_builds_signed_envelope() {
        let mut harness = Harness::new();
        let hash = hex::decode(EVM_EXPORT_HASH).unwrap();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hash);
        let signature = sign(0x11, &digest);
        let expected = signature.to_bytes();
        harness
            .custody
            .expect_poll()
            .withf(|job: &str| job == "job-9")
            .returning(move |_| Ok(SigningPoll::Signed(signature.clone())));
        let (processor, store) = harness.build();

        let tx = awaiting(&store).await;
        let tx = processor.check_for_signature(tx).await.unwrap();
        assert_eq!(tx.state(), AtomicTxState::Signed);

        // unsigned bytes, one credential, one 65-byte signature
        let unsigned_len = tx.unsigned().unwrap().to_bytes().len();
        let signed = tx.signed_bytes().unwrap().unwrap();
        assert_eq!(signed.len(), unsigned_len + 4 + 4 + 4 + 65);
        assert_eq!(&signed[signed.len() - 65..], &expected[..]);
    }

    #[tokio::test]
    async fn test_foreign_signature_is_fatal() {
        let mut harness = Harness::new();
        harness
            .custody
            .expect_poll()
            .returning(|_| Ok(SigningPoll::Signed(sign(0x22, &[0u8; 32]))));
        let (processor, store) = harness.build();

        let tx = awaiting(&store).await;
        let result = processor.check_for_signature(tx.clone()).await;
        assert!(matches!(
            result,
            Err(RelayerError::SignatureVerificationFailed { .. })
        ));
        let tx = stored(&store, &tx).await;
        assert_eq!(tx.state(), AtomicTxState::Failed);
        assert!(tx.signed_transaction().is_none());
    }

    #[tokio::test]
    async fn test_pending_and_permanent_failure() {
        let mut harness = Harness::new();
        let mut polls = vec![
            Ok(SigningPoll::PermanentFailure("REJECTED".to_string())),
            Ok(SigningPoll::Pending),
        ];
        harness
            .custody
            .expect_poll()
            .times(2)
            .returning(move |_| polls.pop().unwrap());
        let (processor, store) = harness.build();

        let tx = awaiting(&store).await;
        let tx = processor.check_for_signature(tx).await.unwrap();
        assert_eq!(tx.state(), AtomicTxState::AwaitingSignature);
        assert_eq!(tx.attempts(), 0);

        let result = processor.check_for_signature(tx.clone()).await;
        assert!(matches!(result, Err(RelayerError::CustodyFailed { .. })));
        assert_eq!(stored(&store, &tx).await.state(), AtomicTxState::Failed);
    }

    #[tokio::test]
    async fn test_broadcast_confirms_on_issuing_chain() {
        let mut harness = Harness::new();
        harness
            .ledger
            .expect_issue_tx()
            .withf(|chain: &Chain, _: &str| *chain == Chain::C)
            .times(1)
            .returning(|_, _| Ok("2QouvFWUbjuySRxeX5xMbNCuAaKWfbk5FeEa2JmoF85RKLnC8a".to_string()));
        let (processor, store) = harness.build();

        let tx = signed_record(&store).await;
        let tx = processor.broadcast_transaction(tx).await.unwrap();
        assert_eq!(tx.state(), AtomicTxState::Confirmed);
        assert_eq!(
            tx.ledger_tx_id(),
            Some("2QouvFWUbjuySRxeX5xMbNCuAaKWfbk5FeEa2JmoF85RKLnC8a")
        );
        assert_eq!(stored(&store, &tx).await, tx);
    }

    #[tokio::test]
    async fn test_broadcast_rejection_is_fatal() {
        let mut harness = Harness::new();
        harness.ledger.expect_issue_tx().returning(|_, _| {
            Err(RelayerError::LedgerRejected {
                chain: 'C',
                code: -32000,
                message: "insufficient funds".to_string(),
            })
        });
        let (processor, store) = harness.build();

        let tx = signed_record(&store).await;
        let result = processor.broadcast_transaction(tx.clone()).await;
        assert!(matches!(result, Err(RelayerError::LedgerRejected { .. })));
        assert_eq!(stored(&store, &tx).await.state(), AtomicTxState::Failed);
    }

    #[tokio::test]
    async fn test_unreachable_node_keeps_broadcast_for_reissue() {
        let mut harness = Harness::new();
        let mut outcomes = vec![
            Ok("ledger-id".to_string()),
            Err(RelayerError::remote("ledger", "timed out")),
        ];
        harness
            .ledger
            .expect_issue_tx()
            .times(2)
            .returning(move |_, _| outcomes.pop().unwrap());
        let (processor, store) = harness.build();

        let tx = signed_record(&store).await;
        let tx = processor.broadcast_transaction(tx).await.unwrap();
        assert_eq!(tx.state(), AtomicTxState::Broadcast);

        let tx = processor.broadcast_transaction(tx).await.unwrap();
        assert_eq!(tx.state(), AtomicTxState::Confirmed);
    }

    #[tokio::test]
    async fn test_unknown_response_is_fatal() {
        let mut harness = Harness::new();
        harness.ledger.expect_issue_tx().returning(|_, _| {
            Err(RelayerError::UnknownResponse {
                service: "ledger",
                body: "{}".to_string(),
            })
        });
        let (processor, store) = harness.build();

        let tx = signed_record(&store).await;
        assert!(processor.broadcast_transaction(tx.clone()).await.is_err());
        assert_eq!(stored(&store, &tx).await.state(), AtomicTxState::Failed);
    }
}
