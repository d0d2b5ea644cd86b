//! JSON-RPC client for the ledger's per-chain endpoints

use super::{Chain, EvmProvider};
use crate::error::{RelayerError, RelayerResult};
use crate::tx::envelope::Utxo;
use crate::tx::fields::ShortId;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Page size for `getUTXOs`
const UTXO_LIMIT: u32 = 1024;

const SERVICE: &str = "ledger";

/// Operations the relayer needs from the ledger
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Issue a signed CB58 payload on `chain`, returning the ledger's transaction id
    async fn issue_tx(&self, chain: Chain, signed_tx: &str) -> RelayerResult<String>;

    /// Atomic (when `source_chain` is set) or local UTXOs owned by `addresses`
    async fn get_utxos(
        &self,
        chain: Chain,
        addresses: Vec<String>,
        source_chain: Option<Chain>,
    ) -> RelayerResult<Vec<Utxo>>;

    /// Current C-chain account nonce
    async fn evm_nonce(&self, address: ShortId) -> RelayerResult<u64>;

    async fn health_check(&self) -> bool;
}

/// HTTP JSON-RPC 2.0 client against a single node
pub struct AvalancheClient {
    http: reqwest::Client,
    base_url: String,
    evm: EvmProvider,
    next_id: AtomicU64,
}

impl AvalancheClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> RelayerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RelayerError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            evm: EvmProvider::new(base_url)?,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, chain: Chain, method: &str, params: Value) -> RelayerResult<Value> {
        let url = format!("{}{}", self.base_url, chain.rpc_path());
        let method = format!("{}.{}", chain.method_prefix(), method);
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        debug!("{} -> {}", method, url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayerError::remote(SERVICE, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RelayerError::remote(SERVICE, e))?;

        if !status.is_success() {
            return Err(RelayerError::remote(
                SERVICE,
                format!("{} returned HTTP {}: {}", method, status, text),
            ));
        }

        parse_result(chain, &text)
    }
}

#[async_trait]
impl LedgerRpc for AvalancheClient {
    async fn issue_tx(&self, chain: Chain, signed_tx: &str) -> RelayerResult<String> {
        let result = self
            .call(chain, "issueTx", json!({ "tx": signed_tx, "encoding": "cb58" }))
            .await?;
        parse_tx_id(&result)
    }

    async fn get_utxos(
        &self,
        chain: Chain,
        addresses: Vec<String>,
        source_chain: Option<Chain>,
    ) -> RelayerResult<Vec<Utxo>> {
        let mut params = json!({
            "addresses": addresses,
            "limit": UTXO_LIMIT,
            "encoding": "cb58",
        });
        if let Some(source) = source_chain {
            params["sourceChain"] = json!(source.to_string());
        }

        let result = self.call(chain, "getUTXOs", params).await?;
        parse_utxos(&result)
    }

    async fn evm_nonce(&self, address: ShortId) -> RelayerResult<u64> {
        self.evm.nonce(address).await
    }

    async fn health_check(&self) -> bool {
        self.evm.health_check().await
    }
}

/// Split a JSON-RPC body into its `result`, a ledger rejection, or an unknown shape
fn parse_result(chain: Chain, text: &str) -> RelayerResult<Value> {
    let unknown = || RelayerError::UnknownResponse {
        service: SERVICE,
        body: text.to_string(),
    };

    let value: Value = serde_json::from_str(text).map_err(|_| unknown())?;

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        return Err(RelayerError::LedgerRejected {
            chain: chain.alias(),
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        });
    }

    value.get("result").cloned().ok_or_else(unknown)
}

fn parse_tx_id(result: &Value) -> RelayerResult<String> {
    result
        .get("txID")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RelayerError::UnknownResponse {
            service: SERVICE,
            body: result.to_string(),
        })
}

fn parse_utxos(result: &Value) -> RelayerResult<Vec<Utxo>> {
    let entries = result
        .get("utxos")
        .and_then(Value::as_array)
        .ok_or_else(|| RelayerError::UnknownResponse {
            service: SERVICE,
            body: result.to_string(),
        })?;

    entries
        .iter()
        .map(|entry| {
            let text = entry.as_str().ok_or_else(|| RelayerError::UnknownResponse {
                service: SERVICE,
                body: entry.to_string(),
            })?;
            Ok(Utxo::from_cb58(text)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{cb58, Encode};
    use crate::tx::fields::SecpTransferOutput;

    #[test]
    fn test_issue_success() {
        let body = r#"{"jsonrpc":"2.0","result":{"txID":"2QouvFWUbjuySRxeX5xMbNCuAaKWfbk5FeEa2JmoF85RKLk2dD"},"id":1}"#;
        let result = parse_result(Chain::C, body).unwrap();
        assert_eq!(
            parse_tx_id(&result).unwrap(),
            "2QouvFWUbjuySRxeX5xMbNCuAaKWfbk5FeEa2JmoF85RKLk2dD"
        );
    }

    #[test]
    fn test_error_key_is_ledger_rejection() {
        let body = r#"{"jsonrpc":"2.0","error":{"code":-32000,"message":"insufficient funds"},"id":1}"#;
        match parse_result(Chain::P, body).unwrap_err() {
            RelayerError::LedgerRejected {
                chain,
                code,
                message,
            } => {
                assert_eq!(chain, 'P');
                assert_eq!(code, -32000);
                assert_eq!(message, "insufficient funds");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_ambiguous_responses_are_unknown() {
        for body in ["not json", r#"{"jsonrpc":"2.0","id":1}"#] {
            assert!(matches!(
                parse_result(Chain::X, body).unwrap_err(),
                RelayerError::UnknownResponse { .. }
            ));
        }

        let result = parse_result(Chain::X, r#"{"result":{}}"#).unwrap();
        let err = parse_tx_id(&result).unwrap_err();
        assert!(matches!(err, RelayerError::UnknownResponse { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_utxos() {
        let utxo = Utxo {
            tx_id: [0x1a; 32],
            output_index: 1,
            asset_id: [0x3d; 32],
            output: SecpTransferOutput::to_address(42, [0xe5; 20]),
        };
        let result = json!({
            "numFetched": "1",
            "utxos": [cb58::encode(&utxo.to_bytes())],
        });
        assert_eq!(parse_utxos(&result).unwrap(), vec![utxo]);
    }

    #[test]
    fn test_corrupt_utxo_surfaces_codec_error() {
        let result = json!({ "utxos": ["11111"] });
        assert!(matches!(
            parse_utxos(&result).unwrap_err(),
            RelayerError::Codec(_)
        ));
    }
}
