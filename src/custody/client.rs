//! HTTP client for the custody raw-signing API

use super::{CustodySigner, RawSignature, SigningPoll, SigningRequest};
use crate::config::CustodyConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "custody";

/// Statuses returned for a freshly created job
const ACCEPTED_STATUSES: &[&str] = &["SUBMITTED", "QUEUED", "PENDING_SIGNATURE", "COMPLETED"];

/// Statuses after which a job never produces a signature
const TERMINAL_FAILURES: &[&str] = &["FAILED", "REJECTED", "CANCELLED", "BLOCKED", "TIMEOUT"];

pub struct CustodyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    vault_account_id: String,
    asset_id: String,
}

impl CustodyClient {
    pub fn new(config: &CustodyConfig) -> RelayerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RelayerError::Config(format!("custody HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            vault_account_id: config.vault_account_id.clone(),
            asset_id: config.asset_id.clone(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header("X-API-Key", &self.api_key)
    }

    /// Send a request, returning the status and parsed body
    async fn send(&self, builder: RequestBuilder) -> RelayerResult<(StatusCode, Value)> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| RelayerError::remote(SERVICE, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RelayerError::remote(SERVICE, e))?;

        if status.is_server_error() {
            return Err(RelayerError::remote(
                SERVICE,
                format!("HTTP {}: {}", status, text),
            ));
        }

        if status == StatusCode::NOT_FOUND {
            return Ok((status, Value::Null));
        }

        let body = serde_json::from_str(&text).map_err(|_| RelayerError::UnknownResponse {
            service: SERVICE,
            body: text.clone(),
        })?;
        Ok((status, body))
    }

    fn signing_body(&self, request: &SigningRequest) -> RelayerResult<Value> {
        Ok(json!({
            "operation": "RAW",
            "assetId": self.asset_id,
            "source": { "type": "VAULT_ACCOUNT", "id": self.vault_account_id },
            "note": request.note,
            "externalTxId": request.request_id,
            "extraParameters": {
                "rawMessageData": {
                    "messages": [{
                        "content": hex::encode(request.message_hash),
                        "derivationPath": parse_derivation_path(&request.derivation_path)?,
                    }]
                }
            }
        }))
    }
}

#[async_trait]
impl CustodySigner for CustodyClient {
    async fn submit_for_signing(&self, request: &SigningRequest) -> RelayerResult<String> {
        let url = format!("{}/v1/transactions", self.base_url);
        let body = self.signing_body(request)?;

        debug!("Submitting signing request {}", request.request_id);
        let (status, body) = self.send(self.http.post(&url).json(&body)).await?;
        if !status.is_success() {
            return Err(RelayerError::UnknownResponse {
                service: SERVICE,
                body: format!("HTTP {}: {}", status, body),
            });
        }

        parse_submission(&body)
    }

    async fn find_by_request(&self, request_id: &str) -> RelayerResult<Option<String>> {
        let url = format!(
            "{}/v1/transactions/external_tx_id/{}",
            self.base_url, request_id
        );

        let (status, body) = self.send(self.http.get(&url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RelayerError::UnknownResponse {
                service: SERVICE,
                body: format!("HTTP {}: {}", status, body),
            });
        }

        Ok(body.get("id").and_then(Value::as_str).map(str::to_string))
    }

    async fn poll(&self, job_id: &str) -> RelayerResult<SigningPoll> {
        let url = format!("{}/v1/transactions/{}", self.base_url, job_id);

        let (status, body) = self.send(self.http.get(&url)).await?;
        if !status.is_success() {
            return Err(RelayerError::UnknownResponse {
                service: SERVICE,
                body: format!("HTTP {}: {}", status, body),
            });
        }

        parse_poll(&body)
    }
}

/// `"44/1/0/0/0"` into its numeric components
fn parse_derivation_path(path: &str) -> RelayerResult<Vec<u32>> {
    path.split('/')
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| RelayerError::UnknownKey(path.to_string()))
        })
        .collect()
}

fn parse_submission(body: &Value) -> RelayerResult<String> {
    let unknown = || RelayerError::UnknownResponse {
        service: SERVICE,
        body: body.to_string(),
    };

    let status = body.get("status").and_then(Value::as_str).ok_or_else(unknown)?;
    if !ACCEPTED_STATUSES.contains(&status) {
        return Err(unknown());
    }

    body.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(unknown)
}

fn parse_poll(body: &Value) -> RelayerResult<SigningPoll> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayerError::UnknownResponse {
            service: SERVICE,
            body: body.to_string(),
        })?;

    if TERMINAL_FAILURES.contains(&status) {
        let sub_status = body
            .get("subStatus")
            .and_then(Value::as_str)
            .unwrap_or("");
        return Ok(SigningPoll::PermanentFailure(
            format!("{} {}", status, sub_status).trim().to_string(),
        ));
    }

    if status != "COMPLETED" {
        return Ok(SigningPoll::Pending);
    }

    let signature = body
        .get("signedMessages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.first())
        .and_then(|message| message.get("signature"));

    match signature {
        Some(signature) => parse_signature(signature).map(SigningPoll::Signed),
        None => Ok(SigningPoll::PermanentFailure(
            "completed without a signature".to_string(),
        )),
    }
}

fn parse_signature(signature: &Value) -> RelayerResult<RawSignature> {
    let malformed = |reason: &str| RelayerError::SignatureVerificationFailed {
        subject: signature.to_string(),
        reason: reason.to_string(),
    };

    let half = |field: &str| -> RelayerResult<[u8; 32]> {
        let text = signature
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing component"))?;
        let bytes = hex::decode(text.trim_start_matches("0x"))
            .map_err(|_| malformed("component is not hex"))?;
        if bytes.len() > 32 {
            return Err(malformed("component longer than 32 bytes"));
        }
        // Left-pad: leading zero bytes are sometimes dropped
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(out)
    };

    let v = signature
        .get("v")
        .and_then(Value::as_u64)
        .filter(|v| *v <= u8::MAX as u64)
        .ok_or_else(|| malformed("missing recovery id"))?;

    Ok(RawSignature {
        r: half("r")?,
        s: half("s")?,
        v: v as u8,
    })
}
