//! C-chain EVM provider for account nonces

use crate::error::{RelayerError, RelayerResult};
use crate::tx::fields::ShortId;

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::time::Duration;
use tracing::{debug, error};

/// EVM JSON-RPC access to the account chain
pub struct EvmProvider {
    http: Provider<Http>,
    url: String,
}

impl EvmProvider {
    /// Create a provider against a node's C-chain EVM endpoint
    pub fn new(node_url: &str) -> RelayerResult<Self> {
        let url = format!("{}/ext/bc/C/rpc", node_url.trim_end_matches('/'));
        let http = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| RelayerError::Config(format!("invalid C-chain RPC url {}: {}", url, e)))?
            .interval(Duration::from_millis(100));

        debug!("Created C-chain provider at {}", url);
        Ok(Self { http, url })
    }

    /// Next nonce for `address`, counting pending transactions
    pub async fn nonce(&self, address: ShortId) -> RelayerResult<u64> {
        let count = self
            .http
            .get_transaction_count(Address::from(address), Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| RelayerError::remote("C-chain provider", e))?;

        if count > U256::from(u64::MAX) {
            return Err(RelayerError::UnknownResponse {
                service: "C-chain provider",
                body: format!("nonce {} out of range", count),
            });
        }
        Ok(count.as_u64())
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.http.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for {}: {}", self.url, e);
                false
            }
        }
    }
}
