//! Chain module - ledger endpoints and network parameters
//!
//! This module provides:
//! - The three primary-network chains and their RPC routing
//! - Decoded network parameters (chain ids, asset id, fees)
//! - The JSON-RPC client used to issue transactions and fetch atomic UTXOs
//! - An EVM provider for C-chain account nonces

pub mod provider;
pub mod rpc;

pub use provider::EvmProvider;
pub use rpc::{AvalancheClient, LedgerRpc};

use crate::codec::cb58;
use crate::config::NetworkConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::tx::fields::Id;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Primary-network chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    /// Contract chain (account model)
    C,
    /// Exchange chain (UTXO model)
    X,
    /// Platform chain (UTXO model, staking)
    P,
}

impl Chain {
    pub fn alias(&self) -> char {
        match self {
            Chain::C => 'C',
            Chain::X => 'X',
            Chain::P => 'P',
        }
    }

    /// Path of the chain's JSON-RPC endpoint on a node
    pub fn rpc_path(&self) -> &'static str {
        match self {
            Chain::C => "/ext/bc/C/avax",
            Chain::X => "/ext/bc/X",
            Chain::P => "/ext/bc/P",
        }
    }

    /// JSON-RPC method namespace
    pub fn method_prefix(&self) -> &'static str {
        match self {
            Chain::C => "avax",
            Chain::X => "avm",
            Chain::P => "platform",
        }
    }

    pub fn is_account_model(&self) -> bool {
        matches!(self, Chain::C)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alias())
    }
}

impl FromStr for Chain {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "C" | "c" => Ok(Chain::C),
            "X" | "x" => Ok(Chain::X),
            "P" | "p" => Ok(Chain::P),
            other => Err(RelayerError::Config(format!("unknown chain alias {}", other))),
        }
    }
}

/// Network parameters with every identifier decoded once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    pub network_id: u32,
    pub hrp: String,
    pub c_chain_id: Id,
    pub x_chain_id: Id,
    pub p_chain_id: Id,
    pub avax_asset_id: Id,
    /// Fee burned by an account-chain export
    pub evm_export_fee: u64,
    /// Fee burned by an account-chain import
    pub evm_import_fee: u64,
    /// Fee burned by any UTXO-chain (X or P) transaction
    pub utxo_tx_fee: u64,
}

impl NetworkParams {
    pub fn from_config(config: &NetworkConfig) -> RelayerResult<Self> {
        let decode = |name: &str, text: &str| {
            cb58::decode_id(text)
                .map_err(|e| RelayerError::Config(format!("network.{}: {}", name, e)))
        };

        Ok(Self {
            network_id: config.network_id,
            hrp: config.hrp.clone(),
            c_chain_id: decode("c_chain_id", &config.c_chain_id)?,
            x_chain_id: decode("x_chain_id", &config.x_chain_id)?,
            p_chain_id: decode("p_chain_id", &config.p_chain_id)?,
            avax_asset_id: decode("avax_asset_id", &config.avax_asset_id)?,
            evm_export_fee: config.evm_export_fee,
            evm_import_fee: config.evm_import_fee,
            utxo_tx_fee: config.utxo_tx_fee,
        })
    }

    /// Fee burned by an export issued on `chain`
    pub fn export_fee(&self, chain: Chain) -> u64 {
        match chain {
            Chain::C => self.evm_export_fee,
            Chain::X | Chain::P => self.utxo_tx_fee,
        }
    }

    /// Fee burned by an import issued on `chain`
    pub fn import_fee(&self, chain: Chain) -> u64 {
        match chain {
            Chain::C => self.evm_import_fee,
            Chain::X | Chain::P => self.utxo_tx_fee,
        }
    }

    pub fn chain_id(&self, chain: Chain) -> Id {
        match chain {
            Chain::C => self.c_chain_id,
            Chain::X => self.x_chain_id,
            Chain::P => self.p_chain_id,
        }
    }
}
