//! Public keys and addresses per derivation path, and signature verification

use super::RawSignature;
use crate::chain::Chain;
use crate::config::KeyConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::tx::fields::{ShortId, Signature};

use bech32::FromBase32;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, VerifyOnly};
use std::collections::HashMap;

/// Everything the relayer knows about one custodial key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKeys {
    pub derivation_path: String,
    pub public_key: PublicKey,
    /// C-chain account
    pub evm_address: ShortId,
    /// P/X short id
    pub short_id: ShortId,
    utxo_address: String,
}

impl AccountKeys {
    /// Chain-prefixed bech32 address, e.g. `P-fuji1...`
    pub fn chain_address(&self, chain: Chain) -> String {
        format!("{}-{}", chain, self.utxo_address)
    }

    /// Address shown to operators for `chain`
    pub fn display_address(&self, chain: Chain) -> String {
        match chain {
            Chain::C => format!("0x{}", hex::encode(self.evm_address)),
            Chain::X | Chain::P => self.chain_address(chain),
        }
    }
}

pub struct KeyRing {
    secp: Secp256k1<VerifyOnly>,
    accounts: HashMap<String, AccountKeys>,
}

impl KeyRing {
    pub fn from_config(keys: &HashMap<String, KeyConfig>, hrp: &str) -> RelayerResult<Self> {
        let accounts = keys
            .iter()
            .map(|(path, config)| Ok((path.clone(), parse_account(path, config, hrp)?)))
            .collect::<RelayerResult<HashMap<_, _>>>()?;

        Ok(Self {
            secp: Secp256k1::verification_only(),
            accounts,
        })
    }

    pub fn get(&self, derivation_path: &str) -> RelayerResult<&AccountKeys> {
        self.accounts
            .get(derivation_path)
            .ok_or_else(|| RelayerError::UnknownKey(derivation_path.to_string()))
    }

    /// Recover the signer of `hash` and require it to be the key at `derivation_path`
    pub fn verify(
        &self,
        derivation_path: &str,
        hash: &[u8; 32],
        signature: &RawSignature,
    ) -> RelayerResult<Signature> {
        let expected = self.get(derivation_path)?;
        let failed = |reason: String| RelayerError::SignatureVerificationFailed {
            subject: hex::encode(hash),
            reason,
        };

        let recovery_id = RecoveryId::from_i32(signature.recovery_id() as i32)
            .map_err(|e| failed(format!("recovery id {}: {}", signature.v, e)))?;

        let bytes = signature.to_bytes();
        let recoverable = RecoverableSignature::from_compact(&bytes[..64], recovery_id)
            .map_err(|e| failed(format!("malformed signature: {}", e)))?;

        let message = Message::from_digest(*hash);
        let recovered = self
            .secp
            .recover_ecdsa(&message, &recoverable)
            .map_err(|e| failed(format!("recovery failed: {}", e)))?;

        if recovered != expected.public_key {
            return Err(failed(format!(
                "signed by {} instead of {}",
                recovered, expected.public_key
            )));
        }

        Ok(bytes)
    }
}

fn parse_account(path: &str, config: &KeyConfig, hrp: &str) -> RelayerResult<AccountKeys> {
    let bad = |what: &str, detail: String| {
        RelayerError::Config(format!("keys.\"{}\".{}: {}", path, what, detail))
    };

    let key_bytes = hex::decode(config.public_key.trim_start_matches("0x"))
        .map_err(|e| bad("public_key", e.to_string()))?;
    let public_key =
        PublicKey::from_slice(&key_bytes).map_err(|e| bad("public_key", e.to_string()))?;

    let evm_bytes = hex::decode(config.evm_address.trim_start_matches("0x"))
        .map_err(|e| bad("evm_address", e.to_string()))?;
    let evm_address = to_short_id(&evm_bytes).map_err(|e| bad("evm_address", e))?;

    let (found_hrp, data, _) =
        bech32::decode(&config.utxo_address).map_err(|e| bad("utxo_address", e.to_string()))?;
    if found_hrp != hrp {
        return Err(bad(
            "utxo_address",
            format!("expected hrp {}, found {}", hrp, found_hrp),
        ));
    }
    let raw = Vec::<u8>::from_base32(&data).map_err(|e| bad("utxo_address", e.to_string()))?;
    let short_id = to_short_id(&raw).map_err(|e| bad("utxo_address", e))?;

    Ok(AccountKeys {
        derivation_path: path.to_string(),
        public_key,
        evm_address,
        short_id,
        utxo_address: config.utxo_address.clone(),
    })
}

fn to_short_id(bytes: &[u8]) -> Result<ShortId, String> {
    if bytes.len() != 20 {
        return Err(format!("expected 20 bytes, found {}", bytes.len()));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(bytes);
    Ok(out)
}
