//! Custody signing collaborator
//!
//! Private keys never leave the custody service. The relayer hands it a
//! 32-byte message hash and a derivation path, polls for the resulting
//! recoverable signature, and checks that signature against the public key
//! configured for that path before using it.

pub mod client;
pub mod keys;

pub use client::CustodyClient;
pub use keys::KeyRing;

use crate::error::RelayerResult;
use crate::tx::fields::Signature;

use async_trait::async_trait;

/// A signing request; `request_id` doubles as the idempotency key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub request_id: String,
    pub derivation_path: String,
    pub message_hash: [u8; 32],
    pub note: String,
}

/// Recoverable secp256k1 signature as reported by custody
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Recovery id; 27/28 are normalised to 0/1
    pub v: u8,
}

impl RawSignature {
    pub fn recovery_id(&self) -> u8 {
        if self.v >= 27 {
            self.v - 27
        } else {
            self.v
        }
    }

    /// `r || s || v` with `v` in {0, 1}
    pub fn to_bytes(&self) -> Signature {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.recovery_id();
        out
    }
}

/// Outcome of polling a signing job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningPoll {
    /// Still in progress
    Pending,
    Signed(RawSignature),
    /// The job will never produce a signature
    PermanentFailure(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CustodySigner: Send + Sync {
    /// Start a signing job, returning its id
    async fn submit_for_signing(&self, request: &SigningRequest) -> RelayerResult<String>;

    /// Job previously created for `request_id`, if any
    async fn find_by_request(&self, request_id: &str) -> RelayerResult<Option<String>>;

    async fn poll(&self, job_id: &str) -> RelayerResult<SigningPoll>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_bytes_normalise_v() {
        let sig = RawSignature {
            r: [1; 32],
            s: [2; 32],
            v: 28,
        };
        let bytes = sig.to_bytes();
        assert_eq!(&bytes[..32], &[1; 32]);
        assert_eq!(&bytes[32..64], &[2; 32]);
        assert_eq!(bytes[64], 1);
    }
}
