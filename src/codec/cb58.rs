//! CB58: base58 text with a 4-byte SHA-256 checksum suffix
//!
//! The checksum is the last four bytes of `sha256(payload)`. Chain ids, asset
//! ids and every transaction payload sent to or read from the ledger use it.

use crate::error::{CodecError, CodecResult, Malformed};
use sha2::{Digest, Sha256};

const CHECKSUM_LEN: usize = 4;

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    out
}

/// Encode arbitrary bytes as CB58
pub fn encode(payload: &[u8]) -> String {
    let mut raw = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    raw.extend_from_slice(payload);
    raw.extend_from_slice(&checksum(payload));
    bs58::encode(raw).into_string()
}

/// Decode CB58 text, verifying the checksum
pub fn decode(text: &str) -> CodecResult<Vec<u8>> {
    let mut raw = bs58::decode(text)
        .into_vec()
        .map_err(|e| CodecError::malformed(0, Malformed::InvalidBase58(e.to_string())))?;

    if raw.len() < CHECKSUM_LEN {
        return Err(CodecError::malformed(
            0,
            Malformed::Truncated {
                needed: CHECKSUM_LEN,
                available: raw.len(),
            },
        ));
    }

    let split = raw.len() - CHECKSUM_LEN;
    if raw[split..] != checksum(&raw[..split]) {
        return Err(CodecError::malformed(split, Malformed::ChecksumMismatch));
    }
    raw.truncate(split);
    Ok(raw)
}

/// Decode a CB58 identifier that must be exactly 32 bytes (chain or asset id)
pub fn decode_id(text: &str) -> CodecResult<[u8; 32]> {
    let raw = decode(text)?;
    if raw.len() != 32 {
        return Err(CodecError::malformed(
            0,
            if raw.len() < 32 {
                Malformed::Truncated {
                    needed: 32,
                    available: raw.len(),
                }
            } else {
                Malformed::TrailingBytes(raw.len() - 32)
            },
        ));
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&raw);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLATFORM_CHAIN: &str = "11111111111111111111111111111111LpoYY";
    const FUJI_C_CHAIN: &str = "yH8D7ThNJkxmtkuv2jgBa4P1Rn3Qpr4pPr7QYNfcdoS6k6HWp";
    const FUJI_AVAX: &str = "U8iRqJoiJm8xZHAacmvYyZVwqQx6uDNtQeP3CQ6fcgQk3JqnK";

    #[test]
    fn test_known_identifiers() {
        assert_eq!(decode_id(PLATFORM_CHAIN).unwrap(), [0u8; 32]);
        assert_eq!(
            hex::encode(decode_id(FUJI_C_CHAIN).unwrap()),
            "7fc93d85c6d62c5b2ac0b519c87010ea5294012d1e407030d6acd0021cac10d5"
        );
        assert_eq!(
            hex::encode(decode_id(FUJI_AVAX).unwrap()),
            "3d9bdac0ed1d761330cf680efdeb1a42159eb387d6d2950c96f7d28f61bbe2aa"
        );
        assert_eq!(encode(&[0u8; 32]), PLATFORM_CHAIN);
    }

    #[test]
    fn test_round_trip() {
        for payload in [vec![], vec![0u8], vec![0, 0, 1, 2], (0..=255u8).collect()] {
            assert_eq!(decode(&encode(&payload)).unwrap(), payload);
        }
    }

    #[test]
    fn test_any_bit_flip_fails_checksum() {
        let payload = decode(FUJI_C_CHAIN).unwrap();
        let mut raw = payload.clone();
        raw.extend_from_slice(&checksum(&payload));

        for byte in 0..raw.len() {
            for bit in 0..8 {
                let mut corrupted = raw.clone();
                corrupted[byte] ^= 1 << bit;
                let text = bs58::encode(&corrupted).into_string();
                let err = decode(&text).unwrap_err();
                assert!(
                    err.is_checksum_mismatch(),
                    "flip of byte {} bit {} gave {:?}",
                    byte,
                    bit,
                    err
                );
            }
        }
    }

    #[test]
    fn test_invalid_alphabet() {
        // '0', 'O', 'I' and 'l' are not in the base58 alphabet
        let err = decode("0OIl").unwrap_err();
        assert!(matches!(
            err,
            CodecError::MalformedInput {
                kind: Malformed::InvalidBase58(_),
                ..
            }
        ));
    }

    #[test]
    fn test_too_short_for_checksum() {
        let text = bs58::encode([1u8, 2]).into_string();
        assert!(matches!(
            decode(&text).unwrap_err(),
            CodecError::MalformedInput {
                kind: Malformed::Truncated { .. },
                ..
            }
        ));
    }
}
