//! Transaction components: account and UTXO-style inputs/outputs, credentials

use crate::codec::{put_array_list, put_u32, put_u64, Decode, Encode, Reader};
use crate::error::CodecResult;

/// 20-byte short address
pub type ShortId = [u8; 20];
/// 32-byte chain, asset or transaction id
pub type Id = [u8; 32];
/// Recoverable secp256k1 signature, `r || s || v`
pub type Signature = [u8; 65];

pub const SECP_TRANSFER_INPUT_TYPE: u32 = 0x0000_0005;
pub const SECP_TRANSFER_OUTPUT_TYPE: u32 = 0x0000_0007;
pub const SECP_CREDENTIAL_TYPE: u32 = 0x0000_0009;

/// Account-chain output: credit `amount` of `asset_id` to `address`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmOutput {
    pub address: ShortId,
    pub amount: u64,
    pub asset_id: Id,
}

impl Encode for EvmOutput {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.address);
        put_u64(out, self.amount);
        out.extend_from_slice(&self.asset_id);
    }
}

impl Decode for EvmOutput {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(Self {
            address: reader.read_array()?,
            amount: reader.read_u64()?,
            asset_id: reader.read_array()?,
        })
    }
}

/// Account-chain input: an output's fields followed by the account nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmInput {
    pub debit: EvmOutput,
    pub nonce: u64,
}

impl Encode for EvmInput {
    fn encode(&self, out: &mut Vec<u8>) {
        self.debit.encode(out);
        put_u64(out, self.nonce);
    }
}

impl Decode for EvmInput {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(Self {
            debit: EvmOutput::decode(reader)?,
            nonce: reader.read_u64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecpTransferOutput {
    pub amount: u64,
    pub locktime: u64,
    pub threshold: u32,
    pub addresses: Vec<ShortId>,
}

impl SecpTransferOutput {
    /// Single-owner output spendable immediately
    pub fn to_address(amount: u64, address: ShortId) -> Self {
        Self {
            amount,
            locktime: 0,
            threshold: 1,
            addresses: vec![address],
        }
    }
}

impl Encode for SecpTransferOutput {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, SECP_TRANSFER_OUTPUT_TYPE);
        put_u64(out, self.amount);
        put_u64(out, self.locktime);
        put_u32(out, self.threshold);
        put_array_list(out, &self.addresses);
    }
}

impl Decode for SecpTransferOutput {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        reader.expect_tag(SECP_TRANSFER_OUTPUT_TYPE)?;
        Ok(Self {
            amount: reader.read_u64()?,
            locktime: reader.read_u64()?,
            threshold: reader.read_u32()?,
            addresses: reader.read_array_list()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferableOutput {
    pub asset_id: Id,
    pub output: SecpTransferOutput,
}

impl Encode for TransferableOutput {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.asset_id);
        self.output.encode(out);
    }
}

impl Decode for TransferableOutput {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(Self {
            asset_id: reader.read_array()?,
            output: SecpTransferOutput::decode(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecpTransferInput {
    pub amount: u64,
    pub address_indices: Vec<u32>,
}

impl Encode for SecpTransferInput {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, SECP_TRANSFER_INPUT_TYPE);
        put_u64(out, self.amount);
        put_u32(out, self.address_indices.len() as u32);
        for index in &self.address_indices {
            put_u32(out, *index);
        }
    }
}

impl Decode for SecpTransferInput {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        reader.expect_tag(SECP_TRANSFER_INPUT_TYPE)?;
        Ok(Self {
            amount: reader.read_u64()?,
            address_indices: reader.read_u32_list()?,
        })
    }
}

/// Spend of a specific UTXO, located by `(tx_id, output_index)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferableInput {
    pub tx_id: Id,
    pub output_index: u32,
    pub asset_id: Id,
    pub input: SecpTransferInput,
}

impl Encode for TransferableInput {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tx_id);
        put_u32(out, self.output_index);
        out.extend_from_slice(&self.asset_id);
        self.input.encode(out);
    }
}

impl Decode for TransferableInput {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(Self {
            tx_id: reader.read_array()?,
            output_index: reader.read_u32()?,
            asset_id: reader.read_array()?,
            input: SecpTransferInput::decode(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub signatures: Vec<Signature>,
}

impl Encode for Credential {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, SECP_CREDENTIAL_TYPE);
        put_array_list(out, &self.signatures);
    }
}

impl Decode for Credential {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        reader.expect_tag(SECP_CREDENTIAL_TYPE)?;
        Ok(Self {
            signatures: reader.read_array_list()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::put_list;
    use crate::error::CodecError;

    fn avax() -> Id {
        let mut id = [0u8; 32];
        id.copy_from_slice(
            &hex::decode("3d9bdac0ed1d761330cf680efdeb1a42159eb387d6d2950c96f7d28f61bbe2aa")
                .unwrap(),
        );
        id
    }

    #[test]
    fn test_evm_input_layout() {
        let input = EvmInput {
            debit: EvmOutput {
                address: [0x37; 20],
                amount: 0x3baf_6719,
                asset_id: avax(),
            },
            nonce: 4,
        };
        let bytes = input.to_bytes();
        assert_eq!(bytes.len(), 20 + 8 + 32 + 8);
        assert_eq!(&bytes[20..28], &0x3baf_6719u64.to_be_bytes());
        assert_eq!(&bytes[60..], &4u64.to_be_bytes());

        let (parsed, consumed) = EvmInput::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, input);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_transferable_output_layout() {
        let output = TransferableOutput {
            asset_id: avax(),
            output: SecpTransferOutput::to_address(1_001_000_000, [0xe5; 20]),
        };
        let bytes = output.to_bytes();
        let expected = format!(
            "{}{}{}{}{}{}{}",
            hex::encode(avax()),
            "00000007",
            "000000003baa0c40",
            "0000000000000000",
            "00000001",
            "00000001",
            hex::encode([0xe5; 20]),
        );
        assert_eq!(hex::encode(&bytes), expected);
        assert_eq!(TransferableOutput::from_exact_bytes(&bytes).unwrap(), output);
    }

    #[test]
    fn test_transferable_input_keeps_tx_id_and_asset_id_apart() {
        let input = TransferableInput {
            tx_id: [0x1a; 32],
            output_index: 2,
            asset_id: avax(),
            input: SecpTransferInput {
                amount: 5,
                address_indices: vec![0],
            },
        };
        let bytes = input.to_bytes();
        assert_eq!(&bytes[..32], &[0x1a; 32]);
        assert_eq!(&bytes[32..36], &[0, 0, 0, 2]);
        assert_eq!(&bytes[36..68], &avax());
        assert_eq!(TransferableInput::from_exact_bytes(&bytes).unwrap(), input);
    }

    #[test]
    fn test_credential_round_trip() {
        let mut sig = [0u8; 65];
        sig[64] = 1;
        let credential = Credential {
            signatures: vec![sig, [0x42; 65]],
        };
        let bytes = credential.to_bytes();
        assert_eq!(bytes.len(), 4 + 4 + 2 * 65);
        assert_eq!(Credential::from_exact_bytes(&bytes).unwrap(), credential);
    }

    #[test]
    fn test_wrong_component_tag() {
        let output = SecpTransferOutput::to_address(1, [0; 20]);
        let mut bytes = output.to_bytes();
        bytes[3] = 0x05;
        assert_eq!(
            SecpTransferOutput::from_bytes(&bytes).unwrap_err(),
            CodecError::UnexpectedTypeTag {
                expected: SECP_TRANSFER_OUTPUT_TYPE,
                found: SECP_TRANSFER_INPUT_TYPE
            }
        );
    }

    #[test]
    fn test_list_decoding_leaves_next_field_untouched() {
        let inputs = vec![
            EvmOutput {
                address: [1; 20],
                amount: 1,
                asset_id: [2; 32],
            },
            EvmOutput {
                address: [3; 20],
                amount: 2,
                asset_id: [4; 32],
            },
        ];
        let mut bytes = Vec::new();
        put_list(&mut bytes, &inputs);
        bytes.extend_from_slice(&[0xde, 0xad]);

        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_list::<EvmOutput>().unwrap(), inputs);
        assert_eq!(reader.remaining(), 2);
    }
}
