//! Codec envelopes: unsigned and signed transactions, UTXO records

use super::atomic::{
    AvmExportTx, AvmImportTx, EvmExportTx, EvmImportTx, PlatformExportTx, PlatformImportTx,
    AVM_EXPORT_TX_TYPE, AVM_IMPORT_TX_TYPE, EVM_EXPORT_TX_TYPE, EVM_IMPORT_TX_TYPE,
    PLATFORM_EXPORT_TX_TYPE, PLATFORM_IMPORT_TX_TYPE,
};
use super::fields::{Credential, Id, SecpTransferOutput};
use crate::chain::Chain;
use crate::codec::{cb58, put_list, put_u16, put_u32, Decode, Encode, Reader};
use crate::error::{CodecError, CodecResult};

use sha2::{Digest, Sha256};

/// The only codec version the ledger uses for these payloads
pub const CODEC_VERSION: u16 = 0x0000;

/// One of the six atomic transaction variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicTx {
    EvmImport(EvmImportTx),
    EvmExport(EvmExportTx),
    AvmImport(AvmImportTx),
    AvmExport(AvmExportTx),
    PlatformImport(PlatformImportTx),
    PlatformExport(PlatformExportTx),
}

impl AtomicTx {
    /// Chain whose node accepts this transaction
    pub fn issuing_chain(&self) -> Chain {
        match self {
            AtomicTx::EvmImport(_) | AtomicTx::EvmExport(_) => Chain::C,
            AtomicTx::AvmImport(_) | AtomicTx::AvmExport(_) => Chain::X,
            AtomicTx::PlatformImport(_) | AtomicTx::PlatformExport(_) => Chain::P,
        }
    }

    /// Number of inputs that each need a credential
    pub fn input_count(&self) -> usize {
        match self {
            AtomicTx::EvmImport(tx) => tx.imported_inputs.len(),
            AtomicTx::EvmExport(tx) => tx.inputs.len(),
            AtomicTx::AvmImport(tx) => tx.base.inputs.len() + tx.ins.len(),
            AtomicTx::PlatformImport(tx) => tx.base.inputs.len() + tx.ins.len(),
            AtomicTx::AvmExport(tx) => tx.base.inputs.len(),
            AtomicTx::PlatformExport(tx) => tx.base.inputs.len(),
        }
    }
}

impl Encode for AtomicTx {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            AtomicTx::EvmImport(tx) => tx.encode(out),
            AtomicTx::EvmExport(tx) => tx.encode(out),
            AtomicTx::AvmImport(tx) => tx.encode(out),
            AtomicTx::AvmExport(tx) => tx.encode(out),
            AtomicTx::PlatformImport(tx) => tx.encode(out),
            AtomicTx::PlatformExport(tx) => tx.encode(out),
        }
    }
}

impl Decode for AtomicTx {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        // Each variant parser re-reads and checks its own tag.
        Ok(match reader.peek_u32()? {
            EVM_IMPORT_TX_TYPE => AtomicTx::EvmImport(EvmImportTx::decode(reader)?),
            EVM_EXPORT_TX_TYPE => AtomicTx::EvmExport(EvmExportTx::decode(reader)?),
            AVM_IMPORT_TX_TYPE => AtomicTx::AvmImport(AvmImportTx::decode(reader)?),
            AVM_EXPORT_TX_TYPE => AtomicTx::AvmExport(AvmExportTx::decode(reader)?),
            PLATFORM_IMPORT_TX_TYPE => AtomicTx::PlatformImport(PlatformImportTx::decode(reader)?),
            PLATFORM_EXPORT_TX_TYPE => AtomicTx::PlatformExport(PlatformExportTx::decode(reader)?),
            other => return Err(CodecError::UnknownTransactionType(other)),
        })
    }
}

fn read_codec_version(reader: &mut Reader<'_>) -> CodecResult<()> {
    let version = reader.read_u16()?;
    if version != CODEC_VERSION {
        return Err(CodecError::UnsupportedCodec(version));
    }
    Ok(())
}

/// Codec id followed by one atomic transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub tx: AtomicTx,
}

impl UnsignedTransaction {
    pub fn new(tx: AtomicTx) -> Self {
        Self { tx }
    }

    /// SHA-256 over the serialized envelope. This is what custody signs.
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.to_bytes()).into()
    }

    pub fn to_cb58(&self) -> String {
        cb58::encode(&self.to_bytes())
    }

    /// Parse a stored CB58 payload; trailing bytes are an error
    pub fn from_cb58(text: &str) -> CodecResult<Self> {
        Self::from_exact_bytes(&cb58::decode(text)?)
    }

    /// Attach one credential per input, all carrying `signature`
    pub fn sign_with(self, signature: [u8; 65]) -> SignedTransaction {
        let credentials = (0..self.tx.input_count())
            .map(|_| Credential {
                signatures: vec![signature],
            })
            .collect();
        SignedTransaction {
            unsigned: self,
            credentials,
        }
    }
}

impl Encode for UnsignedTransaction {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, CODEC_VERSION);
        self.tx.encode(out);
    }
}

impl Decode for UnsignedTransaction {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        read_codec_version(reader)?;
        Ok(Self {
            tx: AtomicTx::decode(reader)?,
        })
    }
}

/// Unsigned envelope plus credentials. Built forward-only, never parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub credentials: Vec<Credential>,
}

impl SignedTransaction {
    pub fn to_cb58(&self) -> String {
        cb58::encode(&self.to_bytes())
    }
}

impl Encode for SignedTransaction {
    fn encode(&self, out: &mut Vec<u8>) {
        self.unsigned.encode(out);
        put_list(out, &self.credentials);
    }
}

/// Spendable output as returned by `getUTXOs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub tx_id: Id,
    pub output_index: u32,
    pub asset_id: Id,
    pub output: SecpTransferOutput,
}

impl Utxo {
    pub fn from_cb58(text: &str) -> CodecResult<Self> {
        Self::from_exact_bytes(&cb58::decode(text)?)
    }

    pub fn amount(&self) -> u64 {
        self.output.amount
    }
}

impl Encode for Utxo {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, CODEC_VERSION);
        out.extend_from_slice(&self.tx_id);
        put_u32(out, self.output_index);
        out.extend_from_slice(&self.asset_id);
        self.output.encode(out);
    }
}

impl Decode for Utxo {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        read_codec_version(reader)?;
        Ok(Self {
            tx_id: reader.read_array()?,
            output_index: reader.read_u32()?,
            asset_id: reader.read_array()?,
            output: SecpTransferOutput::decode(reader)?,
        })
    }
}
