//! The six atomic transaction variants
//!
//! Account-chain (C) import/export have their own layouts. The UTXO-chain (X)
//! and staking-chain (P) variants share one layout per direction and differ
//! only in their type tag, so they are one generic struct parameterised by a
//! chain marker.

use super::fields::{EvmInput, EvmOutput, Id, TransferableInput, TransferableOutput};
use crate::codec::{put_bytes, put_list, put_u32, Decode, Encode, Reader};
use crate::error::CodecResult;

use std::fmt::Debug;
use std::marker::PhantomData;

pub const EVM_IMPORT_TX_TYPE: u32 = 0x0000_0000;
pub const EVM_EXPORT_TX_TYPE: u32 = 0x0000_0001;
pub const AVM_IMPORT_TX_TYPE: u32 = 0x0000_0003;
pub const AVM_EXPORT_TX_TYPE: u32 = 0x0000_0004;
pub const PLATFORM_IMPORT_TX_TYPE: u32 = 0x0000_0011;
pub const PLATFORM_EXPORT_TX_TYPE: u32 = 0x0000_0012;

/// A variant with a fixed leading type tag
pub trait TypedTx: Encode + Decode {
    const TYPE_ID: u32;
}

/// Export from the account chain: debit accounts, emit UTXOs on the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmExportTx {
    pub network_id: u32,
    pub blockchain_id: Id,
    pub destination_chain: Id,
    pub inputs: Vec<EvmInput>,
    pub exported_outputs: Vec<TransferableOutput>,
}

impl TypedTx for EvmExportTx {
    const TYPE_ID: u32 = EVM_EXPORT_TX_TYPE;
}

impl Encode for EvmExportTx {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, Self::TYPE_ID);
        put_u32(out, self.network_id);
        out.extend_from_slice(&self.blockchain_id);
        out.extend_from_slice(&self.destination_chain);
        put_list(out, &self.inputs);
        put_list(out, &self.exported_outputs);
    }
}

impl Decode for EvmExportTx {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        reader.expect_tag(Self::TYPE_ID)?;
        Ok(Self {
            network_id: reader.read_u32()?,
            blockchain_id: reader.read_array()?,
            destination_chain: reader.read_array()?,
            inputs: reader.read_list()?,
            exported_outputs: reader.read_list()?,
        })
    }
}

/// Import into the account chain: spend atomic UTXOs, credit accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmImportTx {
    pub network_id: u32,
    pub blockchain_id: Id,
    pub source_chain: Id,
    pub imported_inputs: Vec<TransferableInput>,
    pub outs: Vec<EvmOutput>,
}

impl TypedTx for EvmImportTx {
    const TYPE_ID: u32 = EVM_IMPORT_TX_TYPE;
}

impl Encode for EvmImportTx {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, Self::TYPE_ID);
        put_u32(out, self.network_id);
        out.extend_from_slice(&self.blockchain_id);
        out.extend_from_slice(&self.source_chain);
        put_list(out, &self.imported_inputs);
        put_list(out, &self.outs);
    }
}

impl Decode for EvmImportTx {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        reader.expect_tag(Self::TYPE_ID)?;
        Ok(Self {
            network_id: reader.read_u32()?,
            blockchain_id: reader.read_array()?,
            source_chain: reader.read_array()?,
            imported_inputs: reader.read_list()?,
            outs: reader.read_list()?,
        })
    }
}

/// Fields shared by every UTXO-style transaction, minus the type tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTx {
    pub network_id: u32,
    pub blockchain_id: Id,
    pub outputs: Vec<TransferableOutput>,
    pub inputs: Vec<TransferableInput>,
    pub memo: Vec<u8>,
}

impl Encode for BaseTx {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.network_id);
        out.extend_from_slice(&self.blockchain_id);
        put_list(out, &self.outputs);
        put_list(out, &self.inputs);
        put_bytes(out, &self.memo);
    }
}

impl Decode for BaseTx {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(Self {
            network_id: reader.read_u32()?,
            blockchain_id: reader.read_array()?,
            outputs: reader.read_list()?,
            inputs: reader.read_list()?,
            memo: reader.read_bytes()?,
        })
    }
}

/// Marker for a UTXO-model chain that carries import/export transactions
pub trait UtxoChain: Debug + Clone + PartialEq + Eq + Send + Sync + 'static {
    const IMPORT_TYPE_ID: u32;
    const EXPORT_TYPE_ID: u32;
}

/// The asset exchange chain (X)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avm;

impl UtxoChain for Avm {
    const IMPORT_TYPE_ID: u32 = AVM_IMPORT_TX_TYPE;
    const EXPORT_TYPE_ID: u32 = AVM_EXPORT_TX_TYPE;
}

/// The staking chain (P)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform;

impl UtxoChain for Platform {
    const IMPORT_TYPE_ID: u32 = PLATFORM_IMPORT_TX_TYPE;
    const EXPORT_TYPE_ID: u32 = PLATFORM_EXPORT_TX_TYPE;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTx<C: UtxoChain> {
    pub base: BaseTx,
    pub source_chain: Id,
    pub ins: Vec<TransferableInput>,
    chain: PhantomData<C>,
}

impl<C: UtxoChain> ImportTx<C> {
    pub fn new(base: BaseTx, source_chain: Id, ins: Vec<TransferableInput>) -> Self {
        Self {
            base,
            source_chain,
            ins,
            chain: PhantomData,
        }
    }
}

impl<C: UtxoChain> TypedTx for ImportTx<C> {
    const TYPE_ID: u32 = C::IMPORT_TYPE_ID;
}

impl<C: UtxoChain> Encode for ImportTx<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, Self::TYPE_ID);
        self.base.encode(out);
        out.extend_from_slice(&self.source_chain);
        put_list(out, &self.ins);
    }
}

impl<C: UtxoChain> Decode for ImportTx<C> {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        reader.expect_tag(Self::TYPE_ID)?;
        let base = BaseTx::decode(reader)?;
        let source_chain = reader.read_array()?;
        let ins = reader.read_list()?;
        Ok(Self::new(base, source_chain, ins))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTx<C: UtxoChain> {
    pub base: BaseTx,
    pub destination_chain: Id,
    pub outs: Vec<TransferableOutput>,
    chain: PhantomData<C>,
}

impl<C: UtxoChain> ExportTx<C> {
    pub fn new(base: BaseTx, destination_chain: Id, outs: Vec<TransferableOutput>) -> Self {
        Self {
            base,
            destination_chain,
            outs,
            chain: PhantomData,
        }
    }
}

impl<C: UtxoChain> TypedTx for ExportTx<C> {
    const TYPE_ID: u32 = C::EXPORT_TYPE_ID;
}

impl<C: UtxoChain> Encode for ExportTx<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, Self::TYPE_ID);
        self.base.encode(out);
        out.extend_from_slice(&self.destination_chain);
        put_list(out, &self.outs);
    }
}

impl<C: UtxoChain> Decode for ExportTx<C> {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self> {
        reader.expect_tag(Self::TYPE_ID)?;
        let base = BaseTx::decode(reader)?;
        let destination_chain = reader.read_array()?;
        let outs = reader.read_list()?;
        Ok(Self::new(base, destination_chain, outs))
    }
}

pub type AvmImportTx = ImportTx<Avm>;
pub type AvmExportTx = ExportTx<Avm>;
pub type PlatformImportTx = ImportTx<Platform>;
pub type PlatformExportTx = ExportTx<Platform>;
