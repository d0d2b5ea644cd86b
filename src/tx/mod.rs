//! Atomic transaction codec and builders

pub mod atomic;
pub mod builder;
pub mod envelope;
pub mod fields;

pub use builder::{EvmExportRequest, FeePolicy, ImportRequest, TxBuilder, UtxoExportRequest};
pub use envelope::UnsignedTransaction;
