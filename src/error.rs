//! Error types for the swap relayer

use thiserror::Error;

/// Shape violations found while decoding wire bytes or CB58 text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Malformed {
    #[error("needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid base58: {0}")]
    InvalidBase58(String),

    #[error("list of {count} elements cannot fit in {available} remaining bytes")]
    ListTooLong { count: u32, available: usize },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// Codec-level errors. None of these ever partially apply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed input at offset {offset}: {kind}")]
    MalformedInput { offset: usize, kind: Malformed },

    #[error("Unexpected type tag {found:#010x}, expected {expected:#010x}")]
    UnexpectedTypeTag { expected: u32, found: u32 },

    #[error("Unknown transaction type {0:#010x}")]
    UnknownTransactionType(u32),

    #[error("Unsupported codec version {0}")]
    UnsupportedCodec(u16),
}

impl CodecError {
    pub fn malformed(offset: usize, kind: Malformed) -> Self {
        CodecError::MalformedInput { offset, kind }
    }

    /// True when a CB58 payload failed its checksum
    #[cfg(test)]
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(
            self,
            CodecError::MalformedInput {
                kind: Malformed::ChecksumMismatch,
                ..
            }
        )
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Illegal transition {transition} from state {from} on {entity} {id}")]
    IllegalTransition {
        entity: &'static str,
        id: String,
        from: String,
        transition: String,
    },

    #[error("{entity} {id} changed state concurrently (expected {expected})")]
    StaleState {
        entity: &'static str,
        id: String,
        expected: String,
    },

    #[error("Signature verification failed for {subject}: {reason}")]
    SignatureVerificationFailed { subject: String, reason: String },

    #[error("{service} unavailable: {message}")]
    RemoteUnavailable {
        service: &'static str,
        message: String,
    },

    #[error("Ledger rejected transaction on {chain}-chain ({code}): {message}")]
    LedgerRejected {
        chain: char,
        code: i64,
        message: String,
    },

    #[error("Unknown response from {service}: {body}")]
    UnknownResponse {
        service: &'static str,
        body: String,
    },

    #[error("Custody signing failed for job {job_id}: {reason}")]
    CustodyFailed { job_id: String, reason: String },

    #[error("No key configured for derivation path {0}")]
    UnknownKey(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Cannot build transaction: {0}")]
    Build(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::RemoteUnavailable { .. }
                | RelayerError::StaleState { .. }
                | RelayerError::Database(_)
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RelayerError::SignatureVerificationFailed { .. }
                | RelayerError::Codec(_)
                | RelayerError::UnknownKey(_)
        )
    }

    pub fn remote(service: &'static str, message: impl ToString) -> Self {
        RelayerError::RemoteUnavailable {
            service,
            message: message.to_string(),
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
