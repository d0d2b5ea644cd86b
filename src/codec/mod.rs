//! Wire codec for the ledger's binary format
//!
//! Everything is fixed-width big-endian. Lists are a `u32` count followed by
//! exactly that many elements; decoding walks an explicit cursor and never
//! looks for delimiters.

pub mod cb58;
mod primitives;

pub use primitives::{put_array_list, put_bytes, put_list, put_u16, put_u32, put_u64, Reader};

use crate::error::{CodecError, CodecResult, Malformed};

/// Types with a byte-exact encoding
pub trait Encode {
    fn encode(&self, out: &mut Vec<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Types that can be parsed back from their encoding
pub trait Decode: Sized {
    fn decode(reader: &mut Reader<'_>) -> CodecResult<Self>;

    /// Parse from the start of `raw`, returning the value and the bytes consumed
    fn from_bytes(raw: &[u8]) -> CodecResult<(Self, usize)> {
        let mut reader = Reader::new(raw);
        let value = Self::decode(&mut reader)?;
        Ok((value, reader.position()))
    }

    /// Parse `raw` and require that nothing follows the value
    fn from_exact_bytes(raw: &[u8]) -> CodecResult<Self> {
        let (value, consumed) = Self::from_bytes(raw)?;
        if consumed != raw.len() {
            return Err(CodecError::malformed(
                consumed,
                Malformed::TrailingBytes(raw.len() - consumed),
            ));
        }
        Ok(value)
    }
}
