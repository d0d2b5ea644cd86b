//! Fixed-width integer and byte-array primitives

use super::{Decode, Encode};
use crate::error::{CodecError, CodecResult, Malformed};

pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Length-prefixed byte string (used by memos)
pub fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

/// Count-prefixed list of encodable elements
pub fn put_list<T: Encode>(out: &mut Vec<u8>, items: &[T]) {
    put_u32(out, items.len() as u32);
    for item in items {
        item.encode(out);
    }
}

/// Cursor over a byte slice
#[derive(Debug)]
pub struct Reader<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(raw: &'a [u8]) -> Self {
        Self { raw, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.raw.len() - self.pos
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CodecError::malformed(
                self.pos,
                Malformed::Truncated {
                    needed: len,
                    available: self.remaining(),
                },
            ));
        }
        let slice = &self.raw[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Look at the next `u32` without consuming it
    pub fn peek_u32(&self) -> CodecResult<u32> {
        let mut ahead = Reader {
            raw: self.raw,
            pos: self.pos,
        };
        ahead.read_u32()
    }

    /// Consume a type tag and require it to equal `expected`
    pub fn expect_tag(&mut self, expected: u32) -> CodecResult<()> {
        let found = self.read_u32()?;
        if found != expected {
            return Err(CodecError::UnexpectedTypeTag { expected, found });
        }
        Ok(())
    }

    /// Length-prefixed byte string
    pub fn read_bytes(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Count-prefixed list; stops exactly after `count` elements
    pub fn read_list<T: Decode>(&mut self) -> CodecResult<Vec<T>> {
        let start = self.pos;
        let count = self.read_u32()?;
        // Every element occupies at least one byte, so a larger count is garbage.
        if count as usize > self.remaining() {
            return Err(CodecError::malformed(
                start,
                Malformed::ListTooLong {
                    count,
                    available: self.remaining(),
                },
            ));
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    /// Count-prefixed list of fixed-size arrays
    pub fn read_array_list<const N: usize>(&mut self) -> CodecResult<Vec<[u8; N]>> {
        let start = self.pos;
        let count = self.read_u32()?;
        let needed = (count as usize).saturating_mul(N);
        if needed > self.remaining() {
            return Err(CodecError::malformed(
                start,
                Malformed::ListTooLong {
                    count,
                    available: self.remaining(),
                },
            ));
        }
        (0..count).map(|_| self.read_array::<N>()).collect()
    }

    /// Count-prefixed list of `u32`
    pub fn read_u32_list(&mut self) -> CodecResult<Vec<u32>> {
        Ok(self
            .read_array_list::<4>()?
            .into_iter()
            .map(u32::from_be_bytes)
            .collect())
    }
}

/// Count-prefixed list of fixed-size arrays
pub fn put_array_list<const N: usize>(out: &mut Vec<u8>, items: &[[u8; N]]) {
    put_u32(out, items.len() as u32);
    for item in items {
        out.extend_from_slice(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_widths() {
        let mut out = Vec::new();
        put_u16(&mut out, 0x0102);
        put_u32(&mut out, 0x0304_0506);
        put_u64(&mut out, 0x0708_090a_0b0c_0d0e);
        assert_eq!(
            out,
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]
        );

        let mut reader = Reader::new(&out);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.read_u32().unwrap(), 0x0304_0506);
        assert_eq!(reader.read_u64().unwrap(), 0x0708_090a_0b0c_0d0e);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_short_input_is_malformed() {
        let mut reader = Reader::new(&[0, 0, 1]);
        let err = reader.read_u32().unwrap_err();
        assert_eq!(
            err,
            CodecError::malformed(
                0,
                Malformed::Truncated {
                    needed: 4,
                    available: 3
                }
            )
        );
        // Cursor does not advance on failure
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_list_stops_at_declared_count() {
        let mut out = Vec::new();
        put_array_list(&mut out, &[[0xaa; 2], [0xbb; 2]]);
        out.extend_from_slice(&[0xcc, 0xdd]);

        let mut reader = Reader::new(&out);
        let items = reader.read_array_list::<2>().unwrap();
        assert_eq!(items, vec![[0xaa; 2], [0xbb; 2]]);
        assert_eq!(reader.remaining(), 2);
    }

    #[test]
    fn test_oversized_count_rejected_without_allocating() {
        let mut out = Vec::new();
        put_u32(&mut out, u32::MAX);
        let err = Reader::new(&out).read_u32_list().unwrap_err();
        assert!(matches!(
            err,
            CodecError::MalformedInput {
                kind: Malformed::ListTooLong { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_empty_byte_string() {
        let mut out = Vec::new();
        put_bytes(&mut out, &[]);
        assert_eq!(out, vec![0, 0, 0, 0]);
        assert_eq!(Reader::new(&out).read_bytes().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_expect_tag() {
        let mut reader = Reader::new(&[0, 0, 0, 7]);
        assert_eq!(reader.peek_u32().unwrap(), 7);
        assert_eq!(
            reader.expect_tag(5).unwrap_err(),
            CodecError::UnexpectedTypeTag {
                expected: 5,
                found: 7
            }
        );
    }
}
