//! Wire-level readers: a zero-copy reader over a byte slice and a
//! budgeted reader over a byte stream

use crate::alloc::Allocator;
use crate::errors::{Error, Result};
use byteorder_lite::ByteOrder;
use byteorder_lite::LE;
use std::io;

pub(crate) const WIRE_TYPE_VARINT: u8 = 0;
pub(crate) const WIRE_TYPE_FIXED64: u8 = 1;
pub(crate) const WIRE_TYPE_LENGTH_DELIMITED: u8 = 2;
pub(crate) const WIRE_TYPE_FIXED32: u8 = 5;

/// A zero-copy reader over a byte slice
///
/// Length-delimited payloads come back as sub-slices of the input and
/// stay valid for as long as the input buffer does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesReader<'b> {
    body: &'b [u8],
    offset: usize,
}

impl<'b> BytesReader<'b> {
    /// Creates a new reader over `body`
    pub fn from_bytes(body: &'b [u8]) -> Self {
        Self { body, offset: 0 }
    }

    /// Reads a varint encoded u64
    ///
    /// Accumulates modulo 2^64: continuation bytes past the tenth shift
    /// out entirely and contribute nothing
    #[inline(always)]
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut r: u64 = 0;
        let mut shift: u32 = 0;
        while let Some(&b) = self.body.get(self.offset) {
            self.offset += 1;
            if shift < 64 {
                r = r.wrapping_add(((b & 0x7f) as u64) << shift);
            }
            if b & 0x80 == 0 {
                // last byte of varint
                return Ok(r);
            }
            shift += 7;
        }
        Err(Error::Truncated)
    }

    /// Reads `n` bytes as a sub-slice of the input, without copying
    #[inline(always)]
    pub fn read_bytes(&mut self, n: usize) -> Result<&'b [u8]> {
        let end = self.offset.checked_add(n).ok_or(Error::Truncated)?;
        let v = self.body.get(self.offset..end).ok_or(Error::Truncated)?;
        self.offset = end;
        Ok(v)
    }

    /// Reads a varint length followed by that many bytes
    #[inline]
    pub fn read_length_delimited(&mut self) -> Result<&'b [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| Error::Truncated)?;
        self.read_bytes(len)
    }

    /// Reads a fixed64 (little endian u64)
    #[inline]
    pub fn read_fixed64(&mut self) -> Result<u64> {
        self.read_bytes(8).map(LE::read_u64)
    }

    /// Reads a fixed32 (little endian u32)
    #[inline]
    pub fn read_fixed32(&mut self) -> Result<u32> {
        self.read_bytes(4).map(LE::read_u32)
    }

    /// Checks whether every input byte has been consumed
    #[inline(always)]
    pub fn is_eof(&self) -> bool {
        self.offset >= self.body.len()
    }
}

/// Byte-stream input for the streaming parser
///
/// One byte of push-back is enough: the parser only ever peeks a single
/// byte to find out whether a packed payload still has values left.
pub trait Source {
    /// Reads the next byte, `None` at end of stream
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Hands the most recently read byte back to the source
    fn unread_byte(&mut self, byte: u8);

    /// Fills `buf` completely
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// Adapts any `std::io::Read` into a [`Source`]
pub struct ReadSource<R> {
    inner: R,
    pushback: Option<u8>,
}

impl<R: io::Read> ReadSource<R> {
    /// Creates a new source over `inner`
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pushback: None,
        }
    }
}

impl<R: io::Read> Source for ReadSource<R> {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.pushback.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn unread_byte(&mut self, byte: u8) {
        self.pushback = Some(byte);
    }

    fn read_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if let Some(b) = self.pushback.take() {
            buf[0] = b;
            buf = &mut buf[1..];
        }
        self.inner.read_exact(buf)
    }
}

/// A reader over a [`Source`] with a running byte budget
///
/// `limit` is how many bytes the current message scope may still
/// consume; the parser swaps it when recursing into nested messages, so
/// a budget of zero is either the end of the whole message or a
/// sub-message boundary. Length-delimited payloads are filled through
/// the [`Allocator`]: the slice a handler sees lives in the allocator,
/// not in the input.
pub struct StreamReader<'r, S, A> {
    source: &'r mut S,
    mem: &'r mut A,
    scratch: [u8; 10],
    limit: u64,
}

impl<'r, S: Source, A: Allocator> StreamReader<'r, S, A> {
    /// Creates a new reader with `limit` bytes of budget
    pub fn new(source: &'r mut S, mem: &'r mut A, limit: u64) -> Self {
        Self {
            source,
            mem,
            scratch: [0; 10],
            limit,
        }
    }

    /// Bytes the current scope may still consume
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Replaces the byte budget; used when entering and leaving a
    /// nested message scope
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    /// Reads a varint, treating a clean end of input as a signal rather
    /// than an error: `Ok(None)` when the budget or the stream ends
    /// before the first byte of a new token, `Err(Truncated)` when it
    /// ends mid-token
    pub fn read_varint_or_break(&mut self) -> Result<Option<u64>> {
        let mut r: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            if self.limit == 0 {
                if shift == 0 {
                    return Ok(None);
                }
                return Err(Error::Truncated);
            }
            let b = match self.source.read_byte() {
                Ok(Some(b)) => b,
                Ok(None) if shift == 0 => return Ok(None),
                _ => return Err(Error::Truncated),
            };
            self.limit -= 1;
            if shift < 64 {
                r = r.wrapping_add(((b & 0x7f) as u64) << shift);
            }
            if b & 0x80 == 0 {
                return Ok(Some(r));
            }
            shift += 7;
        }
    }

    /// Reads a varint; running out of input anywhere is truncation
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut r: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            if self.limit == 0 {
                return Err(Error::Truncated);
            }
            let b = match self.source.read_byte() {
                Ok(Some(b)) => b,
                _ => return Err(Error::Truncated),
            };
            self.limit -= 1;
            if shift < 64 {
                r = r.wrapping_add(((b & 0x7f) as u64) << shift);
            }
            if b & 0x80 == 0 {
                return Ok(r);
            }
            shift += 7;
        }
    }

    /// Checks whether the current scope still has budget and the stream
    /// has at least one more byte
    pub fn has_more(&mut self) -> bool {
        if self.limit == 0 {
            return false;
        }
        match self.source.read_byte() {
            Ok(Some(b)) => {
                self.source.unread_byte(b);
                true
            }
            _ => false,
        }
    }

    /// Reads `n` bytes into a buffer obtained from the allocator
    pub fn read_bytes(&mut self, n: u64) -> Result<&[u8]> {
        if n > self.limit {
            return Err(Error::Truncated);
        }
        let len = usize::try_from(n).map_err(|_| Error::Truncated)?;
        let buf = self.mem.alloc(len);
        self.source.read_exact(buf).map_err(|_| Error::Truncated)?;
        self.limit -= n;
        Ok(buf)
    }

    /// Consumes `n` bytes without keeping them
    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.read_bytes(n)?;
        Ok(())
    }

    /// Reads a fixed64 (little endian u64)
    pub fn read_fixed64(&mut self) -> Result<u64> {
        if self.limit < 8 {
            return Err(Error::Truncated);
        }
        self.source
            .read_exact(&mut self.scratch[..8])
            .map_err(|_| Error::Truncated)?;
        self.limit -= 8;
        Ok(LE::read_u64(&self.scratch[..8]))
    }

    /// Reads a fixed32 (little endian u32)
    pub fn read_fixed32(&mut self) -> Result<u32> {
        if self.limit < 4 {
            return Err(Error::Truncated);
        }
        self.source
            .read_exact(&mut self.scratch[..4])
            .map_err(|_| Error::Truncated)?;
        self.limit -= 4;
        Ok(LE::read_u32(&self.scratch[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;

    #[test]
    fn varint_single_byte() {
        let mut r = BytesReader::from_bytes(&[0x2a]);
        assert_eq!(r.read_varint().unwrap(), 42);
        assert!(r.is_eof());
    }

    #[test]
    fn varint_multi_byte() {
        let mut r = BytesReader::from_bytes(&[0x96, 0x01]);
        assert_eq!(r.read_varint().unwrap(), 150);
    }

    #[test]
    fn varint_ten_bytes() {
        // -1 as a sign-extended 64-bit varint
        let body = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut r = BytesReader::from_bytes(&body);
        assert_eq!(r.read_varint().unwrap(), u64::MAX);
    }

    #[test]
    fn varint_truncated() {
        let mut r = BytesReader::from_bytes(&[0x80]);
        assert!(matches!(r.read_varint(), Err(Error::Truncated)));

        let mut r = BytesReader::from_bytes(&[]);
        assert!(matches!(r.read_varint(), Err(Error::Truncated)));
    }

    #[test]
    fn fixed_little_endian() {
        let mut r = BytesReader::from_bytes(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(r.read_fixed32().unwrap(), 0x0403_0201);

        let mut r = BytesReader::from_bytes(&[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(r.read_fixed64().unwrap(), 1);

        let mut r = BytesReader::from_bytes(&[1, 2, 3]);
        assert!(matches!(r.read_fixed32(), Err(Error::Truncated)));
    }

    #[test]
    fn bytes_alias_input() {
        let body = [5u8, 6, 7, 8];
        let mut r = BytesReader::from_bytes(&body);
        let v = r.read_bytes(3).unwrap();
        assert_eq!(v, &body[..3]);
        assert_eq!(v.as_ptr(), body.as_ptr());
        assert!(matches!(r.read_bytes(2), Err(Error::Truncated)));
    }

    #[test]
    fn length_delimited_slices() {
        let mut r = BytesReader::from_bytes(&[0x03, b'a', b'b', b'c', 0x05]);
        assert_eq!(r.read_length_delimited().unwrap(), b"abc");
        assert!(matches!(r.read_length_delimited(), Err(Error::Truncated)));
    }

    #[test]
    fn stream_varint_or_break() {
        let body = [0x96, 0x01, 0x80];
        let mut src = ReadSource::new(&body[..]);
        let mut mem = HeapAllocator::new();
        let mut r = StreamReader::new(&mut src, &mut mem, u64::MAX);
        assert_eq!(r.read_varint_or_break().unwrap(), Some(150));
        // stream ends mid-varint
        assert!(matches!(r.read_varint_or_break(), Err(Error::Truncated)));
    }

    #[test]
    fn stream_clean_end() {
        let mut src = ReadSource::new(&[][..]);
        let mut mem = HeapAllocator::new();
        let mut r = StreamReader::new(&mut src, &mut mem, u64::MAX);
        assert_eq!(r.read_varint_or_break().unwrap(), None);
    }

    #[test]
    fn stream_limit_is_a_boundary() {
        let body = [0x08, 0x08];
        let mut src = ReadSource::new(&body[..]);
        let mut mem = HeapAllocator::new();
        let mut r = StreamReader::new(&mut src, &mut mem, 1);
        assert_eq!(r.read_varint_or_break().unwrap(), Some(8));
        assert_eq!(r.read_varint_or_break().unwrap(), None);
        assert_eq!(r.limit(), 0);
    }

    #[test]
    fn stream_bytes_and_skip() {
        let body = [1u8, 2, 3, 4, 5, 6];
        let mut src = ReadSource::new(&body[..]);
        let mut mem = HeapAllocator::new();
        let mut r = StreamReader::new(&mut src, &mut mem, 5);
        assert_eq!(r.read_bytes(2).unwrap(), &[1, 2]);
        r.skip(2).unwrap();
        assert_eq!(r.limit(), 1);
        // budget runs out before the source does
        assert!(matches!(r.read_bytes(2), Err(Error::Truncated)));
    }

    #[test]
    fn has_more_pushes_the_peeked_byte_back() {
        let body = [0x2a];
        let mut src = ReadSource::new(&body[..]);
        let mut mem = HeapAllocator::new();
        let mut r = StreamReader::new(&mut src, &mut mem, u64::MAX);
        assert!(r.has_more());
        assert!(r.has_more());
        assert_eq!(r.read_varint().unwrap(), 42);
        assert!(!r.has_more());
    }
}
