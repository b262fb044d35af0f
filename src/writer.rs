//! Streaming protocol buffer writer with deferred length prefixes for
//! nested messages

use crate::errors::{Error, Result};
use crate::reader::{
    WIRE_TYPE_FIXED32, WIRE_TYPE_FIXED64, WIRE_TYPE_LENGTH_DELIMITED, WIRE_TYPE_VARINT,
};
use byteorder_lite::WriteBytesExt;
use byteorder_lite::{ByteOrder, LittleEndian as LE};

/// Writes protocol buffer fields to a [`WriterBackend`]
///
/// The first sink error is latched and every call after it is a no-op,
/// so callers check [`Writer::err`] (or use [`write`] /
/// [`Writer::finish`]) once at the end instead of after every field.
/// Fields land on the wire in invocation order.
pub struct Writer<W: WriterBackend> {
    sink: W,
    sub: Option<Box<Writer<Vec<u8>>>>,
    err: Option<Error>,
}

/// One-shot encode: runs `cb` against a fresh writer over `sink` and
/// returns the first error, if any
pub fn write<W, F>(sink: W, cb: F) -> Result<()>
where
    W: WriterBackend,
    F: FnOnce(&mut Writer<W>) -> Result<()>,
{
    let mut w = Writer::new(sink);
    cb(&mut w)?;
    w.finish().map(|_| ())
}

impl<W: WriterBackend> Writer<W> {
    /// Creates a new `Writer` around `sink`
    pub fn new(sink: W) -> Writer<W> {
        Writer {
            sink,
            sub: None,
            err: None,
        }
    }

    /// The first error hit by any write so far
    pub fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Returns the sink, or the first error latched while writing
    pub fn finish(self) -> Result<W> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(self.sink),
        }
    }

    fn raw_varint(&mut self, mut v: u64) {
        if self.err.is_some() {
            return;
        }
        while v > 0x7f {
            if let Err(e) = self.sink.pb_write_u8((v as u8 & 0x7f) | 0x80) {
                self.err = Some(e);
                return;
            }
            v >>= 7;
        }
        if let Err(e) = self.sink.pb_write_u8(v as u8) {
            self.err = Some(e);
        }
    }

    fn raw_u32(&mut self, v: u32) {
        if self.err.is_some() {
            return;
        }
        if let Err(e) = self.sink.pb_write_u32(v) {
            self.err = Some(e);
        }
    }

    fn raw_u64(&mut self, v: u64) {
        if self.err.is_some() {
            return;
        }
        if let Err(e) = self.sink.pb_write_u64(v) {
            self.err = Some(e);
        }
    }

    fn raw_all(&mut self, buf: &[u8]) {
        if self.err.is_some() || buf.is_empty() {
            return;
        }
        if let Err(e) = self.sink.pb_write_all(buf) {
            self.err = Some(e);
        }
    }

    fn tag(&mut self, num: u32, wire_type: u8) {
        self.raw_varint(((num as u64) << 3) | wire_type as u64);
    }

    /// Writes a `uint64` field as a varint
    pub fn uint64(&mut self, num: u32, v: u64) {
        self.tag(num, WIRE_TYPE_VARINT);
        self.raw_varint(v);
    }

    /// Writes a `uint32` field as a varint
    pub fn uint32(&mut self, num: u32, v: u32) {
        self.uint64(num, v as u64);
    }

    /// Writes an `int64` field as a varint
    pub fn int64(&mut self, num: u32, v: i64) {
        self.uint64(num, v as u64);
    }

    /// Writes an `int32` field as a varint; negative values sign-extend
    /// to ten bytes, like every protobuf implementation
    pub fn int32(&mut self, num: u32, v: i32) {
        self.uint64(num, v as u64);
    }

    /// Writes a `sint32` field, zigzag encoded
    pub fn sint32(&mut self, num: u32, v: i32) {
        self.uint32(num, ((v << 1) ^ (v >> 31)) as u32);
    }

    /// Writes a `sint64` field, zigzag encoded
    pub fn sint64(&mut self, num: u32, v: i64) {
        self.uint64(num, ((v << 1) ^ (v >> 63)) as u64);
    }

    /// Writes a `bool` field, 1 = true, 0 = false
    pub fn bool(&mut self, num: u32, v: bool) {
        self.uint64(num, u64::from(v));
    }

    /// Writes an `enum` field as its `int32` value
    pub fn enumeration(&mut self, num: u32, v: i32) {
        self.int32(num, v);
    }

    /// Writes a `fixed64` field, little endian
    pub fn fixed64(&mut self, num: u32, v: u64) {
        self.tag(num, WIRE_TYPE_FIXED64);
        self.raw_u64(v);
    }

    /// Writes a `fixed32` field, little endian
    pub fn fixed32(&mut self, num: u32, v: u32) {
        self.tag(num, WIRE_TYPE_FIXED32);
        self.raw_u32(v);
    }

    /// Writes a `sfixed64` field, little endian
    pub fn sfixed64(&mut self, num: u32, v: i64) {
        self.fixed64(num, v as u64);
    }

    /// Writes a `sfixed32` field, little endian
    pub fn sfixed32(&mut self, num: u32, v: i32) {
        self.fixed32(num, v as u32);
    }

    /// Writes a `double` field as its bit pattern
    pub fn double(&mut self, num: u32, v: f64) {
        self.fixed64(num, v.to_bits());
    }

    /// Writes a `float` field as its bit pattern
    pub fn float(&mut self, num: u32, v: f32) {
        self.fixed32(num, v.to_bits());
    }

    /// Writes a length-delimited field: length first, then the data
    pub fn bytes(&mut self, num: u32, v: &[u8]) {
        self.tag(num, WIRE_TYPE_LENGTH_DELIMITED);
        self.raw_varint(v.len() as u64);
        self.raw_all(v);
    }

    /// Writes a `string` field; `&str` is valid UTF-8 by construction
    pub fn string(&mut self, num: u32, v: &str) {
        self.bytes(num, v.as_bytes());
    }

    /// Writes a nested message
    ///
    /// The callback fills a reusable scratch writer; the finished
    /// buffer is then emitted as one length-delimited field, so the
    /// length prefix costs no second encoding pass. Nesting recurses
    /// through the scratch writer's own scratch; do not keep a
    /// reference to it past the callback.
    pub fn message<F>(&mut self, num: u32, cb: F)
    where
        F: FnOnce(&mut Writer<Vec<u8>>) -> Result<()>,
    {
        if self.err.is_some() {
            return;
        }
        let mut sub = self
            .sub
            .take()
            .unwrap_or_else(|| Box::new(Writer::new(Vec::new())));
        sub.sink.clear();
        sub.err = None;
        match cb(&mut sub) {
            Err(e) => self.err = Some(e),
            Ok(()) => match sub.err.take() {
                Some(e) => self.err = Some(e),
                None => self.bytes(num, &sub.sink),
            },
        }
        self.sub = Some(sub);
    }
}

/// Writer backend abstraction
pub trait WriterBackend {
    /// Write a u8
    fn pb_write_u8(&mut self, x: u8) -> Result<()>;

    /// Write a little endian u32
    fn pb_write_u32(&mut self, x: u32) -> Result<()>;

    /// Write a little endian u64
    fn pb_write_u64(&mut self, x: u64) -> Result<()>;

    /// Write all bytes in buf
    fn pb_write_all(&mut self, buf: &[u8]) -> Result<()>;
}

/// A writer backend for fixed-size byte buffers
pub struct BytesWriter<'a> {
    buf: &'a mut [u8],
    cursor: usize,
}

impl<'a> BytesWriter<'a> {
    /// Create a new `BytesWriter` to write into `buf`
    pub fn new(buf: &'a mut [u8]) -> BytesWriter<'a> {
        BytesWriter { buf, cursor: 0 }
    }

    /// Number of bytes written so far
    pub fn written(&self) -> usize {
        self.cursor
    }
}

impl<'a> WriterBackend for BytesWriter<'a> {
    #[inline(always)]
    fn pb_write_u8(&mut self, x: u8) -> Result<()> {
        if self.buf.len() - self.cursor < 1 {
            Err(Error::UnexpectedEndOfBuffer)
        } else {
            self.buf[self.cursor] = x;
            self.cursor += 1;
            Ok(())
        }
    }

    #[inline(always)]
    fn pb_write_u32(&mut self, x: u32) -> Result<()> {
        if self.buf.len() - self.cursor < 4 {
            Err(Error::UnexpectedEndOfBuffer)
        } else {
            LE::write_u32(&mut self.buf[self.cursor..], x);
            self.cursor += 4;
            Ok(())
        }
    }

    #[inline(always)]
    fn pb_write_u64(&mut self, x: u64) -> Result<()> {
        if self.buf.len() - self.cursor < 8 {
            Err(Error::UnexpectedEndOfBuffer)
        } else {
            LE::write_u64(&mut self.buf[self.cursor..], x);
            self.cursor += 8;
            Ok(())
        }
    }

    #[inline(always)]
    fn pb_write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.buf.len() - self.cursor < buf.len() {
            Err(Error::UnexpectedEndOfBuffer)
        } else {
            self.buf[self.cursor..self.cursor + buf.len()].copy_from_slice(buf);
            self.cursor += buf.len();
            Ok(())
        }
    }
}

impl<W: std::io::Write> WriterBackend for W {
    #[inline(always)]
    fn pb_write_u8(&mut self, x: u8) -> Result<()> {
        self.write_u8(x).map_err(|e| e.into())
    }

    #[inline(always)]
    fn pb_write_u32(&mut self, x: u32) -> Result<()> {
        self.write_u32::<LE>(x).map_err(|e| e.into())
    }

    #[inline(always)]
    fn pb_write_u64(&mut self, x: u64) -> Result<()> {
        self.write_u64::<LE>(x).map_err(|e| e.into())
    }

    #[inline(always)]
    fn pb_write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf).map_err(|e| e.into())
    }
}
