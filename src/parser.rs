//! The callback-driven parser: schema construction and the two
//! top-level decode loops (slice and stream)

use crate::alloc::{Allocator, HeapAllocator};
use crate::errors::{Error, Result};
use crate::reader::{
    BytesReader, Source, StreamReader, WIRE_TYPE_FIXED32, WIRE_TYPE_FIXED64,
    WIRE_TYPE_LENGTH_DELIMITED, WIRE_TYPE_VARINT,
};
use crate::schema::{Field, Schema};

type HookFn<'a> = Box<dyn Fn() -> Result<()> + 'a>;

/// A schema-driven protocol buffer parser
///
/// Handlers are registered per field number during construction;
/// decoding then drives them in wire order, with no code generation and
/// no intermediate message tree:
///
/// ```
/// use raw_protobuf::{write, Parser};
/// use std::cell::Cell;
///
/// # fn main() -> raw_protobuf::Result<()> {
/// let mut body = Vec::new();
/// write(&mut body, |w| {
///     w.int32(1, 42);
///     w.string(2, "hello");
///     Ok(())
/// })?;
///
/// let total = Cell::new(0);
/// let parser = Parser::new()
///     .int32(1, |v| {
///         total.set(total.get() + v);
///         Ok(())
///     })
///     .string(2, |s| {
///         assert_eq!(s, "hello");
///         Ok(())
///     });
///
/// parser.parse(&body)?;
/// assert_eq!(total.get(), 42);
/// # Ok(())
/// # }
/// ```
///
/// Once built, a parser is read-only: the same instance can decode any
/// number of payloads, through [`Parser::parse`] for in-memory slices
/// (length-delimited payloads alias the input, zero copy) or through
/// [`Parser::read`] for byte streams (payloads live in an
/// [`Allocator`]). Handlers abort the parse by returning an error; the
/// parser prepends `"<name>[<field number>]: "` and hands it back.
#[derive(Default)]
pub struct Parser<'a> {
    begin: Option<HookFn<'a>>,
    end: Option<HookFn<'a>>,
    name: Option<String>,
    schema: Schema<'a>,
}

impl<'a> Parser<'a> {
    /// Creates a parser with nothing registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name used in error prefixes; `<unnamed>` otherwise
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Runs before the first field of every message this parser decodes
    pub fn begin<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + 'a,
    {
        self.begin = Some(Box::new(f));
        self
    }

    /// Runs after the last field
    pub fn end<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + 'a,
    {
        self.end = Some(Box::new(f));
        self
    }

    /// Registers a handler for a raw varint field
    ///
    /// Registration methods may target the same field number more than
    /// once; the last one wins. Field number 0 is a programmer error
    /// and panics.
    pub fn varint<F>(mut self, num: u32, f: F) -> Self
    where
        F: Fn(u64) -> Result<()> + 'a,
    {
        self.schema.set(num, Field::Varint(Box::new(f)));
        self
    }

    /// `uint64` is the varint value as is
    pub fn uint64<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(u64) -> Result<()> + 'a,
    {
        self.varint(num, f)
    }

    /// `uint32` keeps the low 32 bits of the varint
    pub fn uint32<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(u32) -> Result<()> + 'a,
    {
        self.varint(num, move |v| f(v as u32))
    }

    /// `int64` reinterprets the varint as two's-complement
    pub fn int64<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(i64) -> Result<()> + 'a,
    {
        self.varint(num, move |v| f(v as i64))
    }

    /// `int32` keeps the low 32 bits, two's-complement
    pub fn int32<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(i32) -> Result<()> + 'a,
    {
        self.varint(num, move |v| f(v as u32 as i32))
    }

    /// `sint32` undoes zigzag encoding
    pub fn sint32<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(i32) -> Result<()> + 'a,
    {
        self.varint(num, move |v| {
            let n = v as u32;
            f(((n >> 1) as i32) ^ -((n & 1) as i32))
        })
    }

    /// `sint64` undoes zigzag encoding
    pub fn sint64<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(i64) -> Result<()> + 'a,
    {
        self.varint(num, move |v| f(((v >> 1) as i64) ^ -((v & 1) as i64)))
    }

    /// `bool` is any non-zero varint
    pub fn bool<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(bool) -> Result<()> + 'a,
    {
        self.varint(num, move |v| f(v != 0))
    }

    /// `enum` values travel as `int32`; any type convertible from one fits
    pub fn enumeration<E, F>(self, num: u32, f: F) -> Self
    where
        E: From<i32>,
        F: Fn(E) -> Result<()> + 'a,
    {
        self.int32(num, move |v| f(E::from(v)))
    }

    /// Registers a handler for a fixed 64-bit field
    pub fn fixed64<F>(mut self, num: u32, f: F) -> Self
    where
        F: Fn(u64) -> Result<()> + 'a,
    {
        self.schema.set(num, Field::Fixed64(Box::new(f)));
        self
    }

    /// Registers a handler for a fixed 32-bit field
    pub fn fixed32<F>(mut self, num: u32, f: F) -> Self
    where
        F: Fn(u32) -> Result<()> + 'a,
    {
        self.schema.set(num, Field::Fixed32(Box::new(f)));
        self
    }

    /// `sfixed64` is a little endian i64
    pub fn sfixed64<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(i64) -> Result<()> + 'a,
    {
        self.fixed64(num, move |v| f(v as i64))
    }

    /// `sfixed32` is a little endian i32
    pub fn sfixed32<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(i32) -> Result<()> + 'a,
    {
        self.fixed32(num, move |v| f(v as i32))
    }

    /// `double` is the bit pattern of a fixed 64-bit field
    pub fn double<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(f64) -> Result<()> + 'a,
    {
        self.fixed64(num, move |v| f(f64::from_bits(v)))
    }

    /// `float` is the bit pattern of a fixed 32-bit field
    pub fn float<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(f32) -> Result<()> + 'a,
    {
        self.fixed32(num, move |v| f(f32::from_bits(v)))
    }

    /// Registers a handler for a length-delimited field
    ///
    /// When decoding from a slice the handler sees a sub-slice of the
    /// input; from a stream it sees a buffer owned by the allocator.
    /// Either way the slice is only guaranteed for the duration of the
    /// call: copy it to keep it.
    pub fn bytes<F>(mut self, num: u32, f: F) -> Self
    where
        F: Fn(&[u8]) -> Result<()> + 'a,
    {
        self.schema.set(num, Field::Bytes(Box::new(f)));
        self
    }

    /// `string` is a length-delimited field checked as UTF-8
    pub fn string<F>(self, num: u32, f: F) -> Self
    where
        F: Fn(&str) -> Result<()> + 'a,
    {
        self.bytes(num, move |b| f(std::str::from_utf8(b)?))
    }

    /// Delegates a length-delimited field to a nested parser
    pub fn message(mut self, num: u32, parser: Parser<'a>) -> Self {
        self.schema.set(num, Field::Message(Box::new(parser)));
        self
    }

    /// Fallback for varint fields with no registered handler
    pub fn unknown_varint<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, u64) -> Result<()> + 'a,
    {
        self.schema.unknown.varint = Some(Box::new(f));
        self
    }

    /// Fallback for fixed 64-bit fields with no registered handler
    pub fn unknown_fixed64<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, u64) -> Result<()> + 'a,
    {
        self.schema.unknown.fixed64 = Some(Box::new(f));
        self
    }

    /// Fallback for fixed 32-bit fields with no registered handler
    pub fn unknown_fixed32<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, u32) -> Result<()> + 'a,
    {
        self.schema.unknown.fixed32 = Some(Box::new(f));
        self
    }

    /// Fallback for length-delimited fields with no registered handler
    pub fn unknown_bytes<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, &[u8]) -> Result<()> + 'a,
    {
        self.schema.unknown.bytes = Some(Box::new(f));
        self
    }

    /// Decodes `body`, driving the registered handlers in wire order
    ///
    /// Length-delimited payloads alias `body`: no copies are made.
    pub fn parse(&self, body: &[u8]) -> Result<()> {
        if let Some(f) = &self.begin {
            f()?;
        }
        let mut r = BytesReader::from_bytes(body);
        while !r.is_eof() {
            let tag = r.read_varint()?;
            let num = (tag >> 3) as u32;
            match (tag & 7) as u8 {
                WIRE_TYPE_VARINT => {
                    let v = r.read_varint().map_err(|e| self.wrap(num, e))?;
                    self.schema.varint(num, v).map_err(|e| self.wrap(num, e))?;
                }
                WIRE_TYPE_FIXED64 => {
                    let v = r.read_fixed64().map_err(|e| self.wrap(num, e))?;
                    self.schema.fixed64(num, v).map_err(|e| self.wrap(num, e))?;
                }
                WIRE_TYPE_FIXED32 => {
                    let v = r.read_fixed32().map_err(|e| self.wrap(num, e))?;
                    self.schema.fixed32(num, v).map_err(|e| self.wrap(num, e))?;
                }
                WIRE_TYPE_LENGTH_DELIMITED => {
                    let v = r.read_length_delimited().map_err(|e| self.wrap(num, e))?;
                    self.length_delimited(num, v)
                        .map_err(|e| self.wrap(num, e))?;
                }
                wt => return Err(Error::WrongWireType(wt)),
            }
        }
        if let Some(f) = &self.end {
            f()?;
        }
        Ok(())
    }

    fn length_delimited(&self, num: u32, payload: &[u8]) -> Result<()> {
        match self.schema.get(num) {
            None => self.schema.unknown_bytes(num, payload),
            Some(Field::Bytes(f)) => f(payload),
            Some(Field::Message(p)) => p.parse(payload),
            // a scalar registration makes LEN a packed carrier: raw
            // values of that kind, no inner tags
            Some(Field::Varint(f)) => {
                let mut sub = BytesReader::from_bytes(payload);
                while !sub.is_eof() {
                    f(sub.read_varint()?)?;
                }
                Ok(())
            }
            Some(Field::Fixed64(f)) => {
                let mut sub = BytesReader::from_bytes(payload);
                while !sub.is_eof() {
                    f(sub.read_fixed64()?)?;
                }
                Ok(())
            }
            Some(Field::Fixed32(f)) => {
                let mut sub = BytesReader::from_bytes(payload);
                while !sub.is_eof() {
                    f(sub.read_fixed32()?)?;
                }
                Ok(())
            }
            Some(Field::None) => unreachable!("sentinel never escapes lookup"),
        }
    }

    /// Decodes a byte stream, buffering length-delimited payloads on
    /// the heap
    pub fn read<S: Source>(&self, source: &mut S) -> Result<()> {
        let mut mem = HeapAllocator::new();
        self.read_with(source, &mut mem)
    }

    /// Decodes a byte stream, filling length-delimited payloads through
    /// `mem`
    ///
    /// A shared [`crate::LinearAllocator`] serves one parse at a time;
    /// handlers that keep payload bytes must copy them out either way.
    pub fn read_with<S: Source, A: Allocator>(&self, source: &mut S, mem: &mut A) -> Result<()> {
        let mut r = StreamReader::new(source, mem, u64::MAX);
        self.read_loop(&mut r)
    }

    fn read_loop<S: Source, A: Allocator>(&self, r: &mut StreamReader<'_, S, A>) -> Result<()> {
        if let Some(f) = &self.begin {
            f()?;
        }
        loop {
            let tag = match r.read_varint_or_break()? {
                Some(tag) => tag,
                None => break,
            };
            let num = (tag >> 3) as u32;
            match (tag & 7) as u8 {
                WIRE_TYPE_VARINT => {
                    let v = r.read_varint().map_err(|e| self.wrap(num, e))?;
                    self.schema.varint(num, v).map_err(|e| self.wrap(num, e))?;
                }
                WIRE_TYPE_FIXED64 => {
                    let v = r.read_fixed64().map_err(|e| self.wrap(num, e))?;
                    self.schema.fixed64(num, v).map_err(|e| self.wrap(num, e))?;
                }
                WIRE_TYPE_FIXED32 => {
                    let v = r.read_fixed32().map_err(|e| self.wrap(num, e))?;
                    self.schema.fixed32(num, v).map_err(|e| self.wrap(num, e))?;
                }
                WIRE_TYPE_LENGTH_DELIMITED => {
                    let len = r.read_varint().map_err(|e| self.wrap(num, e))?;
                    self.length_delimited_stream(num, len, r)
                        .map_err(|e| self.wrap(num, e))?;
                }
                wt => return Err(Error::WrongWireType(wt)),
            }
        }
        if let Some(f) = &self.end {
            f()?;
        }
        Ok(())
    }

    fn length_delimited_stream<S: Source, A: Allocator>(
        &self,
        num: u32,
        len: u64,
        r: &mut StreamReader<'_, S, A>,
    ) -> Result<()> {
        match self.schema.get(num) {
            None => {
                if self.schema.unknown.bytes.is_some() {
                    let v = r.read_bytes(len)?;
                    self.schema.unknown_bytes(num, v)
                } else {
                    r.skip(len)
                }
            }
            Some(Field::Bytes(f)) => {
                let v = r.read_bytes(len)?;
                f(v)
            }
            Some(Field::Message(p)) => {
                let parent = r.limit();
                if parent < len {
                    return Err(Error::Truncated);
                }
                r.set_limit(len);
                p.read_loop(r)?;
                r.set_limit(parent - len);
                Ok(())
            }
            Some(Field::Varint(f)) => {
                let parent = r.limit();
                if parent < len {
                    return Err(Error::Truncated);
                }
                r.set_limit(len);
                while let Some(v) = r.read_varint_or_break()? {
                    f(v)?;
                }
                r.set_limit(parent - len);
                Ok(())
            }
            Some(Field::Fixed64(f)) => {
                let parent = r.limit();
                if parent < len {
                    return Err(Error::Truncated);
                }
                r.set_limit(len);
                while r.has_more() {
                    f(r.read_fixed64()?)?;
                }
                r.set_limit(parent - len);
                Ok(())
            }
            Some(Field::Fixed32(f)) => {
                let parent = r.limit();
                if parent < len {
                    return Err(Error::Truncated);
                }
                r.set_limit(len);
                while r.has_more() {
                    f(r.read_fixed32()?)?;
                }
                r.set_limit(parent - len);
                Ok(())
            }
            Some(Field::None) => unreachable!("sentinel never escapes lookup"),
        }
    }

    fn wrap(&self, num: u32, err: Error) -> Error {
        let name = self.name.as_deref().unwrap_or("<unnamed>");
        Error::Field {
            context: format!("{}[{}]", name, num),
            source: Box::new(err),
        }
    }
}
