//! A crate to read and write binary protobuf without code generation
//!
//! Instead of unmarshalling into generated structs, a [`Parser`] is
//! built once per message shape from per-field callbacks; decoding then
//! drives those callbacks as the bytes stream by, which keeps
//! arbitrarily large payloads out of memory. Input comes either from a
//! byte slice (zero-copy payloads) or from a byte stream with a
//! pluggable [`Allocator`]. The [`Writer`] goes the other way, with a
//! reusable scratch buffer paying for nested length prefixes.

pub mod alloc;
pub mod errors;
pub mod parser;
pub mod reader;
pub mod writer;

mod schema;

pub use crate::{
    alloc::{Allocator, HeapAllocator, LinearAllocator},
    errors::{Error, Result},
    parser::Parser,
    reader::{BytesReader, ReadSource, Source, StreamReader},
    writer::{write, BytesWriter, Writer, WriterBackend},
};
