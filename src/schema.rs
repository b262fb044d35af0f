//! The dispatch table mapping field numbers to handler descriptors

use std::collections::HashMap;

use crate::errors::{Error, Result};
use crate::parser::Parser;

/// Field numbers up to this value live in a dense array; anything
/// bigger spills into a hash map. Real schemas keep their hot fields
/// small, so the dense half carries almost all lookups.
const DENSE_FIELD_LIMIT: u32 = 128;

pub(crate) type VarintFn<'a> = Box<dyn Fn(u64) -> Result<()> + 'a>;
pub(crate) type Fixed64Fn<'a> = Box<dyn Fn(u64) -> Result<()> + 'a>;
pub(crate) type Fixed32Fn<'a> = Box<dyn Fn(u32) -> Result<()> + 'a>;
pub(crate) type BytesFn<'a> = Box<dyn Fn(&[u8]) -> Result<()> + 'a>;

/// Handler descriptor for one field number: the wire kind it expects
/// and the closure (or child parser) that consumes it
pub(crate) enum Field<'a> {
    None,
    Varint(VarintFn<'a>),
    Fixed64(Fixed64Fn<'a>),
    Fixed32(Fixed32Fn<'a>),
    Bytes(BytesFn<'a>),
    Message(Box<Parser<'a>>),
}

impl<'a> Field<'a> {
    pub(crate) fn expected(&self) -> &'static str {
        match self {
            Field::None => "none",
            Field::Varint(_) => "varint",
            Field::Fixed64(_) => "fixed64",
            Field::Fixed32(_) => "fixed32",
            Field::Bytes(_) | Field::Message(_) => "length-delimited",
        }
    }
}

/// Fallbacks for fields no handler was registered for, one per wire kind
#[derive(Default)]
pub(crate) struct Unknown<'a> {
    pub(crate) varint: Option<Box<dyn Fn(u32, u64) -> Result<()> + 'a>>,
    pub(crate) fixed64: Option<Box<dyn Fn(u32, u64) -> Result<()> + 'a>>,
    pub(crate) fixed32: Option<Box<dyn Fn(u32, u32) -> Result<()> + 'a>>,
    pub(crate) bytes: Option<Box<dyn Fn(u32, &[u8]) -> Result<()> + 'a>>,
}

#[derive(Default)]
pub(crate) struct Schema<'a> {
    dense: Vec<Field<'a>>,
    sparse: HashMap<u32, Field<'a>>,
    pub(crate) unknown: Unknown<'a>,
}

impl<'a> Schema<'a> {
    /// Registers `field` under `num`; the last registration wins
    pub(crate) fn set(&mut self, num: u32, field: Field<'a>) {
        if num < 1 {
            panic!(
                "field number should be a natural number, invalid value: {}",
                num
            );
        }
        if num > DENSE_FIELD_LIMIT {
            self.sparse.insert(num, field);
            return;
        }
        let idx = (num - 1) as usize;
        if self.dense.len() <= idx {
            self.dense.resize_with(idx + 1, || Field::None);
        }
        self.dense[idx] = field;
    }

    /// Looks up `num`; anything never registered comes back as `None`
    pub(crate) fn get(&self, num: u32) -> Option<&Field<'a>> {
        let field = if (1..=DENSE_FIELD_LIMIT).contains(&num) {
            self.dense.get((num - 1) as usize)
        } else {
            self.sparse.get(&num)
        };
        match field {
            Some(Field::None) | None => None,
            Some(f) => Some(f),
        }
    }

    pub(crate) fn varint(&self, num: u32, v: u64) -> Result<()> {
        match self.get(num) {
            Some(Field::Varint(f)) => f(v),
            Some(f) => Err(Error::Mismatch {
                num,
                received: "varint",
                expected: f.expected(),
            }),
            None => match &self.unknown.varint {
                Some(f) => f(num, v),
                None => Ok(()),
            },
        }
    }

    pub(crate) fn fixed64(&self, num: u32, v: u64) -> Result<()> {
        match self.get(num) {
            Some(Field::Fixed64(f)) => f(v),
            Some(f) => Err(Error::Mismatch {
                num,
                received: "fixed64",
                expected: f.expected(),
            }),
            None => match &self.unknown.fixed64 {
                Some(f) => f(num, v),
                None => Ok(()),
            },
        }
    }

    pub(crate) fn fixed32(&self, num: u32, v: u32) -> Result<()> {
        match self.get(num) {
            Some(Field::Fixed32(f)) => f(v),
            Some(f) => Err(Error::Mismatch {
                num,
                received: "fixed32",
                expected: f.expected(),
            }),
            None => match &self.unknown.fixed32 {
                Some(f) => f(num, v),
                None => Ok(()),
            },
        }
    }

    /// Fallback for a length-delimited field with no registration
    pub(crate) fn unknown_bytes(&self, num: u32, v: &[u8]) -> Result<()> {
        match &self.unknown.bytes {
            Some(f) => f(num, v),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint_field<'a>() -> Field<'a> {
        Field::Varint(Box::new(|_| Ok(())))
    }

    #[test]
    fn dense_and_sparse_sides_of_the_split() {
        let mut schema = Schema::default();
        schema.set(DENSE_FIELD_LIMIT, varint_field());
        schema.set(DENSE_FIELD_LIMIT + 1, varint_field());

        assert!(matches!(
            schema.get(DENSE_FIELD_LIMIT),
            Some(Field::Varint(_))
        ));
        assert!(matches!(
            schema.get(DENSE_FIELD_LIMIT + 1),
            Some(Field::Varint(_))
        ));
        assert!(schema.get(DENSE_FIELD_LIMIT - 1).is_none());
        assert!(schema.get(DENSE_FIELD_LIMIT + 2).is_none());
        assert!(schema.get(0).is_none());
    }

    #[test]
    fn last_registration_wins() {
        let mut schema = Schema::default();
        schema.set(3, varint_field());
        schema.set(3, Field::Fixed64(Box::new(|_| Ok(()))));
        assert!(matches!(schema.get(3), Some(Field::Fixed64(_))));
    }

    #[test]
    fn mismatch_names_both_kinds() {
        let mut schema = Schema::default();
        schema.set(1, Field::Fixed64(Box::new(|_| Ok(()))));
        let err = schema.varint(1, 7).unwrap_err();
        assert_eq!(
            err.to_string(),
            "field 1: varint received, but fixed64 expected"
        );
    }

    #[test]
    fn unregistered_scalar_without_fallback_is_skipped() {
        let schema = Schema::default();
        assert!(schema.varint(9, 1).is_ok());
        assert!(schema.fixed32(9, 1).is_ok());
        assert!(schema.fixed64(9, 1).is_ok());
        assert!(schema.unknown_bytes(9, b"x").is_ok());
    }

    #[test]
    #[should_panic(expected = "field number")]
    fn zero_field_number_panics() {
        let mut schema = Schema::default();
        schema.set(0, varint_field());
    }
}
