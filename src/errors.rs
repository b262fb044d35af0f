//! A module to handle decoding and encoding errors

use std::fmt;

/// An error enum with all the failure modes of reading and writing
#[derive(Debug)]
pub enum Error {
    /// Io error
    Io(std::io::Error),
    /// Utf8 error when decoding a `string` field
    Utf8(std::str::Utf8Error),
    /// Input ended in the middle of a token, or a declared length
    /// exceeded the bytes actually available
    Truncated,
    /// Reserved for message-level validation
    InvalidMessage,
    /// Wire types 3 and 4 (deprecated groups) and the unassigned 6 and 7
    WrongWireType(u8),
    /// A field arrived with a wire type other than the one its
    /// registered handler expects
    Mismatch {
        /// Field number the mismatched value arrived under
        num: u32,
        /// Wire kind found on the wire
        received: &'static str,
        /// Wire kind the registration expects
        expected: &'static str,
    },
    /// An error from a handler or a nested parse, prefixed with the
    /// parser name and field number. The original error stays reachable
    /// through `std::error::Error::source`
    Field {
        /// `"<parser name>[<field number>]"`
        context: String,
        /// The wrapped error
        source: Box<Error>,
    },
    /// Output buffer is not big enough
    UnexpectedEndOfBuffer,
    /// Arbitrary error raised by a caller-supplied handler
    Custom(String),
}

/// A crate-wide `Result` alias
pub type Result<T> = ::core::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Error {
        Error::Utf8(e)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Error {
        Error::Custom(s.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "{}", e),
            Error::Utf8(e) => write!(f, "{}", e),
            Error::Truncated => write!(f, "message truncated"),
            Error::InvalidMessage => write!(f, "invalid message"),
            Error::WrongWireType(wt) => write!(f, "wrong wire type {}", wt),
            Error::Mismatch {
                num,
                received,
                expected,
            } => write!(
                f,
                "field {}: {} received, but {} expected",
                num, received, expected
            ),
            Error::Field { context, source } => write!(f, "{}: {}", context, source),
            Error::UnexpectedEndOfBuffer => write!(f, "unexpected end of output buffer"),
            Error::Custom(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Utf8(e) => Some(e),
            Error::Field { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
