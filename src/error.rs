//! Crate-level error types.

use std::fmt;

/// Errors produced by the tomopick crate.
#[derive(Debug)]
pub enum TomopickError {
    /// Misconfiguration caught at the point it is introduced: pixel size
    /// out of range, or a format schema missing a canonical field.
    InvalidConfig(String),
    /// Access to a particle field name that does not exist in the schema.
    UnknownAttribute(String),
    /// Access to a particle/instance id that is not present.
    UnknownKey(u64),
    /// Insertion of an instance id that is already present.
    DuplicateKey(u64),
    /// A mask or color array whose length does not match the instance count.
    ShapeMismatch {
        /// Length required by the current instance count.
        expected: usize,
        /// Length actually supplied.
        got: usize,
    },
    /// Generic I/O failure while reading or writing a particle file.
    Io(std::io::Error),
    /// Malformed content in a particle file.
    Parse(String),
}

impl fmt::Display for TomopickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::UnknownAttribute(name) => {
                write!(f, "unknown particle attribute: {name}")
            }
            Self::UnknownKey(id) => write!(f, "unknown id: {id}"),
            Self::DuplicateKey(id) => write!(f, "duplicate id: {id}"),
            Self::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected length {expected}, got {got}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for TomopickError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TomopickError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
