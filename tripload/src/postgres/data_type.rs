//! PostgreSQL data types.

use std::fmt;

/// The PostgreSQL column types we create.
///
/// This is a deliberately small set. Anything we can't recognize from the
/// first chunk of data is stored as `text`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PgScalarDataType {
    /// A 64-bit integer.
    Bigint,
    /// A 64-bit float.
    DoublePrecision,
    /// Arbitrary text.
    Text,
    /// A timestamp with no time zone.
    Timestamp,
}

impl fmt::Display for PgScalarDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgScalarDataType::Bigint => write!(f, "bigint"),
            PgScalarDataType::DoublePrecision => write!(f, "double precision"),
            PgScalarDataType::Text => write!(f, "text"),
            PgScalarDataType::Timestamp => write!(f, "timestamp"),
        }
    }
}
