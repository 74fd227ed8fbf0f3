//! Classified pipeline errors.

use std::{error, fmt};

use crate::common::*;

/// An error raised by one of the pipeline stages.
///
/// Each variant wraps an `anyhow::Error` carrying the details. We convert
/// these into plain `Error` values as they propagate, so callers who care
/// which stage failed should use `err.downcast_ref::<IngestError>()`.
#[derive(Debug)]
#[non_exhaustive]
pub(crate) enum IngestError {
    /// The remote resource could not be downloaded.
    Transfer(Error),
    /// The downloaded file could not be decompressed.
    Decode(Error),
    /// The destination table could not be derived from the first chunk, or
    /// could not be created.
    Schema(Error),
    /// A chunk contained a value that we could not normalize, or could not be
    /// read at all.
    Normalization(Error),
    /// The database rejected a chunk, or the connection failed mid-load.
    Append(Error),
}

impl IngestError {
    /// The underlying error.
    fn inner(&self) -> &Error {
        match self {
            Self::Transfer(e)
            | Self::Decode(e)
            | Self::Schema(e)
            | Self::Normalization(e)
            | Self::Append(e) => e,
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer(_) => write!(f, "download failed"),
            Self::Decode(_) => write!(f, "decompression failed"),
            Self::Schema(_) => write!(f, "could not initialize destination table"),
            Self::Normalization(_) => write!(f, "could not normalize chunk"),
            Self::Append(_) => write!(f, "could not append chunk"),
        }
    }
}

impl error::Error for IngestError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&**self.inner())
    }
}

#[test]
fn ingest_error_survives_conversion_to_anyhow() {
    let err: Error =
        IngestError::Decode(format_err!("invalid gzip header")).into();
    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::Decode(_))
    ));
    assert_eq!(
        format!("{:#}", err),
        "decompression failed: invalid gzip header"
    );
}
