use std::path::PathBuf;

use thiserror::Error;

use crate::CallId;

/// Reasons a [`Command`](crate::Command) is refused before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no command name provided")]
    EmptyName,

    #[error("empty filename")]
    EmptyFileName,

    #[error("filename {0:?} must not contain path separators")]
    PathSeparator(String),

    #[error("filename {0:?} is reserved")]
    ReservedFileName(String),

    #[error("empty result file pattern")]
    EmptyPattern,

    #[error("duplicate result file pattern {0:?}")]
    DuplicatePattern(String),

    #[error("invalid result file pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Encoding or decoding failure of a wire value.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("can't encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("can't decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure to write a collected result file to a local path.
#[derive(Debug, Error)]
pub enum ResultFileError {
    #[error("no result file: {name}, callID={call_id}")]
    Missing { name: String, call_id: CallId },

    #[error("empty result file: {name}, callID={call_id}")]
    Empty { name: String, call_id: CallId },

    #[error("can't write result file to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
