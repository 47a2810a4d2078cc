//! Error taxonomy shared by local and remote calls.

use std::time::Duration;

use rcom_protocol::{CallId, CodecError, ValidationError};
use thiserror::Error;

use crate::exec::ProcessError;

/// Error type for rcom operations.
#[derive(Debug, Error)]
pub enum RcomError {
    /// Malformed command; nothing was touched.
    #[error("invalid command: {0}")]
    Validation(#[from] ValidationError),

    /// Command name missing from the relevant allow-list.
    #[error("command {0:?} not allowed")]
    NotAllowed(String),

    /// Creating, writing or reading the call's workspace failed.
    #[error("workspace error while {context}: {source}")]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The program exited with a code outside the command's non-error set.
    #[error("command failed with {exit_state}\nCommand output: {output}")]
    ExecutionFailure {
        exit_code: i32,
        exit_state: String,
        output: String,
    },

    #[error("call cancelled")]
    Cancelled,

    #[error("call exceeded its timeout of {0:?}")]
    DeadlineExceeded(Duration),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The HTTP exchange itself failed.
    #[error("request to {addr} for command {command:?} failed: {source}")]
    Transport {
        addr: String,
        command: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status.
    #[error("rcom endpoint {addr} responded to command {command:?} with status {status}: {message}")]
    Remote {
        addr: String,
        command: String,
        status: u16,
        message: String,
    },

    /// The endpoint answered with a success status but an undecodable body.
    #[error("rcom endpoint {addr} sent a bad response to command {command:?}: {source}")]
    BadResponse {
        addr: String,
        command: String,
        #[source]
        source: CodecError,
    },

    #[error("can't read input file {path:?}: {source}")]
    Input {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    /// A local call failed; carries the id of the call for log correlation.
    #[error("call {call_id}: {source}")]
    Call {
        call_id: CallId,
        #[source]
        source: Box<RcomError>,
    },
}

impl RcomError {
    pub fn workspace(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Workspace {
            context: context.into(),
            source,
        }
    }

    /// Whether the call ended because it was cancelled or timed out.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled | Self::DeadlineExceeded(_) => true,
            Self::Process(err) => err.is_cancelled(),
            Self::Call { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The call id, when the error came out of an orchestrated call.
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::Call { call_id, .. } => Some(*call_id),
            _ => None,
        }
    }
}

/// Result type alias for rcom operations.
pub type Result<T> = std::result::Result<T, RcomError>;

/// Failure of one orchestrated call, still identified by its [`CallId`].
#[derive(Debug, Error)]
#[error("{source}")]
pub struct CallError {
    pub call_id: CallId,
    #[source]
    pub source: RcomError,
}

impl From<CallError> for RcomError {
    fn from(err: CallError) -> Self {
        Self::Call {
            call_id: err.call_id,
            source: Box::new(err.source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_detected_through_call_wrapper() {
        let err = RcomError::from(CallError {
            call_id: CallId::new(),
            source: RcomError::Process(ProcessError::Killed),
        });
        assert!(err.is_cancelled());
        assert!(err.call_id().is_some());
    }

    #[test]
    fn test_execution_failure_is_not_cancellation() {
        let err = RcomError::ExecutionFailure {
            exit_code: 2,
            exit_state: "exit status: 2".to_string(),
            output: "boom".to_string(),
        };
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("Command output: boom"));
    }

    #[test]
    fn test_remote_message_names_endpoint_and_command() {
        let err = RcomError::Remote {
            addr: "http://10.0.0.1:3666".to_string(),
            command: "cp".to_string(),
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "rcom endpoint http://10.0.0.1:3666 responded to command \"cp\" with status 500: boom"
        );
    }

    #[test]
    fn test_not_allowed_message() {
        let err = RcomError::NotAllowed("rm".to_string());
        assert_eq!(err.to_string(), "command \"rm\" not allowed");
    }
}
