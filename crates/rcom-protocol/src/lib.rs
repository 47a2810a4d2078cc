//! Wire types for rcom remote command execution.
//!
//! A caller sends one [`Command`] and receives one [`CallResult`]:
//!
//! ```text
//! Client --[POST /, encoded Command]--> Endpoint --> workspace + process
//!        <--[200, encoded CallResult]--
//!        <--[4xx/5xx, plain-text diagnostic]--
//! ```
//!
//! The encoding is JSON with raw byte payloads (stdin, input files, result
//! files) carried as base64 strings, so the format is self-describing and
//! byte-exact without any schema negotiation.

pub mod call_id;
pub mod codec;
pub mod command;
pub mod error;
pub mod result;

pub use call_id::CallId;
pub use codec::{decode_command, decode_result, encode_command, encode_result};
pub use command::Command;
pub use error::{CodecError, ResultFileError, ValidationError};
pub use result::CallResult;

/// Default TCP port of an rcom endpoint.
pub const DEFAULT_PORT: u16 = 3666;

/// Route that accepts encoded commands.
pub const EXECUTE_PATH: &str = "/";

/// Liveness route.
pub const HEALTH_PATH: &str = "/health";
