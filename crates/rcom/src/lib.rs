//! Run allow-listed external programs locally or on a remote host.
//!
//! Every call gets a fresh workspace directory named after its [`CallId`].
//! Input files are staged into it, the program runs with it as working
//! directory, matching output files are collected, and the directory is
//! removed again whatever the outcome.
//!
//! - [`exec`] starts one process, captures its output and kills it (or its
//!   whole process group) on cancellation.
//! - [`local`] orchestrates one call around a workspace.
//! - [`server`] exposes the orchestrator over HTTP behind an allow-list.
//! - [`client`] sends commands to such an endpoint, behind its own allow-list.

pub mod client;
pub mod config;
pub mod error;
pub mod exec;
pub mod executor;
pub mod local;
pub mod logging;
pub mod server;
pub mod workspace;

pub use client::{Client, InputFile, execute_remotely};
pub use config::{ClientConfig, ServerConfig};
pub use error::{CallError, RcomError, Result};
pub use exec::{ProcessError, ProcessRunResult, ProcessRunner};
pub use executor::Executor;
pub use local::CallOrchestrator;
pub use server::Endpoint;

pub use rcom_protocol::{CallId, CallResult, Command, ValidationError};
pub use tokio_util::sync::CancellationToken;
