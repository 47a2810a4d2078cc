//! Common interface over local and remote execution.
//!
//! Code that only needs "run this command somewhere" takes an
//! `Arc<dyn Executor>` and works the same against a [`CallOrchestrator`]
//! on this host or a [`Client`] talking to an `rcom-server`.
//!
//! [`CallOrchestrator`]: crate::local::CallOrchestrator
//! [`Client`]: crate::client::Client

use async_trait::async_trait;
use rcom_protocol::{CallResult, Command};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `command` to completion or until `cancel` fires.
    ///
    /// A non-zero exit code that is not listed in the command's non-error
    /// codes is an error. The result files are those matching the command's
    /// result patterns.
    async fn execute(&self, command: &Command, cancel: &CancellationToken) -> Result<CallResult>;
}
