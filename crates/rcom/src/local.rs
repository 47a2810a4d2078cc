//! Local call orchestration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use glob::Pattern;
use rcom_protocol::{CallId, CallResult, Command};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use crate::error::{CallError, RcomError, Result};
use crate::exec::{ProcessRunResult, ProcessRunner};
use crate::executor::Executor;
use crate::workspace::Workspace;

/// Runs commands on this host, one fresh workspace per call.
#[derive(Debug, Clone)]
pub struct CallOrchestrator {
    scratch_root: PathBuf,
}

impl Default for CallOrchestrator {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl CallOrchestrator {
    /// Workspaces are created as direct children of `scratch_root`.
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Execute `command` and return its result.
    ///
    /// The workspace is gone by the time this returns, whatever the outcome.
    /// Failures still carry the call id so they can be matched with logs.
    pub async fn execute_locally(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> std::result::Result<CallResult, CallError> {
        let call_id = CallId::new();
        let span = info_span!("call", %call_id, command = %command.name);
        self.run_call(call_id, command, cancel)
            .instrument(span)
            .await
            .map_err(|source| CallError { call_id, source })
    }

    async fn run_call(
        &self,
        call_id: CallId,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<CallResult> {
        command.validate()?;
        let patterns = command.result_patterns()?;
        let started = Instant::now();

        let workspace = Workspace::create(&self.scratch_root, call_id).await?;
        let outcome = run_in_workspace(&workspace, command, &patterns, cancel).await;
        workspace.remove().await;
        let (run, files) = outcome?;

        info!(
            exit_code = run.exit_code,
            files = files.len(),
            elapsed = ?started.elapsed(),
            "call completed"
        );

        Ok(CallResult {
            call_id,
            exit_code: run.exit_code,
            output: run.output,
            stdout: run.stdout,
            stderr: run.stderr,
            files,
        })
    }
}

/// Stage, run and collect inside `workspace`.
async fn run_in_workspace(
    workspace: &Workspace,
    command: &Command,
    patterns: &[Pattern],
    cancel: &CancellationToken,
) -> Result<(ProcessRunResult, BTreeMap<String, Vec<u8>>)> {
    if !command.files.is_empty() {
        workspace.stage(&command.files, cancel).await?;
    }

    let mut runner = ProcessRunner::new(&command.name)
        .args(&command.args)
        .current_dir(workspace.path())
        .kill_process_group(true);
    if let Some(stdin) = &command.stdin {
        runner = runner.stdin(stdin.clone());
    }
    let run = runner.run(cancel).await?;

    if !run.accepts_exit_code(&command.non_error_exit_codes) {
        warn!(exit_code = run.exit_code, "command failed");
        return Err(RcomError::ExecutionFailure {
            exit_code: run.exit_code,
            exit_state: run.exit_state,
            output: run.output,
        });
    }

    let files = workspace.collect(patterns, cancel).await?;
    Ok((run, files))
}

#[async_trait]
impl Executor for CallOrchestrator {
    async fn execute(&self, command: &Command, cancel: &CancellationToken) -> Result<CallResult> {
        Ok(self.execute_locally(command, cancel).await?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch_is_empty(root: &TempDir) -> bool {
        std::fs::read_dir(root.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_copy_round_trip() {
        let root = TempDir::new().unwrap();
        let orchestrator = CallOrchestrator::new(root.path());
        let command = Command::new("cp")
            .args(["input.txt", "output.txt"])
            .file("input.txt", "rcom test file")
            .result_pattern("output.*");

        let result = orchestrator
            .execute_locally(&command, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.file("output.txt"), Some(&b"rcom test file"[..]));
        assert!(scratch_is_empty(&root));
    }

    #[tokio::test]
    async fn test_validation_failure_creates_no_workspace() {
        let root = TempDir::new().unwrap();
        let orchestrator = CallOrchestrator::new(root.path());
        let command = Command::new("cp").file("../escape.txt", "x");

        let err = orchestrator
            .execute_locally(&command, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err.source, RcomError::Validation(_)));
        assert!(scratch_is_empty(&root));
    }

    #[tokio::test]
    async fn test_failure_reports_call_id_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let orchestrator = CallOrchestrator::new(root.path());
        let command = Command::new("sh").args(["-c", "echo broken; exit 4"]);

        let err = orchestrator
            .execute_locally(&command, &CancellationToken::new())
            .await
            .unwrap_err();

        match &err.source {
            RcomError::ExecutionFailure {
                exit_code, output, ..
            } => {
                assert_eq!(*exit_code, 4);
                assert_eq!(output, "broken\n");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!root.path().join(err.call_id.to_string()).exists());
        assert!(scratch_is_empty(&root));
    }

    #[tokio::test]
    async fn test_cancelled_call_removes_workspace() {
        let root = TempDir::new().unwrap();
        let orchestrator = CallOrchestrator::new(root.path());
        let command = Command::new("sh").args(["-c", "touch partial.txt; sleep 30"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let err = orchestrator.execute_locally(&command, &cancel).await.unwrap_err();

        assert!(err.source.is_cancelled(), "unexpected error: {}", err.source);
        assert!(scratch_is_empty(&root));
    }

    #[tokio::test]
    async fn test_program_sees_workspace_as_working_directory() {
        let root = TempDir::new().unwrap();
        let orchestrator = CallOrchestrator::new(root.path());
        let command = Command::new("sh").args(["-c", "basename \"$PWD\""]);

        let result = orchestrator
            .execute_locally(&command, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.stdout.trim(), result.call_id.to_string());
    }
}
