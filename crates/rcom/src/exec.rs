//! Process runner.
//!
//! Starts one external program, captures its standard streams and waits for
//! it to exit or for the caller's [`CancellationToken`] to fire, whichever
//! comes first. A non-zero exit status is reported, not treated as an error.
//!
//! When process-group termination is requested the child becomes the leader
//! of a new process group and cancellation kills the whole group, so
//! subprocesses spawned by the program die with it. A run is not over until
//! its output streams close, so cancellation still kills the group when the
//! leader has exited but a subprocess holds stdout or stderr open.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long to wait for a killed process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8 * 1024;

/// Errors from running a process. A non-zero exit is not one of them.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("can't start {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while running {program:?}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("call cancelled before the process was started")]
    CancelledBeforeStart,

    #[error("killed process because the call was cancelled")]
    Killed,

    #[error("{source} error killing process because the call was cancelled")]
    KillFailed {
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::CancelledBeforeStart | Self::Killed | Self::KillFailed { .. }
        )
    }
}

/// What a finished process left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRunResult {
    /// Exit code, or -1 when the process was ended by a signal.
    pub exit_code: i32,
    /// Human-readable exit state, e.g. `exit status: 1`.
    pub exit_state: String,
    /// Stdout and stderr interleaved in the order chunks arrived.
    pub output: String,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessRunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Exit code 0 is always accepted; any other code only when listed.
    pub fn accepts_exit_code(&self, non_error_exit_codes: &BTreeSet<i32>) -> bool {
        self.success() || non_error_exit_codes.contains(&self.exit_code)
    }
}

/// Configuration for one process run.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    env: Option<Vec<(String, String)>>,
    kill_process_group: bool,
}

impl ProcessRunner {
    /// Run `program`, resolved through `PATH` unless it contains a separator.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            stdin: None,
            env: None,
            kill_process_group: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory of the process. Defaults to the caller's.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Bytes written to the process's stdin. Without this stdin is null.
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Replace the inherited environment entirely.
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Add one variable on top of the inherited environment.
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(|| std::env::vars().collect())
            .push((key.into(), value.into()));
        self
    }

    /// Start the process in its own group and kill the whole group on
    /// cancellation.
    pub fn kill_process_group(mut self, enabled: bool) -> Self {
        self.kill_process_group = enabled;
        self
    }

    /// Run to completion or until `cancel` fires.
    pub async fn run(self, cancel: &CancellationToken) -> Result<ProcessRunResult, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::CancelledBeforeStart);
        }

        let description = self.to_string();
        let Self {
            program,
            args,
            dir,
            stdin,
            env,
            kill_process_group,
        } = self;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &dir {
            cmd.current_dir(dir);
        }
        if let Some(env) = &env {
            cmd.env_clear().envs(env.iter().map(|(key, value)| (key, value)));
        }
        if kill_process_group {
            set_own_process_group(&mut cmd);
        }

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let mut process = RunningProcess {
            group: own_group_id(&child, kill_process_group),
            child,
            reaped: false,
            finished: false,
        };
        debug!(command = %description, pid = process.child.id(), "process started");

        let combined = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = tokio::spawn(capture(process.child.stdout.take(), Arc::clone(&combined)));
        let stderr_task = tokio::spawn(capture(process.child.stderr.take(), Arc::clone(&combined)));
        let stdin_task = match (process.child.stdin.take(), stdin) {
            (Some(pipe), Some(data)) => Some(tokio::spawn(feed_stdin(pipe, data))),
            _ => None,
        };
        let mut streams = vec![stdout_task.abort_handle(), stderr_task.abort_handle()];
        streams.extend(stdin_task.as_ref().map(JoinHandle::abort_handle));

        let io_error = |source: io::Error| ProcessError::Io {
            program: program.clone(),
            source,
        };

        // The child is only reaped in the wait branch; until then its pid
        // can't be reused, so killing the child never signals a stranger.
        let status = tokio::select! {
            biased;
            status = process.child.wait() => status,
            () = cancel.cancelled() => {
                return Err(process.kill_on_cancel(&description, &streams).await);
            }
        };
        process.reaped = true;
        let status = status.map_err(io_error)?;

        // Subprocesses may still hold the output pipes after the leader
        // exited. Cancellation stays armed until the streams are drained.
        let captured = async {
            let stdout = join_capture(stdout_task).await?;
            let stderr = join_capture(stderr_task).await?;
            if let Some(task) = stdin_task {
                join_io(task).await?;
            }
            Ok::<_, io::Error>((stdout, stderr))
        };
        let (stdout, stderr) = tokio::select! {
            biased;
            captured = captured => captured.map_err(io_error)?,
            () = cancel.cancelled() => {
                return Err(process.kill_on_cancel(&description, &streams).await);
            }
        };
        process.finished = true;
        let output = std::mem::take(&mut *combined.lock().unwrap_or_else(PoisonError::into_inner));

        debug!(command = %description, status = %status, "process exited");

        Ok(ProcessRunResult {
            exit_code: status.code().unwrap_or(-1),
            exit_state: status.to_string(),
            output: String::from_utf8_lossy(&output).into_owned(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

impl fmt::Display for ProcessRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A spawned child that is terminated if dropped before its run finished.
struct RunningProcess {
    child: Child,
    /// Process group led by the child, when it got its own.
    group: Option<u32>,
    reaped: bool,
    finished: bool,
}

impl RunningProcess {
    /// Send SIGKILL to the whole group, or to the child while it is unreaped.
    ///
    /// The group outlives its leader as long as any member is alive, so it
    /// is signalled even after the child itself has been reaped.
    fn terminate(&mut self) -> io::Result<()> {
        match self.group {
            Some(pgid) => kill_group(pgid),
            None if self.reaped => Ok(()),
            None => self.child.start_kill(),
        }
    }

    async fn kill_on_cancel(&mut self, command: &str, streams: &[AbortHandle]) -> ProcessError {
        let killed = self.terminate();
        if !self.reaped {
            match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(command, error = %err, "error waiting for killed process"),
                Err(_) => warn!(command, "timeout waiting for killed process to exit"),
            }
            self.reaped = true;
        }
        self.finished = true;
        for stream in streams {
            stream.abort();
        }
        match killed {
            Ok(()) => ProcessError::Killed,
            Err(source) => ProcessError::KillFailed { source },
        }
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.terminate() {
            warn!(pid = self.child.id(), error = %err, "can't kill abandoned process");
        }
    }
}

#[cfg(unix)]
fn set_own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn set_own_process_group(_cmd: &mut Command) {}

/// The group id of a child started with [`set_own_process_group`]: its pid.
#[cfg(unix)]
fn own_group_id(child: &Child, own_group: bool) -> Option<u32> {
    if own_group { child.id() } else { None }
}

#[cfg(not(unix))]
fn own_group_id(_child: &Child, _own_group: bool) -> Option<u32> {
    None
}

#[cfg(unix)]
fn kill_group(pgid: u32) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "process group id out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions. The negative id
    // addresses the group created for this run.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) -> io::Result<()> {
    Ok(())
}

/// Copy a stream into its own buffer and the shared combined buffer.
async fn capture<R>(stream: Option<R>, combined: Arc<Mutex<Vec<u8>>>) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(Vec::new());
    };
    let mut own = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(own);
        }
        own.extend_from_slice(&chunk[..n]);
        combined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&chunk[..n]);
    }
}

async fn feed_stdin(mut pipe: tokio::process::ChildStdin, data: Vec<u8>) -> io::Result<()> {
    let written = pipe.write_all(&data).await;
    drop(pipe);
    match written {
        // The program is free to exit without reading its input.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

async fn join_capture(task: JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    task.await.map_err(io::Error::other)?
}

async fn join_io(task: JoinHandle<io::Result<()>>) -> io::Result<()> {
    task.await.map_err(io::Error::other)?
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn sh(script: &str) -> ProcessRunner {
        ProcessRunner::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_captures_separate_and_combined_streams() {
        let result = sh("echo out; echo err >&2")
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.output.len(), "out\nerr\n".len());
        assert!(result.output.contains("out\n"));
        assert!(result.output.contains("err\n"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let result = sh("echo failing >&2; exit 3")
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
        assert!(result.exit_state.contains('3'));
        assert_eq!(result.stderr, "failing\n");
    }

    #[tokio::test]
    async fn test_stdin_is_piped() {
        let result = ProcessRunner::new("cat")
            .stdin("piped input")
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.stdout, "piped input");
    }

    #[tokio::test]
    async fn test_unread_stdin_is_not_an_error() {
        let result = ProcessRunner::new("true")
            .stdin(vec![b'x'; 1024 * 1024])
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();

        let result = ProcessRunner::new("ls")
            .current_dir(dir.path())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.stdout.trim(), "marker.txt");
    }

    #[tokio::test]
    async fn test_env_var_adds_to_inherited_environment() {
        let result = sh("echo \"$RCOM_TEST_VAR\"")
            .env_var("RCOM_TEST_VAR", "test_value")
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.stdout, "test_value\n");
    }

    #[tokio::test]
    async fn test_env_replaces_environment() {
        let path = std::env::var("PATH").unwrap_or_default();
        let result = sh("echo \"$RCOM_ONLY:${HOME:-unset}\"")
            .env([("PATH", path.as_str()), ("RCOM_ONLY", "set")])
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.stdout, "set:unset\n");
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let err = ProcessRunner::new("rcom-definitely-not-a-program")
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = sh("exit 0").run(&cancel).await.unwrap_err();

        assert!(matches!(err, ProcessError::CancelledBeforeStart));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = ProcessRunner::new("sleep")
            .arg("30")
            .run(&cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Killed));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancellation_kills_process_group() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("child.pid");
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let cancel = cancel.clone();
            let runner = sh("sleep 30 & echo $! > child.pid; wait")
                .current_dir(dir.path())
                .kill_process_group(true);
            async move { runner.run(&cancel).await }
        });

        let grandchild = wait_for_pid(&pid_file).await;
        cancel.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, ProcessError::Killed));

        let deadline = Instant::now() + Duration::from_secs(5);
        while process_alive(grandchild) {
            assert!(Instant::now() < deadline, "grandchild {grandchild} survived");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_cancellation_kills_group_after_leader_exits() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        // The shell exits at once; the backgrounded sleep keeps both pipes open.
        let start = Instant::now();
        let err = sh("sleep 30 & echo $! > child.pid; echo started")
            .current_dir(dir.path())
            .kill_process_group(true)
            .run(&cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Killed), "unexpected error: {err}");
        assert!(start.elapsed() < Duration::from_secs(10));

        #[cfg(target_os = "linux")]
        {
            let grandchild = wait_for_pid(&dir.path().join("child.pid")).await;
            let deadline = Instant::now() + Duration::from_secs(5);
            while process_alive(grandchild) {
                assert!(Instant::now() < deadline, "grandchild {grandchild} survived");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    #[tokio::test]
    async fn test_waits_for_streams_held_by_subprocess() {
        let start = Instant::now();
        let result = sh("(sleep 1; echo late) & echo early")
            .kill_process_group(true)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.stdout, "early\nlate\n");
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[cfg(target_os = "linux")]
    async fn wait_for_pid(path: &std::path::Path) -> u32 {
        for _ in 0..100 {
            if let Ok(content) = std::fs::read_to_string(path) {
                if let Ok(pid) = content.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("pid file {} never appeared", path.display());
    }

    /// Running or sleeping; zombies count as dead.
    #[cfg(target_os = "linux")]
    fn process_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }

    #[test]
    fn test_accepts_exit_code() {
        let mut result = ProcessRunResult {
            exit_code: 0,
            exit_state: "exit status: 0".to_string(),
            output: String::new(),
            stdout: String::new(),
            stderr: String::new(),
        };
        let non_error: BTreeSet<i32> = [1].into();
        assert!(result.accepts_exit_code(&BTreeSet::new()));

        result.exit_code = 1;
        assert!(!result.accepts_exit_code(&BTreeSet::new()));
        assert!(result.accepts_exit_code(&non_error));

        result.exit_code = 2;
        assert!(!result.accepts_exit_code(&non_error));
    }

    #[test]
    fn test_display() {
        let runner = ProcessRunner::new("cp").args(["a.txt", "b.txt"]);
        assert_eq!(runner.to_string(), "cp a.txt b.txt");
    }
}
