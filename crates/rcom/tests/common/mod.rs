//! Test utilities and common setup.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;

use rcom::config::{ClientConfig, ServerConfig};
use rcom::{CancellationToken, Client, Command, server};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const TEST_FILE_CONTENT: &str = "rcom test file";

/// Copies `input.txt` to `output.txt` and collects `*.txt`.
pub fn copy_command() -> Command {
    Command::new("cp")
        .args(["input.txt", "output.txt"])
        .file("input.txt", TEST_FILE_CONTENT)
        .result_pattern("*.txt")
}

/// Path of the `rcom-test-cmd` helper binary.
pub fn test_cmd() -> &'static str {
    env!("CARGO_BIN_EXE_rcom-test-cmd")
}

/// Number of entries directly under `root`.
pub fn entry_count(root: &Path) -> usize {
    std::fs::read_dir(root).map(|entries| entries.count()).unwrap_or(0)
}

/// A running endpoint on an ephemeral loopback port.
pub struct TestEndpoint {
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<anyhow::Result<()>>,
}

impl TestEndpoint {
    pub fn client(&self, allowed: &[&str]) -> Client {
        self.client_with(ClientConfig::for_commands(allowed.iter().copied()))
    }

    pub fn client_with(&self, config: ClientConfig) -> Client {
        let config = ClientConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            ..config
        };
        Client::new(config).unwrap()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap().unwrap();
    }
}

pub async fn spawn_endpoint(allowed: &[&str], scratch_root: &Path) -> TestEndpoint {
    let config = ServerConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        allowed_commands: allowed.iter().map(|name| name.to_string()).collect(),
        scratch_dir: Some(scratch_root.to_path_buf()),
        shutdown_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let listener = TcpListener::bind(config.socket_addr().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { server::serve_on(listener, &config, shutdown).await }
    });
    TestEndpoint {
        addr,
        shutdown,
        task,
    }
}
