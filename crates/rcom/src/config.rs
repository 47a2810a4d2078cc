//! Server and client configuration.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{RcomError, Result};

/// Prefix of environment variables that override file settings,
/// e.g. `RCOM_PORT=4000` or `RCOM_ALLOWED_COMMANDS=pdftotext,convert`.
pub const ENV_PREFIX: &str = "RCOM";

/// `rcom-server` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Command names the endpoint will execute. Empty means none.
    #[serde(default)]
    pub allowed_commands: Vec<String>,

    /// Parent directory of call workspaces (defaults to the OS temp dir)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Drain in-flight calls on SIGINT/SIGTERM/SIGHUP instead of exiting
    #[serde(default = "default_true")]
    pub graceful_shutdown: bool,

    /// How long in-flight calls get to finish after a shutdown signal
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Largest accepted request body, in MiB
    #[serde(default = "default_max_request_size_mb")]
    pub max_request_size_mb: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    rcom_protocol::DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_shutdown_timeout_secs() -> u64 {
    60
}

fn default_max_request_size_mb() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            allowed_commands: Vec::new(),
            scratch_dir: None,
            graceful_shutdown: default_true(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_request_size_mb: default_max_request_size_mb(),
        }
    }
}

impl ServerConfig {
    /// Layer defaults, a TOML file and `RCOM_*` environment variables.
    ///
    /// An explicitly given file must exist; the default file
    /// ([`Self::default_config_path`]) is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(File::from(path).format(FileFormat::Toml).required(true)),
            None => Self::default_config_path()
                .map(|path| File::from(path).format(FileFormat::Toml).required(false)),
        };

        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("allowed_commands")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| RcomError::Config(e.to_string()))
    }

    /// `$XDG_CONFIG_HOME/rcom/server.toml` or the platform equivalent.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rcom").join("server.toml"))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| RcomError::Config(format!("invalid bind address {:?}: {e}", self.bind)))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Maximum request body size in bytes.
    pub fn max_request_size(&self) -> usize {
        self.max_request_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Configuration of a remote caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Command names this client may request.
    #[serde(default)]
    pub allowed_commands: BTreeSet<String>,

    /// Host running `rcom-server`
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Deadline for a whole call, in milliseconds. None waits indefinitely.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            allowed_commands: BTreeSet::new(),
            host: default_host(),
            port: default_port(),
            timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Client for `commands` against the default host and port.
    pub fn for_commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_commands: commands.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Base URL of the endpoint, e.g. `http://localhost:3666`.
    pub fn endpoint_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RcomError::Config("host must not be empty".to_string()));
        }
        if self.allowed_commands.is_empty() {
            return Err(RcomError::Config(
                "at least one allowed command is required".to_string(),
            ));
        }
        if self.allowed_commands.iter().any(String::is_empty) {
            return Err(RcomError::Config(
                "allowed command names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
