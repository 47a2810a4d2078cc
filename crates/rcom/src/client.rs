//! Client for a remote rcom endpoint.
//!
//! The client keeps its own allow-list: a command it isn't configured for is
//! refused before any connection is made, whatever the endpoint would allow.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use rcom_protocol::{CallResult, Command, codec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{RcomError, Result};
use crate::executor::Executor;

/// A named in-memory input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read a local file; it is staged remotely under its file name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input_error = |source| RcomError::Input {
            path: path.to_path_buf(),
            source,
        };
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                input_error(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "path has no UTF-8 file name",
                ))
            })?
            .to_string();
        let data = tokio::fs::read(path).await.map_err(input_error)?;
        Ok(Self { name, data })
    }
}

/// Sends commands to one endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
    url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RcomError::Config(format!("can't build HTTP client: {e}")))?;
        Self::with_http_client(config, http)
    }

    /// Use a preconfigured HTTP client, e.g. one with custom TLS roots.
    pub fn with_http_client(config: ClientConfig, http: reqwest::Client) -> Result<Self> {
        config.validate()?;
        let url = config.endpoint_url();
        Ok(Self { config, url, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.config.allowed_commands.contains(name)
    }

    /// Send `command` to the endpoint.
    ///
    /// Fails with [`RcomError::NotAllowed`] before any network activity when
    /// the command isn't in this client's allow-list, and with
    /// [`RcomError::DeadlineExceeded`] when the configured timeout elapses.
    pub async fn execute_command(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<CallResult> {
        if !self.is_allowed(&command.name) {
            warn!(command = %command.name, "refusing command outside the client allow-list");
            return Err(RcomError::NotAllowed(command.name.clone()));
        }

        let call = execute_remotely(&self.http, &self.url, command, cancel);
        match self.config.timeout() {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| RcomError::DeadlineExceeded(timeout))?,
            None => call.await,
        }
    }

    /// Build a command from its parts and send it.
    pub async fn execute_with_command(
        &self,
        name: &str,
        args: &[&str],
        files: Vec<InputFile>,
        result_patterns: &[&str],
        cancel: &CancellationToken,
    ) -> Result<CallResult> {
        let mut command = Command::new(name).args(args.iter().copied());
        for file in files {
            command = command.file(file.name, file.data);
        }
        for pattern in result_patterns {
            command = command.result_pattern(*pattern);
        }
        self.execute_command(&command, cancel).await
    }

    /// Like [`Self::execute_with_command`] for a client allowed exactly one
    /// command, which is the one run.
    pub async fn execute(
        &self,
        args: &[&str],
        files: Vec<InputFile>,
        result_patterns: &[&str],
        cancel: &CancellationToken,
    ) -> Result<CallResult> {
        let mut allowed = self.config.allowed_commands.iter();
        let name = match (allowed.next(), allowed.next()) {
            (Some(name), None) => name,
            _ => {
                return Err(RcomError::Config(format!(
                    "execute needs exactly one allowed command, found {}",
                    self.config.allowed_commands.len()
                )));
            }
        };
        self.execute_with_command(name, args, files, result_patterns, cancel)
            .await
    }
}

#[async_trait]
impl Executor for Client {
    async fn execute(&self, command: &Command, cancel: &CancellationToken) -> Result<CallResult> {
        self.execute_command(command, cancel).await
    }
}

/// One request/response exchange with the endpoint at `url`.
///
/// No allow-list is applied here. Cancelling `cancel` aborts the request.
pub async fn execute_remotely(
    http: &reqwest::Client,
    url: &str,
    command: &Command,
    cancel: &CancellationToken,
) -> Result<CallResult> {
    command.validate()?;
    if cancel.is_cancelled() {
        return Err(RcomError::Cancelled);
    }
    let body = codec::encode_command(command)?;

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RcomError::Cancelled),
        result = post_command(http, url, command, body) => result,
    }
}

async fn post_command(
    http: &reqwest::Client,
    url: &str,
    command: &Command,
    body: Vec<u8>,
) -> Result<CallResult> {
    let transport = |source| RcomError::Transport {
        addr: url.to_string(),
        command: command.name.clone(),
        source,
    };

    debug!(addr = url, command = %command.name, bytes = body.len(), "sending command");
    let response = http
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, codec::CONTENT_TYPE)
        .body(body)
        .send()
        .await
        .map_err(transport)?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport)?;
    if !status.is_success() {
        return Err(RcomError::Remote {
            addr: url.to_string(),
            command: command.name.clone(),
            status: status.as_u16(),
            message: String::from_utf8_lossy(&bytes).trim_end().to_string(),
        });
    }

    let result = codec::decode_result(&bytes).map_err(|source| RcomError::BadResponse {
        addr: url.to_string(),
        command: command.name.clone(),
        source,
    })?;
    debug!(call_id = %result.call_id, exit_code = result.exit_code, "received result");
    Ok(result)
}
