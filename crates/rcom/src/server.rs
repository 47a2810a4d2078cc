//! HTTP endpoint executing allow-listed commands.
//!
//! `POST /` takes an encoded [`Command`] and answers with an encoded
//! [`CallResult`]. Failures are plain text: 400 when the request can't be
//! decoded or names a command outside the allow-list, 500 when the call
//! itself fails. `GET /health` answers `ok`.

use std::collections::HashSet;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use rcom_protocol::{CodecError, Command, codec};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::CallError;
use crate::local::CallOrchestrator;

/// Extra time given to calls killed after the grace period to report back.
const KILL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("{0}")]
    Decode(#[source] CodecError),

    #[error("command {0:?} not allowed")]
    NotAllowed(String),

    #[error("{command}\n\n{source}")]
    CallFailed {
        command: String,
        #[source]
        source: CallError,
    },

    #[error("{0}")]
    Encode(#[source] CodecError),
}

impl EndpointError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) | Self::NotAllowed(_) => StatusCode::BAD_REQUEST,
            Self::CallFailed { .. } | Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Allow-list plus orchestrator. Immutable once built.
#[derive(Debug)]
pub struct Endpoint {
    allowed: HashSet<String>,
    orchestrator: CallOrchestrator,
    in_flight: CancellationToken,
}

impl Endpoint {
    pub fn new<I, S>(allowed: I, orchestrator: CallOrchestrator) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
            orchestrator,
            in_flight: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.allowed_commands.iter().cloned(),
            CallOrchestrator::new(config.scratch_root()),
        )
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.contains(name)
    }

    pub fn orchestrator(&self) -> &CallOrchestrator {
        &self.orchestrator
    }

    /// Kill every call currently running on this endpoint.
    pub fn cancel_in_flight(&self) {
        self.in_flight.cancel();
    }

    /// Decode, authorize, run and encode one call.
    ///
    /// The allow-list is checked before the orchestrator is involved, so a
    /// rejected command never touches the filesystem.
    pub async fn handle(&self, body: &[u8]) -> Result<Vec<u8>, EndpointError> {
        let command: Command = codec::decode_command(body).map_err(EndpointError::Decode)?;
        if !self.is_allowed(&command.name) {
            warn!(command = %command.name, "rejected command outside the allow-list");
            return Err(EndpointError::NotAllowed(command.name));
        }

        let cancel = self.in_flight.child_token();
        let result = self
            .orchestrator
            .execute_locally(&command, &cancel)
            .await
            .map_err(|source| {
                error!(call_id = %source.call_id, error = %source, "call failed");
                EndpointError::CallFailed {
                    command: command.to_string(),
                    source,
                }
            })?;

        codec::encode_result(&result).map_err(EndpointError::Encode)
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn execute(
    State(endpoint): State<Arc<Endpoint>>,
    body: Bytes,
) -> Result<Response, EndpointError> {
    let encoded = endpoint.handle(&body).await?;
    Ok(([(header::CONTENT_TYPE, codec::CONTENT_TYPE)], encoded).into_response())
}

/// Routes of the endpoint, with bodies limited to `max_request_size` bytes.
pub fn router(endpoint: Arc<Endpoint>, max_request_size: usize) -> Router {
    Router::new()
        .route(rcom_protocol::HEALTH_PATH, get(health))
        .route(rcom_protocol::EXECUTE_PATH, post(execute))
        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(TraceLayer::new_for_http())
        .with_state(endpoint)
}

/// Bind the configured address and serve until `shutdown` fires.
pub async fn serve(config: &ServerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    serve_on(listener, config, shutdown).await
}

/// Serve on an already bound listener.
///
/// Once `shutdown` fires no new connections are accepted. In-flight calls
/// get [`ServerConfig::shutdown_timeout`] to finish and are killed after
/// that.
pub async fn serve_on(
    listener: TcpListener,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let endpoint = Arc::new(Endpoint::from_config(config));
    let app = router(Arc::clone(&endpoint), config.max_request_size());
    let addr = listener.local_addr().context("reading listener address")?;

    let mut allowed: Vec<&str> = endpoint.allowed.iter().map(String::as_str).collect();
    allowed.sort_unstable();
    info!(
        %addr,
        allowed = ?allowed,
        scratch_root = %endpoint.orchestrator.scratch_root().display(),
        "rcom endpoint listening"
    );

    let grace = config.shutdown_timeout();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.context("serving rcom endpoint")?;
        }
        () = async {
            shutdown.cancelled().await;
            info!(grace_secs = grace.as_secs(), "shutting down, waiting for in-flight calls");
            tokio::time::sleep(grace).await;
        } => {
            warn!("grace period expired, killing in-flight calls");
            endpoint.cancel_in_flight();
            if tokio::time::timeout(KILL_DRAIN_TIMEOUT, &mut server).await.is_err() {
                warn!("endpoint did not stop after killing in-flight calls");
            }
        }
    }

    info!("rcom endpoint stopped");
    Ok(())
}

/// Cancel `token` on Ctrl-C, SIGTERM or SIGHUP.
pub async fn cancel_on_shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "can't listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut term, mut hup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(term), Ok(hup)) => (term, hup),
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "can't install signal handler");
                return std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = term.recv() => {},
            _ = hup.recv() => {},
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
    token.cancel();
}
