//! rcom-server: executes allow-listed commands for remote callers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rcom::config::ServerConfig;
use rcom::{CancellationToken, logging, server};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rcom-server")]
#[command(about = "Run allow-listed commands in disposable workspaces for remote callers")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(env = "PORT")]
    port: Option<u16>,

    /// Address to bind to
    #[arg(short, long)]
    bind: Option<String>,

    /// Command the endpoint may execute (repeatable)
    #[arg(short = 'a', long = "allow", value_name = "COMMAND")]
    allow: Vec<String>,

    /// Directory under which per-call workspaces are created
    #[arg(short, long)]
    scratch_dir: Option<PathBuf>,

    /// Config file path (defaults to the user config dir)
    #[arg(short, long, env = "RCOM_CONFIG")]
    config: Option<PathBuf>,

    /// Exit immediately on shutdown signals instead of draining calls
    #[arg(long)]
    no_graceful_shutdown: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if !self.allow.is_empty() {
            config.allowed_commands = self.allow;
        }
        if let Some(dir) = self.scratch_dir {
            config.scratch_dir = Some(dir);
        }
        if self.no_graceful_shutdown {
            config.graceful_shutdown = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);

    if config.allowed_commands.is_empty() {
        warn!("no allowed commands configured; every call will be rejected");
    }

    let shutdown = CancellationToken::new();
    if config.graceful_shutdown {
        tokio::spawn(server::cancel_on_shutdown_signal(shutdown.clone()));
    } else {
        info!("graceful shutdown disabled");
    }

    server::serve(&config, shutdown).await
}
