//! rcom-test-cmd: a predictable program for exercising rcom.
//!
//! Sleeps, creates empty files in the working directory, prints the given
//! text and exits with the given code.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "rcom-test-cmd")]
#[command(about = "Test program for rcom")]
struct Cli {
    /// Milliseconds to sleep before doing anything else
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,

    /// Comma-separated names of empty files to create
    #[arg(long, value_delimiter = ',')]
    create_files: Vec<String>,

    /// Text written to stdout
    #[arg(long)]
    stdout: Option<String>,

    /// Text written to stderr
    #[arg(long)]
    stderr: Option<String>,

    /// Exit code
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    exit_code: i32,
}

fn run(cli: &Cli) -> Result<()> {
    std::thread::sleep(Duration::from_millis(cli.wait_ms));

    for name in cli.create_files.iter().filter(|name| !name.is_empty()) {
        std::fs::File::create(Path::new(name)).with_context(|| format!("creating {name}"))?;
    }
    if let Some(text) = &cli.stdout {
        let mut out = std::io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
    }
    if let Some(text) = &cli.stderr {
        std::io::stderr().write_all(text.as_bytes())?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("rcom-test-cmd: {err:#}");
        std::process::exit(125);
    }
    std::process::exit(cli.exit_code);
}
