//! tokenline - command-line front end for the authenticated session pipeline.
//!
//! Signs in against the configured backend, keeps the token pair in the
//! configured store, and issues authenticated requests that refresh the
//! access token transparently.

mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use tokenline_core::{AuthClient, Config};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{Command, USAGE};

/// Log file prefix inside `<data dir>/logs`
const LOG_FILE_PREFIX: &str = "tokenline.log";

/// Initialize the tracing subscriber for logging.
///
/// Stderr gets `RUST_LOG`-filtered output (default `warn`); the same events
/// also go to a daily rolling file when the data directory is available.
fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let (config_result, mut config) = match Config::load() {
        Ok(c) => (Ok(()), c),
        Err(e) => (Err(e), Config::default()),
    };
    config.apply_env_overrides();

    let log_dir = config.data_dir().ok().map(|dir| dir.join("logs"));
    let _log_guard = init_tracing(log_dir);
    if let Err(e) = config_result {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    info!(base_url = %config.base_url, ?command, "tokenline starting");
    let client = AuthClient::from_config(&config)?;

    match command {
        Command::Login { email } => commands::login(&client, &mut config, email).await,
        Command::Register { email } => commands::register(&client, &mut config, email).await,
        Command::Logout { assume_yes } => commands::logout(&client, &config, assume_yes),
        Command::Whoami => commands::whoami(&client).await,
        Command::Status => commands::status(&client, &config).await,
        Command::Get { path } => commands::get(&client, &path).await,
        Command::Watch => commands::watch(&client).await,
        Command::Help => Ok(()),
    }
}
