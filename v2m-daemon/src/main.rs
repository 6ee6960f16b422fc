//! `v2m` entry point: daemon by default, client when given a subcommand.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use v2m_daemon::cli::Cli;
use v2m_daemon::config::DaemonConfig;
use v2m_daemon::daemon::Daemon;
use v2m_daemon::paths::RuntimePaths;
use v2m_daemon::client;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(DaemonConfig::default_path);

    match cli.command {
        Some(command) => client::run(command).await,
        None => run_daemon(config_path).await,
    }
}

async fn run_daemon(config_path: std::path::PathBuf) -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("V2M_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = async {
        let paths = RuntimePaths::resolve()?;
        let daemon = Daemon::bootstrap(config_path, paths)?;
        daemon.run().await
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
