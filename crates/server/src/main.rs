use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;
mod orchestrator;

use config::{load_settings, LoadedSettings, DEFAULT_CONFIG_PATH};
use orchestrator::Orchestrator;

/// Relays HTTP-triggered notifications into Kahla conversations.
#[derive(Debug, Parser)]
#[command(name = "notify-relay", version)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = match load_settings(&cli.config)? {
        LoadedSettings::Ready(settings) => settings,
        LoadedSettings::TemplateWritten(path) => {
            info!(
                path = %path.display(),
                "config template written; fill in email and password, then start again"
            );
            return Ok(());
        }
    };
    info!(
        email = %settings.email,
        server_url = %settings.server_url,
        bind = %settings.bind_addr(),
        "starting notify relay"
    );

    let orchestrator = Orchestrator::from_settings(&settings)?;
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));
    orchestrator.run(shutdown).await
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("terminate signal received"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
