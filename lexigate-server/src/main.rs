//! LexiGate - rate limiting, metrics and alerting for the vocabulary service.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use lexigate_core::config;
use lexigate_server::runtime::{run, setup_signal_handlers};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Command-line options. Everything else comes from the config file.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    /// If not specified, searches: LEXIGATE_CONFIG env, /etc/lexigate/config.yaml, ./config.yaml
    #[arg(long, env = "LEXIGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Application listener, overrides `server.bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Admin listener, overrides `server.adminBind`.
    #[arg(long)]
    admin_bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The guard must outlive the runtime so buffered logs are flushed.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let (mut config, _warnings) = config::load(cli.config.as_deref()).inspect_err(|e| {
        error!(error = %e, "Invalid configuration, refusing to start");
    })?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(admin_bind) = cli.admin_bind {
        config.server.admin_bind = admin_bind;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind,
        admin_bind = %config.server.admin_bind,
        "Starting LexiGate"
    );

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    if let Err(e) = run(config, shutdown).await {
        error!(error = %e, "LexiGate exited with error");
        return Err(e.into());
    }
    Ok(())
}
