//! Process lifecycle: build the core services, start listeners and
//! background tasks, and tear everything down on shutdown.

use std::sync::Arc;

use lexigate_core::alerts::LogNotifier;
use lexigate_core::config::Config;
use lexigate_core::{CoreServices, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::admin::AdminServer;
use crate::app::{default_routes, governed, serve};
use crate::error::ServerResult;

/// Run the service until `shutdown` is cancelled.
///
/// Background tasks and the admin listener are joined before returning,
/// so no evaluation or sweep is left running.
pub async fn run(config: Config, shutdown: CancellationToken) -> ServerResult<()> {
    let services = CoreServices::build(&config, SystemClock::shared(), Arc::new(LogNotifier))?;
    info!(
        limit = config.rate_limit.requests_per_window,
        window_secs = config.rate_limit.window_duration.as_secs_f64(),
        alert_rules = services.evaluator.rules().len(),
        "Core services ready"
    );

    let background = services.spawn_background(&config, &shutdown);

    let admin = AdminServer::new(services.clone(), config.server.admin_bind.clone());
    let admin_shutdown = shutdown.clone();
    let admin_task = tokio::spawn(async move { admin.run(admin_shutdown).await });

    let router = governed(default_routes(), services.governor.clone());
    let served = serve(&config.server.bind, router, shutdown.clone()).await;

    // The app listener is gone (shutdown or failure); stop everything else.
    shutdown.cancel();
    match admin_task.await {
        Ok(Err(e)) => error!(error = %e, "Admin server failed"),
        Err(e) => error!(error = %e, "Admin server task panicked"),
        Ok(Ok(())) => {}
    }
    for handle in background {
        handle.await?;
    }

    info!("Shutdown complete");
    served
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
pub fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    });

    #[cfg(not(unix))]
    let _ = shutdown;
}
