//! Signal handling for graceful shutdown.

use tokio::signal;
use tracing::{info, warn};

/// Completes on SIGINT (Ctrl+C) or SIGTERM.
///
/// If a handler cannot be installed, that signal is ignored and a warning is
/// logged; the other one still triggers shutdown.
///
/// ```no_run
/// use strongbox_http::shutdown_signal;
/// use tokio::net::TcpListener;
/// use axum::Router;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let listener = TcpListener::bind("127.0.0.1:8080").await?;
///     axum::serve(listener, Router::new())
///         .with_graceful_shutdown(shutdown_signal())
///         .await?;
///     Ok(())
/// }
/// ```
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
