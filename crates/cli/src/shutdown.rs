use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Listen for SIGINT and SIGTERM and cancel the dump. Planners stop
/// emitting, workers finish their current chunk and roll back, and the run
/// reports itself as interrupted.
pub fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install SIGINT handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, stopping the dump."),
            _ = terminate => info!("Received SIGTERM, stopping the dump."),
        }
        cancel.cancel();
    });
}
