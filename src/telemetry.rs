use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rumqttc=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Waits for SIGINT/SIGTERM, then cancels `token` so every long-lived loop
/// can unwind. Also returns if the token is cancelled from elsewhere first
/// (e.g. the supervisor giving up).
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("shutdown signal received"); }
        _ = terminate => { info!("shutdown signal received"); }
        _ = token.cancelled() => { return; }
    }
    token.cancel();
}
