/// Waits for SIGINT or SIGTERM (spec §4.8). Mirrors the platform's signal
/// handling but logs through `tracing` instead of writing to stderr
/// directly, since this binary runs headless.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => tracing::warn!("received SIGINT"),
            _ = sigterm.recv() => tracing::warn!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
        tracing::warn!("received ctrl-c");
    }
}
