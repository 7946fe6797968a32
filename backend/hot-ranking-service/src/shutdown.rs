//! Cooperative shutdown over a `watch` channel carrying `true` once the
//! process is stopping.

use tokio::sync::watch;

/// Resolves once shutdown has been requested. Never resolves if the sender
/// is dropped without requesting it.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// A receiver that never signals, for components run outside the service.
pub fn never() -> watch::Receiver<bool> {
    watch::channel(false).1
}
