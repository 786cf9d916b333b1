//! Graceful-shutdown `axum::serve` entry point.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Shutdown grace period: in-flight requests get this long to finish once
/// `shutdown` fires before the listener is torn down regardless.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

/// Serves the gateway on an existing listener until `shutdown` fires (or
/// forever if it never does). Used directly by tests, which bind to
/// `127.0.0.1:0` and pass the listener in to discover the assigned port.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!("gateway listening on http://{addr}");

    let app = build_router(state);
    let graceful = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        graceful.cancelled().await;
    });

    tokio::select! {
        res = server => res?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_BUDGET).await;
        } => {
            info!("gateway shutdown budget ({SHUTDOWN_BUDGET:?}) elapsed, forcing exit");
        }
    }
    Ok(())
}
