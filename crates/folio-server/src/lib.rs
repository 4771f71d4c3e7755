//! Folio HTTP server library.
//!
//! Exposes the page API and per-page SSE streams over axum. The binary in
//! `main.rs` only parses flags, sets up tracing and calls [`serve`].

pub mod config;
pub mod constants;
pub mod error;
pub mod extract;
pub mod routes;
pub mod sse;
pub mod state;

use std::future::Future;

use tokio::net::TcpListener;

pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;

/// Serve the API on `listener` until `shutdown` resolves.
///
/// On shutdown every live event stream is cancelled so graceful shutdown
/// does not wait on idle SSE connections.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let relays = state.shutdown.clone();
    let app = build_router(state);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "folio server listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("shutting down, closing event streams");
            relays.cancel();
        })
        .await
}
