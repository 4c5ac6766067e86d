//! HTTP adapter.
//!
//! A thin axum layer over the session manager and the dispatch pipeline,
//! plus the optional Prometheus listener.

mod chats;
mod handlers;
mod response;
mod send;

pub use response::ApiError;

use crate::config::{MessagesConfig, UploadsConfig};
use crate::dispatch::DispatchPipeline;
use crate::session::SessionManager;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Headroom over the largest attachment for the rest of a multipart body.
const BODY_OVERHEAD: usize = 1024 * 1024;

/// Shared state for all handlers.
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub pipeline: DispatchPipeline,
    pub messages: MessagesConfig,
    pub uploads: UploadsConfig,
    pub started: Instant,
}

impl AppState {
    pub fn new(
        manager: Arc<SessionManager>,
        messages: MessagesConfig,
        uploads: UploadsConfig,
    ) -> Self {
        let pipeline = DispatchPipeline::new(Arc::clone(&manager), messages.attempt_timeout());
        Self {
            manager,
            pipeline,
            messages,
            uploads,
            started: Instant::now(),
        }
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.uploads.max_file_size.saturating_add(BODY_OVERHEAD);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/start-session", post(handlers::start_session))
        .route("/session-status/:user_id", get(handlers::session_status))
        .route("/get-qr/:user_id", get(handlers::get_qr))
        .route("/close-session", post(handlers::close_session))
        .route("/send-messages", post(send::send_messages))
        .route("/labels/:user_id/all-chats", get(chats::labels_with_chats))
        .route("/groups/:user_id", get(chats::groups))
        .route(
            "/groups/:user_id/:group_id/participants",
            get(chats::group_participants),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled, then drain connections.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP API listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Run the HTTP server for Prometheus metrics.
///
/// Binds to `0.0.0.0:port` and serves the `/metrics` endpoint.
/// This is a long-running task that should be spawned in the background.
pub async fn run_metrics_server(port: u16, shutdown: CancellationToken) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    tracing::info!(%addr, "Prometheus HTTP server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Metrics server error");
    }
}
