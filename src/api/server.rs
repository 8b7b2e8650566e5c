//! HTTP server setup and routing

use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::sequencer::Sequencer;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub sequencer: Arc<Sequencer>,
    pub events: EventBus,
}

/// Build the control-surface router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers_health))
        .route("/playback/enqueue-log", post(super::handlers::enqueue_log))
        .route("/playback/next", post(super::handlers::next))
        .route("/playback/previous", post(super::handlers::previous))
        .route("/playback/stop", post(super::handlers::stop))
        .route("/playback/play-at", post(super::handlers::play_at))
        .route("/playback/queue", get(super::handlers::get_queue))
        .route("/playback/queue/:index", delete(super::handlers::remove))
        .route("/playback/queue/clear", post(super::handlers::clear_queue))
        .route("/events", get(super::sse::event_stream))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn handlers_health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "service": "lumen-sr",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Run the control-surface server until `shutdown` resolves
pub async fn run(
    port: u16,
    ctx: AppContext,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(ctx);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| Error::Http(format!("bind port {port}: {e}")))?;
    info!(port, "control surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(e.to_string()))
}
