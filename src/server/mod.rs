//! HTTP + WebSocket server.

pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::gateway::Gateway;
use crate::scheduler::Scheduler;

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub scheduler: Arc<Scheduler>,
    pub broadcaster: Arc<Broadcaster>,
}

/// Build the router with all routes.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/send-message", post(routes::send_message))
        .route("/api/sendchat", post(routes::send_chat))
        .route("/scheduled-messages", get(routes::scheduled_messages))
        .route("/cancel-schedule", post(routes::cancel_schedule))
        .route("/status", get(routes::status))
        .route("/logout", post(routes::logout))
        .route("/ws", get(ws::ws_handler));

    // Static frontend, when one is deployed alongside the binary.
    if config.public_dir.is_dir() {
        router = router.fallback_service(ServeDir::new(&config.public_dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn run(state: AppState, config: &ServerConfig) -> anyhow::Result<()> {
    let app = router(state, config);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
