use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use beacon_core::BroadcastRequest;
use beacon_hub::{start_intake, Hub, Publisher};

use crate::connection;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    /// Outbound mailbox capacity per connection. A connection whose mailbox
    /// fills up is disconnected rather than allowed to stall fan-out.
    pub mailbox_capacity: usize,
    /// Broadcast intake queue capacity.
    pub intake_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8089,
            mailbox_capacity: 256,
            intake_capacity: 1024,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub publisher: Publisher,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/broadcast", post(broadcast_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the relay. Returns a handle that keeps the background
/// tasks alive. Port 0 binds a random free port (used by tests).
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let hub = Arc::new(Hub::new(config.mailbox_capacity));
    let (publisher, intake_handle) = start_intake(Arc::clone(&hub), config.intake_capacity);

    let state = AppState {
        hub: Arc::clone(&hub),
        publisher: publisher.clone(),
    };
    let router = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "beacon relay started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        hub,
        publisher,
        _server: server_handle,
        _intake: intake_handle,
    })
}

/// Handle returned by `start()` — keeps background tasks alive and exposes
/// the hub and publisher for in-process producers.
pub struct ServerHandle {
    pub port: u16,
    pub hub: Arc<Hub>,
    pub publisher: Publisher,
    _server: tokio::task::JoinHandle<()>,
    _intake: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state.hub))
}

/// External control surface: enqueue a fan-out request. Fire-and-forget; the
/// caller gets no delivery confirmation.
async fn broadcast_handler(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> impl IntoResponse {
    state.publisher.publish(request.channel, request.data);
    axum::http::StatusCode::OK
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "clients": state.hub.client_count(),
        "channels": state.hub.channel_count(),
    }))
}
