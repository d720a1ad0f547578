//! HTTP and WebSocket handlers for the relay server.
//!
//! Routes:
//! - `GET /ws/:room?username=` - join a room over WebSocket
//! - `GET /rooms` - list known rooms
//! - `DELETE /rooms?name=&username=` - delete a room and disconnect its clients
//! - `GET /health` - liveness probe

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, Metered};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocket, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use relay_core::{
    run_session, HubManager, MemoryDirectory, MemoryStore, MessageStore, Room, RoomDirectory,
    ANONYMOUS,
};
use relay_transport::{split_websocket, ConnectionId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Registry of live room hubs.
    pub manager: HubManager,
    /// Known rooms and their creators.
    pub directory: Arc<dyn RoomDirectory>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state with in-memory store and directory.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::with_capacity_per_room(
            config.store.max_messages_per_room,
        ));
        Self::with_backends(config, store, Arc::new(MemoryDirectory::new()))
    }

    /// Create app state on top of the given store and directory.
    #[must_use]
    pub fn with_backends(
        config: Config,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn RoomDirectory>,
    ) -> Self {
        Self {
            manager: HubManager::new(store, config.hub.to_hub_config()),
            directory,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/", get(missing_room_handler))
        .route("/ws/:room", get(ws_handler))
        .route("/rooms", get(list_rooms_handler).delete(delete_room_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve `state` on an already bound listener until `shutdown` resolves.
///
/// Every hub is torn down once the listener stops.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = app(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    let disconnected = state.manager.close_all().await;
    info!(clients = disconnected, "All rooms closed");
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(AppState::new(config));

    info!("Relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws/<room>?username=<name>", addr);

    serve(listener, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    username: Option<String>,
}

async fn missing_room_handler() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, "Room ID required")
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if room.is_empty() {
        return missing_room_handler().await.into_response();
    }

    let username = params
        .username
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| ANONYMOUS.to_string());

    if let Err(e) = state.directory.ensure_exists(&room, &username).await {
        warn!(room = %room, error = %e, "Could not record room");
        metrics::record_error("directory");
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, room, username))
}

/// Handle an upgraded WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, room: String, username: String) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();

    debug!(connection = %connection_id, room = %room, user = %username, "WebSocket connected");

    let hub = state.manager.get_or_create(&room).await;
    metrics::set_active_rooms(state.manager.room_count().await);

    let (source, sink) = split_websocket(
        socket,
        connection_id.clone(),
        state.config.limits.max_message_size,
    );
    run_session(
        &state.manager,
        hub,
        connection_id.clone(),
        &username,
        Metered(source),
        Metered(sink),
    )
    .await;

    debug!(connection = %connection_id, room = %room, "WebSocket disconnected");
}

/// A room as listed by `GET /rooms`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoomView {
    /// Directory entry.
    #[serde(flatten)]
    pub room: Room,
    /// Whether a hub is currently running for the room.
    pub active: bool,
}

async fn list_rooms_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RoomView>>, (StatusCode, String)> {
    let rooms = state.directory.rooms().await.map_err(|e| {
        metrics::record_error("directory");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let live = state.manager.list_rooms().await;
    let views = rooms
        .into_iter()
        .map(|room| RoomView {
            active: live.contains(&room.name),
            room,
        })
        .collect();

    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    name: Option<String>,
    username: Option<String>,
}

async fn delete_room_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let (Some(name), Some(username)) = (
        params.name.filter(|n| !n.is_empty()),
        params.username.filter(|u| !u.is_empty()),
    ) else {
        return Err((
            StatusCode::BAD_REQUEST,
            "Room name and username required".to_string(),
        ));
    };

    let internal = |e: relay_core::StoreError| {
        metrics::record_error("directory");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    };

    let room = state
        .directory
        .get(&name)
        .await
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Room not found".to_string()))?;

    if room.creator != username {
        return Err((
            StatusCode::FORBIDDEN,
            "Only the room creator can delete this room".to_string(),
        ));
    }

    state.directory.remove(&name).await.map_err(internal)?;
    let disconnected = state.manager.force_close(&name).await.unwrap_or(0);
    metrics::record_teardown();
    metrics::set_active_rooms(state.manager.room_count().await);

    info!(room = %name, user = %username, clients = disconnected, "Room deleted");
    Ok(Json(serde_json::json!({
        "message": "Room deleted successfully",
        "disconnected": disconnected,
    })))
}
