use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;

use tempo_core::events::ChangeEvent;

use crate::bus;
use crate::client::{self, ClientId, ClientRegistry};
use crate::handlers::HandlerState;
use crate::rpc::{self, RpcRequest, RpcResponse};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9464,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks alive.
pub async fn start(
    config: ServerConfig,
    handler_state: HandlerState,
    event_tx: broadcast::Sender<ChangeEvent>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    // Notification fan-out
    let bus_rx = event_tx.subscribe();
    let bus_handle = bus::create_bus(Arc::clone(&client_registry), bus_rx);

    // Dead-client cleanup (every 60s)
    let cleanup = client::start_cleanup_task(
        Arc::clone(&client_registry),
        std::time::Duration::from_secs(60),
    );

    let (msg_tx, msg_rx) = mpsc::channel::<(ClientId, String)>(1024);
    let handler_state = Arc::new(handler_state);

    let app_state = AppState {
        handler_state: Arc::clone(&handler_state),
        client_registry: Arc::clone(&client_registry),
        message_tx: msg_tx,
    };

    let rpc_handle = tokio::spawn(process_rpc_messages(
        msg_rx,
        handler_state,
        Arc::clone(&client_registry),
    ));

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Tempo server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _bus: bus_handle,
        _rpc: rpc_handle,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`; keeps the background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _bus: tokio::task::JoinHandle<()>,
    _rpc: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    client::handle_ws_connection(
        socket,
        client_id,
        rx,
        state.client_registry,
        state.message_tx,
    )
    .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let resp = crate::handlers::dispatch(
        &state.handler_state,
        "health",
        &serde_json::json!({}),
        None,
    );
    (
        axum::http::StatusCode::OK,
        axum::Json(resp.result.unwrap_or_default()),
    )
}

/// Process incoming RPC messages from WebSocket clients. Subscription is
/// handled here because it needs the client identity; everything else is
/// routed through the method dispatcher.
async fn process_rpc_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    state: Arc<HandlerState>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw_message)) = rx.recv().await {
        let request: RpcRequest = match serde_json::from_str(&raw_message) {
            Ok(req) => req,
            Err(_) => {
                let resp = RpcResponse::parse_error();
                if let Ok(json) = serde_json::to_string(&resp) {
                    registry.send_to(&client_id, json).await;
                }
                continue;
            }
        };

        let params = request.params.unwrap_or(serde_json::json!({}));
        let response = match request.method.as_str() {
            "subscribe" => {
                let topic = rpc::optional_str(&params, "topic").unwrap_or(bus::TOPIC_CHANGES);
                registry.subscribe(&client_id, topic).await;
                RpcResponse::success(request.id, serde_json::json!({"subscribed": topic}))
            }
            "unsubscribe" => {
                let topic = rpc::optional_str(&params, "topic").unwrap_or(bus::TOPIC_CHANGES);
                registry.unsubscribe(&client_id, topic).await;
                RpcResponse::success(request.id, serde_json::json!({"unsubscribed": topic}))
            }
            method => crate::handlers::dispatch(&state, method, &params, request.id),
        };

        if let Ok(json) = serde_json::to_string(&response) {
            registry.send_to(&client_id, json).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_engine::Engine;
    use tempo_store::Database;

    fn handler_state(event_tx: &broadcast::Sender<ChangeEvent>) -> HandlerState {
        let db = Database::in_memory().unwrap();
        HandlerState::new(Engine::new(db, event_tx.clone()))
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (event_tx, _) = broadcast::channel(100);
        let config = ServerConfig {
            port: 0, // random port
            ..Default::default()
        };

        let handle = start(config, handler_state(&event_tx), event_tx.clone())
            .await
            .unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn rpc_loop_handles_subscribe_then_mutation_notifies() {
        let (event_tx, _) = broadcast::channel(100);
        let registry = Arc::new(ClientRegistry::new(32));
        let state = Arc::new(handler_state(&event_tx));

        let bus_rx = event_tx.subscribe();
        let _bus = bus::create_bus(Arc::clone(&registry), bus_rx);

        let (msg_tx, msg_rx) = mpsc::channel(32);
        let _rpc = tokio::spawn(process_rpc_messages(
            msg_rx,
            Arc::clone(&state),
            Arc::clone(&registry),
        ));

        let (client_id, mut client_rx) = registry.register();

        // Subscribe to the changes topic.
        msg_tx
            .send((
                client_id.clone(),
                r#"{"method":"subscribe","params":{},"id":1}"#.to_string(),
            ))
            .await
            .unwrap();
        let ack = client_rx.recv().await.unwrap();
        assert!(ack.contains("\"subscribed\":\"changes\""));

        // A mutation over RPC produces both a response and a notification.
        // The RPC loop and the bus are independent tasks, so arrival order
        // is unspecified; drain and check both messages are there.
        msg_tx
            .send((
                client_id.clone(),
                r#"{"method":"task.create","params":{"title":"Write paper"},"id":2}"#.to_string(),
            ))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut messages = Vec::new();
        while let Ok(msg) = client_rx.try_recv() {
            messages.push(msg);
        }
        assert!(messages.iter().any(|m| m.contains("\"success\":true")));
        assert!(messages
            .iter()
            .any(|m| m.contains("\"notificationType\":\"task_create\"") && m.contains("Write paper")));
    }

    #[tokio::test]
    async fn malformed_json_gets_parse_error() {
        let (event_tx, _) = broadcast::channel(100);
        let registry = Arc::new(ClientRegistry::new(32));
        let state = Arc::new(handler_state(&event_tx));

        let (msg_tx, msg_rx) = mpsc::channel(32);
        let _rpc = tokio::spawn(process_rpc_messages(
            msg_rx,
            state,
            Arc::clone(&registry),
        ));

        let (client_id, mut client_rx) = registry.register();
        msg_tx
            .send((client_id, "not json".to_string()))
            .await
            .unwrap();

        let resp = client_rx.recv().await.unwrap();
        assert!(resp.contains("PARSE_ERROR"));
    }

    #[test]
    fn build_router_creates_routes() {
        let (event_tx, _) = broadcast::channel(16);
        let state = AppState {
            handler_state: Arc::new(handler_state(&event_tx)),
            client_registry: Arc::new(ClientRegistry::new(32)),
            message_tx: mpsc::channel(32).0,
        };
        let _router = build_router(state);
    }
}
