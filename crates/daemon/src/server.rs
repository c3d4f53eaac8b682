use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use eeg_types::ClientMessage;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::acquisition::{BridgeCommand, BridgeHandle};
use crate::config::BridgeConfig;
use crate::connection_manager::SubscriberId;
use crate::outbound;

/// How long shutdown waits for connections to flush their Close frames.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state for the HTTP router
#[derive(Clone)]
pub struct AppState {
    pub commands: flume::Sender<BridgeCommand>,
    pub queue_capacity: usize,
    /// Upgraded connections, which axum's graceful shutdown does not wait for
    pub connections: TaskTracker,
}

impl AppState {
    pub fn new(handle: &BridgeHandle, config: &BridgeConfig) -> Self {
        Self {
            commands: handle.commands.clone(),
            queue_capacity: config.subscriber_queue_capacity,
            connections: TaskTracker::new(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[axum::debug_handler]
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let connections = state.connections.clone();
    ws.on_upgrade(move |socket| connections.track_future(handle_socket(socket, state)))
}

/// Drives one client connection until either side goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = SubscriberId::new();
    let (outbound_tx, mut outbound_rx) = outbound::channel(state.queue_capacity);
    let connect = BridgeCommand::Connect {
        id,
        outbound: outbound_tx,
    };
    if state.commands.send_async(connect).await.is_err() {
        warn!(subscriber_id = %id, "Acquisition loop has stopped; refusing connection");
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let hangup = outbound_rx.hangup();

    // Task to forward queued messages to the client
    let mut writer = tokio::spawn(async move {
        let forward = async {
            while let Some(message) = outbound_rx.recv().await {
                // axum 0.7 text frames own a `String`; the JSON itself was
                // serialized once for every subscriber.
                if ws_tx.send(Message::Text(message.to_string())).await.is_err() {
                    // Client disconnected
                    return;
                }
            }
            // The bridge closed the stream
            let _ = ws_tx.send(Message::Close(None)).await;
        };
        tokio::select! {
            _ = hangup.cancelled() => {
                warn!(subscriber_id = %id, "Dropping connection that stopped reading");
            }
            _ = forward => {}
        }
    });

    // Task to handle messages from the client
    let commands = state.commands.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        let control = BridgeCommand::Control { id, message };
                        if commands.send_async(control).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(subscriber_id = %id, "Ignoring malformed client message: {}", e);
                    }
                },
                Message::Close(_) => break,
                other => debug!(subscriber_id = %id, "Ignoring non-text frame: {:?}", other),
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    // Both socket halves are dropped with their tasks, closing the connection.
    let _ = state
        .commands
        .send_async(BridgeCommand::Disconnect { id })
        .await;
    debug!(subscriber_id = %id, "Connection task finished");
}

/// Serves WebSocket clients on `listener` until `shutdown` is cancelled.
///
/// After the listener stops, waits up to [`SHUTDOWN_GRACE`] for open
/// connections to finish. They finish once the acquisition loop closes their
/// streams.
pub async fn run(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let connections = state.connections.clone();
    let app = create_router(state);
    info!("listening on ws://{}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    connections.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, connections.wait())
        .await
        .is_err()
    {
        warn!(
            open = connections.len(),
            "Connections still open after shutdown grace period"
        );
    }
    Ok(())
}
