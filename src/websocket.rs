//! WebSocket front door for the lobby channel.
//!
//! Each accepted connection gets a reader (this task) and a writer task fed
//! by an mpsc queue; every seat held by the connection shares the same
//! queue, so frames on the wire are never interleaved. Replies to a request
//! are queued before the next request is read.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::protocol::{LobbyReply, LobbyRequest};
use crate::room::ClientHandle;
use crate::server::GameServer;

/// Per-connection writer queue depth; room fanouts block briefly when a
/// client stops draining.
const WRITE_QUEUE: usize = 64;

/// Lobby router: WebSocket upgrades on the root path.
pub fn create_router() -> Router<Arc<GameServer>> {
    Router::new()
        .route("/", any(websocket_handler))
        .layer(TraceLayer::new_for_http())
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(server): State<Arc<GameServer>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, server, addr))
}

async fn handle_socket(socket: WebSocket, server: Arc<GameServer>, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<LobbyReply>(WRITE_QUEUE);
    let conn = ClientHandle::new(tx);
    let conn_id = conn.id;
    tracing::info!(%conn_id, client_addr = %addr, "lobby connection established");

    let writer = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            let json = match serde_json::to_string(&reply) {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!(%conn_id, error = %err, "failed to serialize lobby reply");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let remote_ip = addr.ip().to_string();
    let mut authenticated = false;

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(%conn_id, error = %err, "lobby read failed");
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<LobbyRequest>(&text) {
                Ok(request) => {
                    server
                        .handle_request(&conn, &remote_ip, &mut authenticated, request)
                        .await;
                }
                Err(err) => {
                    tracing::warn!(%conn_id, error = %err, "unrecognised lobby frame");
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames have no meaning here.
            _ => {}
        }
    }

    server.handle_disconnect(conn_id).await;
    drop(conn);
    let _ = writer.await;
    tracing::info!(%conn_id, "lobby connection closed");
}
