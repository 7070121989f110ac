use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::engine::dispatch::Session;
use crate::models::event::ServerEvent;
use crate::state::AppState;
use crate::store::connections::ConnectionHandle;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = futures::StreamExt::split(socket);
    let (handle, outbound_rx) = ConnectionHandle::channel(state.outbound_buffer_size);
    let connection_id = handle.id();

    // Targeted events and location snapshots share the one socket writer. Snapshots
    // missed by a lagging client are skipped.
    let snapshots = BroadcastStream::new(state.dispatch.locations().subscribe())
        .filter_map(|result| result.ok().map(ServerEvent::Locations));
    let mut outbound = ReceiverStream::new(outbound_rx).merge(snapshots);

    info!(connection_id = %connection_id, "websocket client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, event = event.name(), "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut session = Session::new(handle.clone());
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => recv_state.dispatch.handle_frame(&mut session, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let removed = state.dispatch.disconnect(&handle);
    info!(connection_id = %connection_id, participants = ?removed, "websocket client disconnected");
}
