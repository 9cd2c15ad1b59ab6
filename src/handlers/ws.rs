use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::services::PaymentStatusUpdate;
use crate::AppState;

const HEARTBEAT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Only stream updates for this funding account.
    account_id: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let updates = state.orchestrator.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, updates, params.account_id))
}

fn wanted(update: &PaymentStatusUpdate, account_id: Option<&str>) -> bool {
    account_id.map_or(true, |account| update.account_id == account)
}

async fn handle_socket(
    socket: WebSocket,
    mut rx: broadcast::Receiver<PaymentStatusUpdate>,
    account_id: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    tracing::debug!("Received text message: {}", text);
                }
                Message::Close(_) => {
                    tracing::info!("Client closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat_interval =
            tokio::time::interval(tokio::time::Duration::from_secs(HEARTBEAT_SECS));

        loop {
            tokio::select! {
                _ = heartbeat_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        tracing::info!("Client disconnected during heartbeat");
                        break;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(update) => {
                            if !wanted(&update, account_id.as_deref()) {
                                continue;
                            }
                            let json = match serde_json::to_string(&update) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!("Failed to serialize update: {}", e);
                                    continue;
                                }
                            };

                            if sender.send(Message::Text(json)).await.is_err() {
                                tracing::info!("Client disconnected");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Client lagged behind by {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Status channel closed");
                            break;
                        }
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    tracing::info!("WebSocket connection closed");
}
