//! WebSocket endpoint for live progress.
//!
//! Query parameters pick the initial subscription: `subscribe_all=true` or
//! `subscribe_download=<id>`; with neither the client receives everything.
//! Afterwards the client may send `subscribe`, `unsubscribe`,
//! `subscribe_all` and `ping` messages.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::AppState;
use crate::broadcast::{ClientMessage, ConnectionId, ProgressBroadcaster, ServerMessage};

#[derive(Debug, Default, Deserialize)]
pub(super) struct WsParams {
    #[serde(default)]
    subscribe_all: bool,
    subscribe_download: Option<u64>,
}

pub(super) async fn downloads_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let broadcaster = Arc::clone(state.service.broadcaster());
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster, params, shutdown))
}

async fn handle_socket(
    socket: WebSocket,
    broadcaster: Arc<ProgressBroadcaster>,
    params: WsParams,
    shutdown: CancellationToken,
) {
    let (id, mut outgoing) = broadcaster.connect();
    if !params.subscribe_all {
        if let Some(download_id) = params.subscribe_download {
            broadcaster.subscribe(&id, download_id);
        }
    }

    broadcaster.send_to(
        &id,
        ServerMessage::Connected {
            client_id: id.to_string(),
            message: "WebSocket connection established".to_string(),
        },
    );

    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            message = outgoing.recv() => {
                // None: the broadcaster dropped us.
                let Some(message) = message else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(client_id = %id, error = %err, "Failed to encode message");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_client_message(&broadcaster, &id, &text),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    broadcaster.disconnect(&id);
}

fn handle_client_message(broadcaster: &ProgressBroadcaster, id: &ConnectionId, text: &str) {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { download_id }) => {
            broadcaster.subscribe(id, download_id);
            ServerMessage::Subscribed { download_id }
        }
        Ok(ClientMessage::Unsubscribe { download_id }) => {
            broadcaster.unsubscribe(id, download_id);
            ServerMessage::Unsubscribed { download_id }
        }
        Ok(ClientMessage::SubscribeAll) => {
            broadcaster.subscribe_all(id);
            ServerMessage::SubscribedAll
        }
        Ok(ClientMessage::Ping) => ServerMessage::Pong,
        Err(err) => {
            debug!(client_id = %id, error = %err, "Ignoring malformed client message");
            ServerMessage::Error {
                message: format!("unrecognised message: {}", err),
            }
        }
    };
    broadcaster.send_to(id, reply);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_handling() {
        let broadcaster = ProgressBroadcaster::default();
        let (id, mut rx) = broadcaster.connect();

        handle_client_message(&broadcaster, &id, r#"{"type":"subscribe","download_id":5}"#);
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Subscribed { download_id: 5 });
        assert!(broadcaster.subscriptions(&id).unwrap().contains(&5));

        handle_client_message(&broadcaster, &id, r#"{"type":"ping"}"#);
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Pong);

        handle_client_message(&broadcaster, &id, "not json");
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));

        handle_client_message(&broadcaster, &id, r#"{"type":"subscribe_all"}"#);
        assert!(broadcaster.subscriptions(&id).unwrap().is_empty());
    }
}
