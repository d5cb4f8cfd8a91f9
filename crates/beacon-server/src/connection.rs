use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use beacon_core::{ClientId, ClientRequest, HubError, ServerResponse};
use beacon_hub::Hub;

/// Drive one client connection: admit it, confirm the assigned identity, run
/// the writer/reader pair, and retire it when either side stops.
///
/// Retirement is idempotent, so this converging teardown may race freely with
/// a saturation-triggered retire from inside the hub.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (client_id, rx) = hub.admit();
    tracing::info!(client_id = %client_id, "websocket client connected");

    // The connect frame goes into the mailbox before anything else can.
    if send_response(&hub, &client_id, ServerResponse::connected(&client_id)).is_err() {
        hub.retire(&client_id);
        return;
    }

    let (ws_tx, ws_rx) = socket.split();

    let writer = tokio::spawn(write_outbound(ws_tx, rx));
    let reader_hub = Arc::clone(&hub);
    let reader_id = client_id.clone();
    let reader = tokio::spawn(read_inbound(ws_rx, reader_id, reader_hub));

    // Either side stopping means the connection is done.
    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    hub.retire(&client_id);
}

/// Writer half: drains the connection's mailbox onto the socket. On mailbox
/// close (retirement) it sends a close frame so the peer sees a clean
/// shutdown; on a write error it presumes the connection dead and stops.
async fn write_outbound(mut ws_tx: SplitSink<WebSocket, WsMessage>, mut rx: mpsc::Receiver<String>) {
    loop {
        match rx.recv().await {
            Some(frame) => {
                if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            None => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
}

/// Reader half: decodes inbound frames and dispatches them in arrival order.
/// A malformed frame is discarded, not fatal; transport failure or a close
/// frame ends the loop and retirement follows in `handle_socket`.
async fn read_inbound(mut ws_rx: SplitStream<WebSocket>, client_id: ClientId, hub: Arc<Hub>) {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => {
                let request: ClientRequest = match serde_json::from_str(text.as_str()) {
                    Ok(request) => request,
                    Err(err) => {
                        tracing::warn!(client_id = %client_id, error = %err, "discarding malformed frame");
                        continue;
                    }
                };
                if let Err(err) = dispatch(&hub, &client_id, &request) {
                    if err.is_fatal_for_connection() {
                        break;
                    }
                    tracing::warn!(
                        client_id = %client_id,
                        action = %request.action,
                        error_kind = err.error_kind(),
                        "request failed"
                    );
                }
            }
            WsMessage::Close(_) => break,
            // axum answers pings itself; pongs and binary frames carry nothing for us
            _ => {}
        }
    }
}

/// Apply one decoded request. Runs synchronously in the reader task so a
/// connection's subscribe/unsubscribe/ping sequence is never reordered.
fn dispatch(hub: &Hub, client_id: &ClientId, request: &ClientRequest) -> Result<(), HubError> {
    match request.action.as_str() {
        "subscribe" => {
            hub.subscribe(client_id, &request.channel)?;
            send_response(
                hub,
                client_id,
                ServerResponse::ack(client_id, "subscribe", &request.channel),
            )
        }
        "unsubscribe" => {
            hub.unsubscribe(client_id, &request.channel)?;
            send_response(
                hub,
                client_id,
                ServerResponse::ack(client_id, "unsubscribe", &request.channel),
            )
        }
        "ping" => send_response(hub, client_id, ServerResponse::pong(client_id)),
        other => {
            tracing::warn!(client_id = %client_id, action = %other, "unrecognized action");
            Ok(())
        }
    }
}

fn send_response(hub: &Hub, client_id: &ClientId, response: ServerResponse) -> Result<(), HubError> {
    match serde_json::to_string(&response) {
        Ok(frame) => hub.send_to(client_id, frame),
        Err(err) => {
            tracing::error!(client_id = %client_id, error = %err, "failed to serialize response");
            Ok(())
        }
    }
}
