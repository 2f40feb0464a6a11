//! WebSocket session loop for one connected client, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use relay_core::RelayError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::metrics::RELAY_MALFORMED_TOTAL;
use crate::relay::{DisconnectReason, Relay};
use crate::shutdown::SHUTDOWN_CLOSE_REASON;

use super::connection::ClientConnection;

/// Server-initiated liveness probing.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    /// Interval between Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the client is dropped.
    pub pong_timeout: Duration,
}

/// Drive one joined connection until it closes.
///
/// 1. Spawns a writer that drains the outbound queue and sends periodic Ping frames
/// 2. Hands every inbound text (or UTF-8 binary) frame to [`Relay::handle_text`], one at a time
/// 3. On shutdown, sends close code 1000 and returns
///
/// The caller owns cleanup: it must call [`Relay::leave`] with the returned reason.
#[instrument(skip_all, fields(client_id = connection.id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection: Arc<ClientConnection>,
    outbound: mpsc::Receiver<Arc<String>>,
    relay: Arc<Relay>,
    heartbeat: Heartbeat,
    shutdown: CancellationToken,
) -> DisconnectReason {
    let (ws_tx, mut ws_rx) = ws.split();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        outbound,
        Arc::clone(&connection),
        heartbeat,
        shutdown,
    ));

    let reason = loop {
        tokio::select! {
            exit = &mut writer => {
                break exit.unwrap_or_else(|e| {
                    warn!(error = %e, "writer task failed");
                    DisconnectReason::WriteFailed
                });
            }
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        let err = RelayError::Transport(e.to_string());
                        debug!(error = %err, "socket read failed");
                        break DisconnectReason::Transport;
                    }
                    None => break DisconnectReason::StreamEnded,
                };
                connection.mark_alive();

                let text = match msg {
                    Message::Text(ref t) => t.as_str(),
                    Message::Binary(ref data) => match std::str::from_utf8(data) {
                        Ok(s) => s,
                        Err(e) => {
                            counter!(RELAY_MALFORMED_TOTAL).increment(1);
                            let err = RelayError::MalformedPayload(e.to_string());
                            warn!(len = data.len(), error = %err, "dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break DisconnectReason::ClientClosed;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                let _ = relay.handle_text(&connection, text);
            }
        }
    };

    if !writer.is_finished() {
        writer.abort();
    }
    reason
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    heartbeat: Heartbeat,
    shutdown: CancellationToken,
) -> DisconnectReason {
    let mut ping_interval = tokio::time::interval(heartbeat.ping_interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: Utf8Bytes::from_static(SHUTDOWN_CLOSE_REASON),
                }));
                if let Err(e) = ws_tx.send(close).await {
                    debug!(error = %e, "failed to send shutdown close frame");
                }
                return DisconnectReason::Shutdown;
            }
            msg = outbound.recv() => {
                let Some(text) = msg else {
                    return DisconnectReason::StreamEnded;
                };
                if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                    return DisconnectReason::WriteFailed;
                }
            }
            _ = ping_interval.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > heartbeat.pong_timeout {
                    warn!(timeout = ?heartbeat.pong_timeout, "client unresponsive, disconnecting");
                    return DisconnectReason::HeartbeatTimeout;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return DisconnectReason::WriteFailed;
                }
            }
        }
    }
}
