//! Realtime gateway transport: WebSocket upgrade and per-connection actor

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::models::{ClientEvent, ServerEvent, User};
use crate::presence::{ConnectionHandle, Outbound};
use crate::state::AppState;

/// Server ping period
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A ping left unanswered this long closes the connection
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;
const CLOSE_BANNED: u16 = 4003;
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_INTERNAL: u16 = 1011;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// GET /ws?token=JWT
///
/// Failed authentication still upgrades, then closes with a code the client
/// can act on.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let rejection = match state.jwt.decode(&params.token) {
        Ok(claims) => match state.gateway.authenticate(claims.sub).await {
            Ok(user) => {
                info!(user_id = %user.id, "WebSocket connection authenticated");
                return ws.on_upgrade(move |socket| run_connection(socket, state, user));
            }
            Err(ApiError::Forbidden(_)) => (CLOSE_BANNED, "Account banned"),
            Err(ApiError::Unauthorized) => (CLOSE_TOKEN_INVALID, "Unknown user"),
            Err(err) => {
                error!(error = %err, "User lookup failed during handshake");
                (CLOSE_INTERNAL, "Internal error")
            }
        },
        Err(err) => match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                (CLOSE_TOKEN_EXPIRED, "Token expired")
            }
            _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
        },
    };

    let (code, reason) = rejection;
    warn!(close_code = code, reason = reason, "WebSocket auth failed");

    ws.on_upgrade(move |mut socket| async move {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    })
}

/// Actor for one authenticated connection.
///
/// A writer task owns the sink and drains the connection's outbound queue;
/// the reader loop dispatches inbound events one at a time.
pub async fn run_connection(socket: WebSocket, state: AppState, user: User) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (handle, rx) = ConnectionHandle::channel();
    let gateway = state.gateway.clone();

    gateway.connect(&user, handle.clone()).await;

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_handle = {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut ping_timer = interval(PING_INTERVAL);
            // First tick fires immediately
            ping_timer.tick().await;

            loop {
                ping_timer.tick().await;
                if !handle.heartbeat() {
                    break;
                }

                match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                    Ok(Some(())) => {}
                    _ => {
                        warn!("Pong timeout, closing connection");
                        handle.close(CLOSE_GOING_AWAY, "Pong timeout");
                        break;
                    }
                }
            }
        })
    };

    loop {
        tokio::select! {
            _ = &mut writer_handle => {
                debug!(user_id = %user.id, "Writer finished");
                break;
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => gateway.handle_event(&user, &handle, event).await,
                    Err(e) => {
                        debug!(user_id = %user.id, error = %e, "Undecodable event");
                        handle.send(ServerEvent::error("Invalid event payload"));
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    handle.send(ServerEvent::error("Binary frames are not supported"));
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    info!(user_id = %user.id, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    warn!(user_id = %user.id, error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    info!(user_id = %user.id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    ping_handle.abort();
    writer_handle.abort();

    gateway.disconnect(user.id, handle.id()).await;
    info!(user_id = %user.id, connection_id = %handle.id(), "WebSocket actor stopped");
}

/// Serialise queued frames onto the socket until the queue closes or a close is sent
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        let (message, last) = match outbound {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(text) => (Message::Text(text), false),
                Err(e) => {
                    error!(error = %e, "Failed to encode server event");
                    continue;
                }
            },
            Outbound::Heartbeat => (Message::Ping(Vec::new()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if ws_sender.send(message).await.is_err() || last {
            break;
        }
    }
}
