//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::tokens::SessionClaims;
use crate::error::ApiError;
use crate::AppState;

use super::connection::{ConnectionHandle, Outbound};
use super::events::{ClientMessage, ServerMessage, CLOSE_INVALID_REGISTRATION, MIN_TEMP_ID_LEN};

type WsSink = SplitSink<WebSocket, Message>;

/// Where a connection is in the login hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unregistered,
    Registered,
    Authenticated,
}

/// What the event loop does after handling one client frame.
enum Action {
    Continue,
    Reply(ServerMessage),
    /// Error frame plus close frame, then end.
    Reject { code: u16, reason: &'static str },
    /// End without a close frame.
    Drop,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WsParams {
    /// Session token for clients that already completed the login.
    pub token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// Upgrade to the realtime gateway.
#[utoipa::path(
    get,
    path = "/ws",
    params(WsParams),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 401, description = "Invalid session token", body = crate::error::ApiErrorBody),
    ),
    tag = "Gateway"
)]
pub async fn ws_upgrade(
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let claims = match params.token.as_deref() {
        Some(token) => match state.tokens.verify(token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                tracing::debug!(error = %err, "rejected gateway token");
                return Err(ApiError::unauthorized("Invalid or expired session token"));
            }
        },
        None => None,
    };

    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, claims)))
}

async fn handle_connection(socket: WebSocket, state: AppState, claims: Option<SessionClaims>) {
    let (handle, mut outbound_rx) = ConnectionHandle::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut phase = Phase::Unregistered;

    if let Some(claims) = claims {
        state
            .registry
            .register_authenticated(&claims.sub, handle.clone(), &claims.game_level);
        handle.send(ServerMessage::authorized(&claims.game_level));
        phase = Phase::Authenticated;
        tracing::info!(
            connection_id = %handle.id(),
            user_id = %claims.sub,
            "token connection authorized"
        );
    } else {
        tracing::debug!(connection_id = %handle.id(), "connection accepted");
    }

    loop {
        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                let action = match msg {
                    Some(Ok(Message::Text(text))) => {
                        on_text(&state, &handle, &mut phase, text.as_str())
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(connection_id = %handle.id(), "binary frame rejected");
                        Action::Drop
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %handle.id(), "ws read error");
                        break;
                    }
                };

                match action {
                    Action::Continue => {}
                    Action::Reply(reply) => {
                        if send_message(&mut ws_tx, &reply).await.is_err() {
                            break;
                        }
                    }
                    Action::Reject { code, reason } => {
                        let _ = send_message(&mut ws_tx, &ServerMessage::error(code, reason)).await;
                        let _ = send_close(&mut ws_tx, code, reason).await;
                        break;
                    }
                    Action::Drop => break,
                }
            }

            // Command queued by the registry, the callback, or the sweep.
            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(Outbound::Frame(frame)) => {
                        if matches!(frame, ServerMessage::AuthData { .. }) {
                            phase = Phase::Authenticated;
                        }
                        if send_message(&mut ws_tx, &frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        tracing::debug!(
                            connection_id = %handle.id(),
                            code,
                            %reason,
                            "closing connection"
                        );
                        let _ = send_close(&mut ws_tx, code, &reason).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.registry.remove_by_handle(handle.id());
    tracing::debug!(connection_id = %handle.id(), ?phase, "connection ended");
}

fn on_text(state: &AppState, handle: &ConnectionHandle, phase: &mut Phase, text: &str) -> Action {
    let msg = match ClientMessage::parse(text) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::debug!(connection_id = %handle.id(), error = %err, "dropping connection");
            return Action::Drop;
        }
    };

    match msg {
        ClientMessage::Ping => Action::Reply(ServerMessage::Pong),
        ClientMessage::Register { .. } if *phase == Phase::Authenticated => {
            tracing::warn!(
                connection_id = %handle.id(),
                "register from authenticated connection ignored"
            );
            Action::Continue
        }
        ClientMessage::Register { temp_id } => match temp_id {
            Some(temp_id) if temp_id.chars().count() >= MIN_TEMP_ID_LEN => {
                if state.registry.register(&temp_id, handle.clone()) {
                    *phase = Phase::Registered;
                } else {
                    // Re-keyed by a login whose auth_data is still queued.
                    tracing::warn!(
                        connection_id = %handle.id(),
                        "register from authenticated connection ignored"
                    );
                    *phase = Phase::Authenticated;
                }
                Action::Continue
            }
            _ => Action::Reject {
                code: CLOSE_INVALID_REGISTRATION,
                reason: "Invalid temp_id",
            },
        },
        ClientMessage::Unknown(kind) if *phase == Phase::Unregistered => {
            tracing::debug!(
                connection_id = %handle.id(),
                %kind,
                "unknown frame before registration"
            );
            Action::Drop
        }
        ClientMessage::Unknown(kind) => {
            tracing::warn!(connection_id = %handle.id(), %kind, "unknown frame ignored");
            Action::Continue
        }
    }
}

async fn send_message(ws_tx: &mut WsSink, msg: &ServerMessage) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize server frame");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
