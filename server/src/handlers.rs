//! WebSocket connection lifecycle (§4.6): upgrade, handshake, message
//! dispatch, and teardown.
//!
//! Structured the way the teacher's `ws_handler`/`handle_connection`/
//! `handle_message` split the work, generalized from the teacher's
//! implicit "registered or not" check into the explicit
//! [`crate::session::SessionState`] machine and the frame/rate limits
//! §4.6 adds.

use crate::external::UserRecord;
use crate::outbound::{to_ws_message, OutboundFrame};
use crate::pending::PublicResponse;
use crate::registry::RegistryError;
use crate::session::{ControlSession, SessionState, REGISTRATION_TIMEOUT};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tunnel_protocol::{codec, ControlMessage};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, addr.ip().to_string()))
}

async fn handle_connection(socket: WebSocket, state: AppState, ip: String) {
    info!("control connection opened: {}", ip);

    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let ws_sink = Arc::new(tokio::sync::Mutex::new(ws_sink));
    let outbound_sink = ws_sink.clone();
    let outbound_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let is_close = matches!(frame, OutboundFrame::Close(_));
            let Some(ws_msg) = to_ws_message(&frame) else {
                error!("failed to encode outbound frame");
                continue;
            };
            let mut sink = outbound_sink.lock().await;
            if sink.send(ws_msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
    });

    let mut session = ControlSession::new(ip.clone());
    // Fixed deadline from connection-open, not a timer restarted on every
    // loop iteration — a steady trickle of WS-level pings must not extend
    // the registration window indefinitely.
    let registration_deadline = tokio::time::Instant::now() + REGISTRATION_TIMEOUT;

    loop {
        let frame = if session.state == SessionState::Handshaking {
            match tokio::time::timeout_at(registration_deadline, ws_stream.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(_))) | Ok(None) => break,
                Err(_) => {
                    warn!("registration timed out: {}", ip);
                    let _ = tx.send(OutboundFrame::close(1008, "registration timeout"));
                    break;
                }
            }
        } else {
            match ws_stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(_)) | None => break,
            }
        };

        match frame {
            Message::Text(text) => {
                if text.len() > codec::MAX_FRAME_SIZE {
                    let _ = tx.send(OutboundFrame::close(1009, "message too large"));
                    break;
                }
                if !session.record_message() {
                    let _ = tx.send(OutboundFrame::close(1008, "rate limit exceeded"));
                    break;
                }
                match codec::decode(&text) {
                    Ok(msg) => {
                        if !dispatch(&state, &mut session, &tx, msg).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("malformed control message from {}: {}", ip, e);
                    }
                }
            }
            Message::Ping(data) => {
                let _ = tx.send(OutboundFrame::Pong(data.to_vec()));
            }
            Message::Pong(_) => {
                if let Some(sub) = &session.subdomain {
                    state.registry.set_alive(sub, true);
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) => {}
        }
    }

    outbound_task.abort();
    teardown(&state, &session).await;
    info!("control connection closed: {}", session.ip);
}

/// Handles one decoded message under the current state. Returns `false`
/// when the connection should be torn down.
async fn dispatch(
    state: &AppState,
    session: &mut ControlSession,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
    msg: ControlMessage,
) -> bool {
    match (session.state, msg) {
        (SessionState::Handshaking, ControlMessage::Register { subdomain, api_key }) => {
            handle_register(state, session, tx, subdomain, api_key).await
        }
        (SessionState::Handshaking, ControlMessage::Unknown) => true,
        (SessionState::Handshaking, _) => {
            let _ = tx.send(OutboundFrame::close(1008, "expected register"));
            false
        }
        (SessionState::Active, ControlMessage::Response { request_id, status_code, headers, body }) => {
            let bytes = body
                .map(|s| s.into_bytes())
                .unwrap_or_default();
            state.pending.resolve(
                &request_id,
                PublicResponse::from_wire(status_code, headers, bytes),
            );
            if let Some(sub) = &session.subdomain {
                state.registry.touch(sub);
            }
            true
        }
        (SessionState::Active, ControlMessage::Unknown) => true,
        (SessionState::Active, other) => {
            warn!("unexpected message in active state, ignoring: {}", other.kind());
            true
        }
        (SessionState::Closed, _) => false,
    }
}

async fn handle_register(
    state: &AppState,
    session: &mut ControlSession,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
    requested: Option<String>,
    api_key: Option<String>,
) -> bool {
    let subdomain = requested.unwrap_or_else(tunnel_protocol::subdomain::generate);

    if !tunnel_protocol::subdomain::validate(&subdomain) {
        let _ = tx.send(ControlMessage::Error { message: format!("Invalid subdomain: {subdomain}") }.into());
        let _ = tx.send(OutboundFrame::close(1008, "invalid subdomain"));
        return false;
    }

    match state
        .registry
        .register(&subdomain, tx.clone(), api_key.as_deref(), &session.ip)
        .await
    {
        Ok(()) => {
            let user_id = match &api_key {
                Some(key) => state.users.lookup(key).await.map(|u: UserRecord| u.user_id),
                None => None,
            };
            session.activate(subdomain.clone(), user_id.clone());
            let url = state.config.tunnel_url(&subdomain);
            let _ = tx.send(
                ControlMessage::Registered {
                    subdomain: subdomain.clone(),
                    url,
                }
                .into(),
            );
            state
                .events
                .tunnel_opened(&subdomain, user_id.as_deref(), &session.ip)
                .await;
            true
        }
        Err(err) => {
            let message = match err {
                RegistryError::SubdomainTaken => "Subdomain already taken".to_string(),
                RegistryError::InvalidApiKey => "Invalid API key".to_string(),
                RegistryError::TunnelLimitReached => "Tunnel limit reached".to_string(),
            };
            let _ = tx.send(ControlMessage::Error { message }.into());
            let _ = tx.send(OutboundFrame::close(1008, "registration failed"));
            false
        }
    }
}

async fn teardown(state: &AppState, session: &ControlSession) {
    if let Some(subdomain) = &session.subdomain {
        if state.registry.unregister(subdomain).is_some() {
            state.events.tunnel_closed(subdomain).await;
        }
        // Any pending requests bound to this tunnel cannot be distinguished
        // from ones for a same-named tunnel that reconnects instantly, but
        // since the subdomain is now unregistered no new ones will be
        // added against it; in-flight ones still resolve via their own
        // 30s timer (§8 property 3).
    }
}
