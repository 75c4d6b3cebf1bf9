//! WebSocket handler driving one session per connection.
//!
//! The identity is resolved before the upgrade, so a connection without a
//! usable identity is refused with 400 and never reaches dispatch. After the
//! upgrade, frames are read and answered strictly one at a time. Backend
//! calls can block, so each frame is dispatched on the blocking pool with
//! the session moved in and handed back. When the connection ends the
//! backend is released so the provider can start its idle clock.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rebot_core::codec::{self, Outbound};
use rebot_core::{ConnectInfo, SessionId, SessionProtocol};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::state::{HttpConfig, SharedState};

/// Path parameters for `/ws/rebot/{room_name}`.
#[derive(Deserialize)]
pub struct RoomPath {
    room_name: String,
}

/// Path parameters for `/ws/rebot/{room_name}/{user_id}`.
#[derive(Deserialize)]
pub struct UserPath {
    room_name: String,
    user_id: String,
}

/// Handler for GET /ws/rebot/{room_name}
pub async fn room_handler(
    State(state): State<Arc<SharedState>>,
    Path(path): Path<RoomPath>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let info = ConnectInfo {
        user_id: None,
        authenticated_user: authenticated_user(&headers, &state.config),
        room_name: Some(path.room_name),
    };
    connect(ws, state, info)
}

/// Handler for GET /ws/rebot/{room_name}/{user_id}
pub async fn user_handler(
    State(state): State<Arc<SharedState>>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let info = ConnectInfo {
        user_id: Some(path.user_id),
        authenticated_user: authenticated_user(&headers, &state.config),
        room_name: Some(path.room_name),
    };
    connect(ws, state, info)
}

/// Read the trusted authentication header, if configured and present.
fn authenticated_user(headers: &HeaderMap, config: &HttpConfig) -> Option<String> {
    let name = config.auth_header.as_deref()?;
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn connect(ws: WebSocketUpgrade, state: Arc<SharedState>, info: ConnectInfo) -> Response {
    let (identity, source) = match SessionId::resolve(&info, &state.config.identity_policy) {
        Ok(resolved) => resolved,
        Err(e) => {
            log::warn!("Refusing WebSocket connection: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    log::debug!("Upgrading WebSocket for {} (identity from {})", identity, source);
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

type FrameSender = SplitSink<WebSocket, Message>;

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<SharedState>, identity: SessionId) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    log::info!("[{}] WebSocket connected for {}", connection_id, identity);

    let backends = Arc::clone(&state.backends);
    let session_identity = identity.clone();
    let opened = tokio::task::spawn_blocking(move || {
        SessionProtocol::open(session_identity, backends.as_ref())
    })
    .await;

    let (mut session, greeting) = match opened {
        Ok(Ok(opened)) => opened,
        Ok(Err(e)) => {
            log::error!("[{}] Failed to open session: {}", connection_id, e);
            send_close(&mut sender, "session unavailable").await;
            return;
        }
        Err(e) => {
            log::error!("[{}] Session open task failed: {}", connection_id, e);
            send_close(&mut sender, "session unavailable").await;
            return;
        }
    };

    if let Some(frame) = greeting {
        if !send_frame(&mut sender, &frame).await {
            session.close(None);
            state.backends.release(&identity);
            return;
        }
    }

    let mut peer_close_code = None;

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("[{}] WebSocket receive error: {}", connection_id, e);
                break;
            }
        };

        match msg {
            Message::Text(_) | Message::Binary(_) => {}
            Message::Close(frame) => {
                peer_close_code = frame.map(|f| f.code);
                break;
            }
            // Pings are answered by axum
            Message::Ping(_) | Message::Pong(_) => continue,
        }

        let dispatched = tokio::task::spawn_blocking(move || {
            let outbound = match &msg {
                Message::Text(text) => session.handle_frame(text.as_str()),
                Message::Binary(bytes) => session.handle_bytes(bytes),
                _ => None,
            };
            (session, outbound)
        })
        .await;

        let outbound = match dispatched {
            Ok((returned, outbound)) => {
                session = returned;
                outbound
            }
            Err(e) => {
                // Panics are caught by the session, so only cancellation lands here
                log::error!("[{}] Session task failed: {}", connection_id, e);
                send_close(&mut sender, "session failed").await;
                state.backends.release(&identity);
                return;
            }
        };

        if let Some(frame) = outbound {
            if !send_frame(&mut sender, &frame).await {
                log::debug!("[{}] Client gone, discarding {} frame", connection_id, frame.kind());
                break;
            }
        }
    }

    session.close(peer_close_code);
    state.backends.release(&identity);
    log::info!("[{}] WebSocket connection closed", connection_id);
}

async fn send_close(sender: &mut FrameSender, reason: &'static str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code::ERROR,
            reason: reason.into(),
        })))
        .await;
}

/// Encode and send a frame. Returns false once the socket is unusable.
async fn send_frame(sender: &mut FrameSender, frame: &Outbound) -> bool {
    let json = match codec::encode(frame) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Dropping outbound {} frame: {}", frame.kind(), e);
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

// ============================================================================
// TESTS
// ============================================================================
