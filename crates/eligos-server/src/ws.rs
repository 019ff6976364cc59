//! WebSocket entry point: authenticate, upgrade, hand the socket to the hub.

use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::future;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use eligos_core::UserId;
use eligos_hub::{Frame, HubHandle};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// `GET /api/ws?token=<jwt>`
///
/// The token is checked before the upgrade, so a bad token gets a plain
/// HTTP error instead of a socket that closes immediately.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        return ApiError::bad_request("missing token").into_response();
    };
    let user = match state.auth.verify(&token) {
        Ok(user) => user,
        Err(e) => return ApiError::from(e).into_response(),
    };
    match state.users.exists(&user) {
        Ok(true) => {}
        Ok(false) => return ApiError::Unauthorized(format!("unknown user {user}")).into_response(),
        Err(e) => return ApiError::from(e).into_response(),
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let max_frame = state.hub.config().max_frame_bytes;
    upgrade
        .max_message_size(max_frame)
        .on_upgrade(move |socket| attach(socket, user, state.hub))
}

async fn attach(socket: WebSocket, user: UserId, hub: HubHandle) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = stream.filter_map(|item| future::ready(from_message(item)));

    match hub.accept(user.clone(), sink, stream) {
        Ok(conn) => info!(user_id = %user, connection_id = %conn.id(), "websocket attached"),
        Err(e) => warn!(user_id = %user, error = %e, "websocket refused"),
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Ping => Message::Ping(Bytes::new()),
        Frame::Pong => Message::Pong(Bytes::new()),
        Frame::Close => Message::Close(None),
    }
}

/// Binary frames are accepted when they hold UTF-8 text.
fn from_message(item: Result<Message, axum::Error>) -> Option<Result<Frame, axum::Error>> {
    let frame = match item {
        Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Frame::Text(text),
            Err(_) => {
                debug!("dropping non-utf8 binary frame");
                return None;
            }
        },
        Ok(Message::Ping(_)) => Frame::Ping,
        Ok(Message::Pong(_)) => Frame::Pong,
        Ok(Message::Close(_)) => Frame::Close,
        Err(e) => return Some(Err(e)),
    };
    Some(Ok(frame))
}
