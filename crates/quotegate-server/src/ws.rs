//! WebSocket admission.
//!
//! The daily quota is checked once, when the connection is accepted. A
//! refused client is upgraded and immediately closed with code 1008 (policy
//! violation); an admitted client receives a `connected` message carrying its
//! quota and is then held open for the channel feed.

use axum::{
    extract::{
        Path, State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use quotegate_core::{Admission, RateLimitMeta};

use crate::middleware::ClientIdentity;
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Connected {
        channel: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        rate_limit: Option<&'a RateLimitMeta>,
    },
    Pong,
}

#[instrument(skip_all, fields(channel = %channel, client = %identity.key))]
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    identity: ClientIdentity,
    ws: WebSocketUpgrade,
) -> Response {
    let admission = state
        .config
        .rate_limit
        .enabled
        .then(|| state.limiter.admit(&identity.key, identity.is_admin));

    if let Some(Admission { allowed: false, .. }) = &admission {
        info!("websocket refused, rate limit exceeded");
    }

    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, channel, admission).await {
            debug!(error = %e, "websocket closed with error");
        }
    })
}

async fn handle_socket(
    socket: WebSocket,
    channel: String,
    admission: Option<Admission>,
) -> Result<(), axum::Error> {
    let (mut sink, mut stream) = socket.split();

    if let Some(Admission { allowed: false, .. }) = admission {
        sink.send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: Utf8Bytes::from_static("Daily request limit exceeded"),
        })))
        .await?;
        return Ok(());
    }

    let connected = ServerMessage::Connected {
        channel: &channel,
        rate_limit: admission.as_ref().map(|a| &a.meta),
    };
    sink.send(text(&connected)).await?;
    info!("websocket connected");

    // Channel fan-out is served elsewhere; keep the connection alive and
    // answer application-level pings until the client leaves.
    while let Some(msg) = stream.next().await {
        match msg? {
            Message::Text(body) if body.as_str().trim() == "ping" => {
                sink.send(text(&ServerMessage::Pong)).await?;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    debug!("websocket disconnected");
    Ok(())
}

fn text(msg: &ServerMessage<'_>) -> Message {
    match serde_json::to_string(msg) {
        Ok(body) => Message::Text(body.into()),
        Err(e) => {
            warn!(error = %e, "failed to encode websocket message");
            Message::Text(Utf8Bytes::from_static("{}"))
        }
    }
}
