//! WebSocket transport for the session gateway.
//!
//! The credential is checked before the upgrade, so a bad one gets a plain
//! 401 and never becomes a session. After the upgrade one task writes the
//! session's outbound queue to the socket while the connection's own task
//! feeds inbound frames to the gateway one at a time.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error};

use lexbridge_shared::identity::Identity;
use lexbridge_shared::protocol::ServerEvent;

use crate::api::AppState;
use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::identity::credential_from;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let credential = credential_from(&headers, params.token.as_deref())
        .ok_or_else(|| ApiError::Unauthenticated("missing credential".into()))?;
    let identity = state.gateway.authenticate(&credential)?;

    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| run_session(gateway, identity, socket)))
}

async fn run_session(gateway: Gateway, identity: Identity, socket: WebSocket) {
    let (session, mut outbound) = gateway.register(identity).await;
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!(session = %session, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => gateway.handle_frame(session, text.as_str()).await,
            Ok(Message::Binary(_)) => {
                gateway
                    .push(
                        session,
                        ServerEvent::error("invalid_event", "binary frames are not supported"),
                    )
                    .await;
            }
            Ok(Message::Close(_)) => break,
            // Ping/pong is answered by axum.
            Ok(_) => {}
            Err(e) => {
                debug!(session = %session, error = %e, "Socket read failed");
                break;
            }
        }
    }

    gateway.disconnect(session).await;
    writer.abort();
}
