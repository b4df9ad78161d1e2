use std::fmt::Display;
use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;

use super::{ConnectionState, Hub};
use crate::AppState;
use crate::error::AppError;
use crate::middleware::resolve_identity;
use crate::models::CallerIdentity;

// WebSocket 握手参数，浏览器无法自定义握手头，身份放在查询串里
#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
    device_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<Response, AppError> {
    let identity = resolve_identity(
        &state.config,
        params.token.as_deref(),
        params.device_id.as_deref(),
    )?;

    tracing::info!(
        user_id = %identity.user_id,
        authenticated = identity.is_authenticated,
        "WebSocket connection request"
    );

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub, identity)))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, identity: CallerIdentity) {
    let (sender, receiver) = socket.split();
    serve_connection(hub, identity, sender, receiver).await;
}

// 连接主循环，与具体传输解耦
async fn serve_connection<W, R, E>(
    hub: Arc<Hub>,
    identity: CallerIdentity,
    mut sender: W,
    mut receiver: R,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut state = ConnectionState::Connecting;
    let (id, mut outbound, mut evicted) = hub.connect(&identity).await;
    transition(&mut state, ConnectionState::Registered, &identity);

    // 写循环：发送队列关闭或写失败时退出
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                tracing::debug!(error = %e, "WebSocket write failed");
                break;
            }
        }
        let _ = sender.close().await;
    });

    // 读循环：按到达顺序逐条处理
    let mut writer_finished = false;
    let mut was_evicted = false;
    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    hub.handle_message(id, &identity, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(connection_id = %id, "Client closed connection");
                    break;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(connection_id = %id, len = data.len(), "Ignoring binary message");
                }
                // Ping/Pong 由 axum 处理
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %id, error = %e, "WebSocket receive error");
                    break;
                }
            },
            _ = &mut send_task => {
                writer_finished = true;
                break;
            }
            // 被注册表清理（慢连接），写循环可能卡在发送上
            _ = &mut evicted => {
                tracing::info!(connection_id = %id, user_id = %identity.user_id, "Connection evicted from registry");
                was_evicted = true;
                break;
            }
        }
    }

    // 先移除注册表条目（关闭发送队列），再结束写循环
    transition(&mut state, ConnectionState::Unregistering, &identity);
    hub.disconnect(id).await;
    if was_evicted {
        send_task.abort();
    }
    if !writer_finished {
        let _ = send_task.await;
    }
    transition(&mut state, ConnectionState::Closed, &identity);
}

fn transition(state: &mut ConnectionState, next: ConnectionState, identity: &CallerIdentity) {
    tracing::debug!(user_id = %identity.user_id, from = ?state, to = ?next, "Connection state changed");
    *state = next;
}
