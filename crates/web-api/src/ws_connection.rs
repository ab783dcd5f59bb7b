use application::ConnectionHandle;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ClientRequest, ServerEvent, UserId};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::{broadcast::error::RecvError, mpsc};

use crate::state::AppState;

/// 发送任务的控制命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}

/// WebSocket 连接
///
/// 一条连接拆成两个任务：
/// - 发送任务：合并连接的出站事件、全局在线状态事件与控制帧，统一写入 socket
/// - 接收任务：解析客户端请求并按顺序交给 `RealtimeService`
///
/// 任一任务结束即视为连接断开，随后注销连接并退出所有房间。
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    user_id: UserId,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, user_id: UserId) -> Self {
        Self {
            socket,
            state,
            user_id,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            user_id,
        } = self;

        // 先订阅在线状态，保证能看到本连接引起的上线事件
        let mut presence_rx = state.realtime.subscribe_presence();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let handle = match state.realtime.connect(Some(user_id), event_tx).await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "连接注册失败");
                return;
            }
        };
        let (mut sink, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let connection_id = handle.id();
        let mut send_task = tokio::spawn(async move {
            loop {
                // 连接自身的事件优先，`connected` 总是第一帧
                let sent = tokio::select! {
                    biased;
                    event = event_rx.recv() => match event {
                        Some(event) => send_event(&mut sink, &event).await,
                        None => break,
                    },
                    presence = presence_rx.recv() => match presence {
                        Ok(event) => send_event(&mut sink, &event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                connection_id = %connection_id,
                                skipped,
                                "在线状态事件积压，已跳过部分事件"
                            );
                            true
                        }
                        Err(RecvError::Closed) => break,
                    },
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => sink.send(WsMessage::Pong(data)).await.is_ok(),
                    },
                };
                if !sent {
                    tracing::debug!(connection_id = %connection_id, "socket 写入失败");
                    break;
                }
            }
            tracing::debug!(connection_id = %connection_id, "WebSocket发送任务结束");
        });

        let mut recv_task = tokio::spawn({
            let state = state.clone();
            let handle = handle.clone();
            async move {
                while let Some(Ok(message)) = incoming.next().await {
                    if handle_incoming(&state, &handle, message, &cmd_tx)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                tracing::debug!(connection_id = %handle.id(), "WebSocket接收任务结束");
            }
        });

        // 等待任意一个任务完成（连接断开）
        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        state.realtime.disconnect(&handle).await;
    }
}

/// 处理来自客户端的帧。返回 `Err` 表示连接应当结束。
async fn handle_incoming(
    state: &AppState,
    handle: &ConnectionHandle,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match message {
        WsMessage::Text(text) => match serde_json::from_str::<ClientRequest>(text.as_str()) {
            // 错误事件已由服务发回给本连接
            Ok(request) => {
                let _ = state.realtime.handle(handle, request).await;
            }
            Err(err) => {
                tracing::warn!(
                    connection_id = %handle.id(),
                    error = %err,
                    "无法解析的客户端帧"
                );
                handle
                    .send(malformed(format!("invalid request frame: {err}")))
                    .map_err(|_| ())?;
            }
        },
        WsMessage::Binary(_) => {
            handle
                .send(malformed("binary frames are not supported".into()))
                .map_err(|_| ())?;
        }
        WsMessage::Ping(data) => {
            cmd_tx
                .send(WsCommand::SendPong(data))
                .await
                .map_err(|_| ())?;
        }
        WsMessage::Pong(_) => {}
        WsMessage::Close(_) => {
            tracing::debug!(connection_id = %handle.id(), "WebSocket收到关闭消息");
            return Err(());
        }
    }
    Ok(())
}

fn malformed(reason: String) -> ServerEvent {
    ServerEvent::Error {
        code: "MALFORMED_REQUEST".into(),
        reason,
        retryable: false,
        conversation_id: None,
    }
}

/// 序列化并写入 socket，返回写入是否成功
async fn send_event(sink: &mut SplitSink<WebSocket, WsMessage>, event: &ServerEvent) -> bool {
    let payload = match event.to_json() {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(event = event.kind(), error = %err, "事件序列化失败");
            return true;
        }
    };
    sink.send(WsMessage::Text(payload.into())).await.is_ok()
}
