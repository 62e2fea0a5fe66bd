use application::{Admission, ApplicationError, OutboundFrame, Outcome, ServerEvent, Session};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// 握手被拒绝：发送终止性的 `error` 帧后关闭
pub async fn reject(mut socket: WebSocket, error: ApplicationError) {
    let reason = match &error {
        ApplicationError::Authentication(err) => err.to_string(),
        other => other.to_string(),
    };
    let event = ServerEvent::error(format!("Authentication error: {reason}"));

    match event.to_frame() {
        Ok(frame) => {
            if socket
                .send(WsMessage::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                tracing::debug!("握手拒绝帧发送失败，连接已关闭");
            }
        }
        Err(err) => tracing::warn!(error = %err, "握手拒绝帧序列化失败"),
    }
    let _ = socket.send(WsMessage::Close(None)).await;
}

/// 已通过握手的 WebSocket 连接
///
/// 写任务把发送队列中的帧写入 socket；读任务按到达顺序把文本帧交给事件路由器。
/// 任一任务结束即视为断开：另一个任务被中止并等待退出后，再通过网关释放全部通道。
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    session: Session,
    outbox: mpsc::Receiver<OutboundFrame>,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, admission: Admission) -> Self {
        Self {
            socket,
            state,
            session: admission.session,
            outbox: admission.outbox,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            session,
            mut outbox,
        } = self;
        let connection_id = session.connection_id;
        let (mut sender, mut incoming) = socket.split();

        // 控制帧与业务帧共用同一个 sender
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(8);

        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(cmd) = cmd_rx.recv() => {
                        match cmd {
                            WsCommand::Pong(data) => {
                                if sender.send(WsMessage::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    frame = outbox.recv() => {
                        let Some(frame) = frame else {
                            break;
                        };
                        if sender.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                            tracing::debug!(%connection_id, "写入 socket 失败");
                            break;
                        }
                    }
                }
            }
        });

        let recv_state = state.clone();
        let recv_session = session.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                match message {
                    WsMessage::Text(text) => {
                        recv_state
                            .router
                            .dispatch(&recv_session, text.as_str())
                            .await;
                    }
                    WsMessage::Binary(_) => {
                        recv_state
                            .router
                            .apply(
                                recv_session.connection_id,
                                vec![Outcome::Reply(ServerEvent::error(
                                    "Binary frames are not supported.",
                                ))],
                            )
                            .await;
                    }
                    WsMessage::Ping(data) => {
                        if cmd_tx.send(WsCommand::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Pong(_) => {}
                    WsMessage::Close(_) => {
                        tracing::debug!(connection_id = %recv_session.connection_id, "收到关闭帧");
                        break;
                    }
                }
            }
        });

        let send_finished = tokio::select! {
            _ = &mut send_task => true,
            _ = &mut recv_task => false,
        };
        let pending = if send_finished { recv_task } else { send_task };

        state.gateway.release(connection_id, pending).await;
    }
}

#[derive(Debug)]
enum WsCommand {
    Pong(Bytes),
}
