use std::sync::Arc;

use domain::{ConnectionId, UserSummary};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::auth::{AuthError, Authenticator, Credential};
use crate::broadcaster::LocalMessageBroadcaster;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::events::{OutboundFrame, ServerEvent};
use crate::rooms::{Channel, RoomRegistry};
use crate::session::{Session, SessionRegistry};

/// 握手通过后交给连接任务的句柄
#[derive(Debug)]
pub struct Admission {
    pub session: Session,
    pub outbox: mpsc::Receiver<OutboundFrame>,
}

/// 连接入口：握手认证、会话登记、断开清理
pub struct ConnectionGateway {
    authenticator: Arc<dyn Authenticator>,
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomRegistry>,
    broadcaster: Arc<LocalMessageBroadcaster>,
    clock: Arc<dyn Clock>,
}

impl ConnectionGateway {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        sessions: Arc<SessionRegistry>,
        broadcaster: Arc<LocalMessageBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            authenticator,
            rooms: broadcaster.rooms().clone(),
            sessions,
            broadcaster,
            clock,
        }
    }

    /// 认证握手并建立会话。
    ///
    /// 成功后连接已加入自己的个人房间，发送队列中第一帧是 `connected`。
    /// 失败时不会登记任何状态，调用方应发送终止性的 `error` 帧并关闭连接。
    pub async fn admit(&self, credential: Option<Credential>) -> Result<Admission, ApplicationError> {
        let credential = credential.ok_or(AuthError::MissingCredential)?;
        let user = self
            .authenticator
            .authenticate(&credential)
            .await
            .inspect_err(|err| warn!(credential = credential.kind(), error = %err, "握手认证失败"))?;

        Ok(self.open_session(user).await)
    }

    async fn open_session(&self, user: UserSummary) -> Admission {
        let session = Session::new(ConnectionId::new(), user, self.clock.now());
        let connection_id = session.connection_id;

        let outbox = self.broadcaster.attach(connection_id).await;
        self.sessions.register(session.clone()).await;
        self.rooms
            .join(Channel::User(session.user_id().clone()), connection_id)
            .await;

        self.broadcaster
            .send_to_connection(
                connection_id,
                &ServerEvent::Connected {
                    message: format!("Welcome {}!", session.user.username),
                },
            )
            .await;

        info!(
            %connection_id,
            user_id = %session.user_id(),
            "WebSocket 连接已建立"
        );

        Admission { session, outbox }
    }

    /// 释放连接的全部通道与会话。可重复调用，第二次起不做任何事。
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<Session> {
        let released = self.rooms.remove_connection(connection_id).await;
        self.broadcaster.detach(connection_id).await;
        let session = self.sessions.unregister(connection_id).await?;
        let remaining = self.sessions.connections_of(session.user_id()).await.len();

        info!(
            %connection_id,
            user_id = %session.user_id(),
            channels = released.len(),
            remaining_connections = remaining,
            "WebSocket 连接已断开"
        );
        if !self.sessions.is_online(session.user_id()).await {
            info!(user_id = %session.user_id(), "用户已离线");
        }
        Some(session)
    }

    /// 中止连接上仍在运行的任务并等待其真正退出，然后断开。
    ///
    /// `abort` 只在任务下一次让出时生效；不等待的话，进行中的 `joinConversation`
    /// 可能在清理之后才写入房间表。
    pub async fn release(
        &self,
        connection_id: ConnectionId,
        pending: JoinHandle<()>,
    ) -> Option<Session> {
        pending.abort();
        if let Err(err) = pending.await {
            if !err.is_cancelled() {
                warn!(%connection_id, error = %err, "连接任务异常退出");
            }
        }
        self.disconnect(connection_id).await
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }
}
