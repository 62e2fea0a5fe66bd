use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ConnectionId, ConversationId, UserId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::events::{OutboundFrame, ServerEvent};
use crate::rooms::{Channel, RoomRegistry};

/// 写路径（REST 发送消息、反应、建会话）使用的推送接口
#[async_trait]
pub trait MessageBroadcaster: Send + Sync {
    /// 推送给会话房间内的所有连接，返回成功入队的连接数
    async fn broadcast_to_room(&self, conversation_id: &ConversationId, event: &ServerEvent)
        -> usize;

    /// 推送给某个用户的所有连接（个人房间）
    async fn broadcast_to_user(&self, user_id: &UserId, event: &ServerEvent) -> usize;
}

/// 进程内广播桥：通道成员 -> 连接的有界发送队列
///
/// 投递是尽力而为的：队列已满或已关闭的连接会丢弃该帧，不影响其他接收者。
pub struct LocalMessageBroadcaster {
    rooms: Arc<RoomRegistry>,
    outboxes: RwLock<HashMap<ConnectionId, mpsc::Sender<OutboundFrame>>>,
    capacity: usize,
}

impl LocalMessageBroadcaster {
    pub fn new(rooms: Arc<RoomRegistry>, capacity: usize) -> Self {
        Self {
            rooms,
            outboxes: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// 为连接创建发送队列，返回接收端交给连接的写任务
    pub async fn attach(&self, connection_id: ConnectionId) -> mpsc::Receiver<OutboundFrame> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.outboxes.write().await.insert(connection_id, sender);
        receiver
    }

    pub async fn detach(&self, connection_id: ConnectionId) -> bool {
        self.outboxes.write().await.remove(&connection_id).is_some()
    }

    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        let Some(frame) = encode(event) else {
            return false;
        };
        let outboxes = self.outboxes.read().await;
        match outboxes.get(&connection_id) {
            Some(sender) => deliver(connection_id, sender, frame, event.name()),
            None => {
                debug!(%connection_id, event = event.name(), "连接已不存在，丢弃事件");
                false
            }
        }
    }

    /// 推送给通道内的所有连接，可排除一个连接（通常是发起者自己）
    pub async fn broadcast(
        &self,
        channel: &Channel,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let members = self.rooms.members_of(channel).await;
        if members.is_empty() {
            debug!(%channel, event = event.name(), "通道内没有连接");
            return 0;
        }
        let Some(frame) = encode(event) else {
            return 0;
        };

        let outboxes = self.outboxes.read().await;
        let mut delivered = 0;
        for connection_id in members {
            if Some(connection_id) == exclude {
                continue;
            }
            if let Some(sender) = outboxes.get(&connection_id) {
                if deliver(connection_id, sender, frame.clone(), event.name()) {
                    delivered += 1;
                }
            }
        }

        debug!(%channel, event = event.name(), delivered, "广播完成");
        delivered
    }
}

#[async_trait]
impl MessageBroadcaster for LocalMessageBroadcaster {
    async fn broadcast_to_room(
        &self,
        conversation_id: &ConversationId,
        event: &ServerEvent,
    ) -> usize {
        self.broadcast(&Channel::Conversation(conversation_id.clone()), event, None)
            .await
    }

    async fn broadcast_to_user(&self, user_id: &UserId, event: &ServerEvent) -> usize {
        self.broadcast(&Channel::User(user_id.clone()), event, None)
            .await
    }
}

fn encode(event: &ServerEvent) -> Option<OutboundFrame> {
    match event.to_frame() {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(event = event.name(), error = %err, "事件序列化失败");
            None
        }
    }
}

fn deliver(
    connection_id: ConnectionId,
    sender: &mpsc::Sender<OutboundFrame>,
    frame: OutboundFrame,
    event: &'static str,
) -> bool {
    match sender.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%connection_id, event, "发送队列已满，丢弃事件");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(%connection_id, event, "发送队列已关闭");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn conversation(id: &str) -> ConversationId {
        ConversationId::parse(id).unwrap()
    }

    fn next_event(rx: &mut mpsc::Receiver<OutboundFrame>) -> Option<Value> {
        rx.try_recv()
            .ok()
            .map(|frame| serde_json::from_str(&frame).unwrap())
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_connection_only() {
        let rooms = Arc::new(RoomRegistry::new());
        let broadcaster = LocalMessageBroadcaster::new(rooms.clone(), 8);
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        let mut rx_a = broadcaster.attach(a).await;
        let mut rx_b = broadcaster.attach(b).await;
        let channel = Channel::Conversation(conversation("c1"));
        rooms.join(channel.clone(), a).await;
        rooms.join(channel.clone(), b).await;

        let delivered = broadcaster
            .broadcast(&channel, &ServerEvent::error("ping"), Some(a))
            .await;

        assert_eq!(delivered, 1);
        assert!(next_event(&mut rx_a).is_none());
        assert_eq!(next_event(&mut rx_b).unwrap()["event"], "error");
    }

    #[tokio::test]
    async fn full_outbox_drops_frame_without_blocking_others() {
        let rooms = Arc::new(RoomRegistry::new());
        let broadcaster = LocalMessageBroadcaster::new(rooms.clone(), 1);
        let (slow, fast) = (ConnectionId::new(), ConnectionId::new());
        let _rx_slow = broadcaster.attach(slow).await;
        let mut rx_fast = broadcaster.attach(fast).await;
        let id = conversation("c1");
        rooms.join(Channel::Conversation(id.clone()), slow).await;
        rooms.join(Channel::Conversation(id.clone()), fast).await;

        assert_eq!(broadcaster.broadcast_to_room(&id, &ServerEvent::error("1")).await, 2);
        next_event(&mut rx_fast).unwrap();
        assert_eq!(broadcaster.broadcast_to_room(&id, &ServerEvent::error("2")).await, 1);
        assert_eq!(next_event(&mut rx_fast).unwrap()["data"]["message"], "2");
    }

    #[tokio::test]
    async fn detached_connection_receives_nothing() {
        let rooms = Arc::new(RoomRegistry::new());
        let broadcaster = LocalMessageBroadcaster::new(rooms, 4);
        let conn = ConnectionId::new();
        let _rx = broadcaster.attach(conn).await;

        assert!(broadcaster.detach(conn).await);
        assert!(!broadcaster.send_to_connection(conn, &ServerEvent::error("x")).await);
        assert!(!broadcaster.detach(conn).await);
    }

    #[tokio::test]
    async fn user_broadcast_reaches_every_connection_of_that_user() {
        let rooms = Arc::new(RoomRegistry::new());
        let broadcaster = LocalMessageBroadcaster::new(rooms.clone(), 4);
        let user = UserId::parse("u1").unwrap();
        let (tab1, tab2) = (ConnectionId::new(), ConnectionId::new());
        let mut rx1 = broadcaster.attach(tab1).await;
        let mut rx2 = broadcaster.attach(tab2).await;
        rooms.join(Channel::User(user.clone()), tab1).await;
        rooms.join(Channel::User(user.clone()), tab2).await;

        assert_eq!(broadcaster.broadcast_to_user(&user, &ServerEvent::error("hi")).await, 2);
        assert!(next_event(&mut rx1).is_some());
        assert!(next_event(&mut rx2).is_some());
    }
}
