use std::collections::{HashMap, HashSet};
use std::fmt;

use domain::{ConnectionId, ConversationId, UserId};
use tokio::sync::RwLock;

/// 广播通道：会话房间，或每个用户的个人房间
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Conversation(ConversationId),
    User(UserId),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

#[derive(Default)]
struct Membership {
    members: HashMap<Channel, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<Channel>>,
}

/// 通道成员表。成员是连接，不是用户。
///
/// 正反两张索引在同一把锁下更新，断开时可以一次释放连接加入的全部通道。
#[derive(Default)]
pub struct RoomRegistry {
    inner: RwLock<Membership>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入通道，返回是否为首次加入
    pub async fn join(&self, channel: Channel, connection_id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let inserted = inner
            .members
            .entry(channel.clone())
            .or_default()
            .insert(connection_id);
        if inserted {
            inner.joined.entry(connection_id).or_default().insert(channel);
        }
        inserted
    }

    /// 离开通道，返回连接此前是否在通道中
    pub async fn leave(&self, channel: &Channel, connection_id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let removed = match inner.members.get_mut(channel) {
            Some(members) => {
                let removed = members.remove(&connection_id);
                if members.is_empty() {
                    inner.members.remove(channel);
                }
                removed
            }
            None => false,
        };
        if removed {
            if let Some(channels) = inner.joined.get_mut(&connection_id) {
                channels.remove(channel);
                if channels.is_empty() {
                    inner.joined.remove(&connection_id);
                }
            }
        }
        removed
    }

    /// 释放连接加入的所有通道，返回被释放的通道
    pub async fn remove_connection(&self, connection_id: ConnectionId) -> Vec<Channel> {
        let mut inner = self.inner.write().await;
        let Some(channels) = inner.joined.remove(&connection_id) else {
            return Vec::new();
        };
        for channel in &channels {
            if let Some(members) = inner.members.get_mut(channel) {
                members.remove(&connection_id);
                if members.is_empty() {
                    inner.members.remove(channel);
                }
            }
        }
        channels.into_iter().collect()
    }

    pub async fn members_of(&self, channel: &Channel) -> Vec<ConnectionId> {
        self.inner
            .read()
            .await
            .members
            .get(channel)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn channels_of(&self, connection_id: ConnectionId) -> Vec<Channel> {
        self.inner
            .read()
            .await
            .joined
            .get(&connection_id)
            .map(|channels| channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_member(&self, channel: &Channel, connection_id: ConnectionId) -> bool {
        self.inner
            .read()
            .await
            .members
            .get(channel)
            .is_some_and(|members| members.contains(&connection_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(id: &str) -> Channel {
        Channel::Conversation(ConversationId::parse(id).unwrap())
    }

    #[tokio::test]
    async fn join_reports_first_time_only_once() {
        let rooms = RoomRegistry::new();
        let conn = ConnectionId::new();

        assert!(rooms.join(conversation("c1"), conn).await);
        assert!(!rooms.join(conversation("c1"), conn).await);
        assert_eq!(rooms.members_of(&conversation("c1")).await, vec![conn]);
    }

    #[tokio::test]
    async fn leave_reports_prior_membership() {
        let rooms = RoomRegistry::new();
        let conn = ConnectionId::new();

        assert!(!rooms.leave(&conversation("c1"), conn).await);
        rooms.join(conversation("c1"), conn).await;
        assert!(rooms.leave(&conversation("c1"), conn).await);
        assert!(!rooms.is_member(&conversation("c1"), conn).await);
        assert!(rooms.channels_of(conn).await.is_empty());
    }

    #[tokio::test]
    async fn remove_connection_releases_every_channel() {
        let rooms = RoomRegistry::new();
        let conn = ConnectionId::new();
        let other = ConnectionId::new();
        let personal = Channel::User(UserId::parse("u1").unwrap());

        rooms.join(personal.clone(), conn).await;
        rooms.join(conversation("c1"), conn).await;
        rooms.join(conversation("c1"), other).await;

        let released = rooms.remove_connection(conn).await;
        assert_eq!(released.len(), 2);
        assert!(rooms.members_of(&personal).await.is_empty());
        assert_eq!(rooms.members_of(&conversation("c1")).await, vec![other]);
        assert!(rooms.remove_connection(conn).await.is_empty());
    }
}
