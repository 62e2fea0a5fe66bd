use std::collections::{HashMap, HashSet};

use domain::{ConnectionId, Timestamp, UserId, UserSummary};
use tokio::sync::RwLock;

/// 一个已认证连接的身份记录，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user: UserSummary,
    pub connected_at: Timestamp,
}

impl Session {
    pub fn new(connection_id: ConnectionId, user: UserSummary, connected_at: Timestamp) -> Self {
        Self {
            connection_id,
            user,
            connected_at,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user.user_id
    }
}

#[derive(Default)]
struct SessionTables {
    by_connection: HashMap<ConnectionId, Session>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

/// 在线会话表：用户 -> 连接集合，连接 -> 会话
///
/// 同一用户可以同时持有多个连接，每个连接都有自己的会话。
#[derive(Default)]
pub struct SessionRegistry {
    tables: RwLock<SessionTables>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: Session) {
        let mut tables = self.tables.write().await;
        tables
            .by_user
            .entry(session.user.user_id.clone())
            .or_default()
            .insert(session.connection_id);
        tables.by_connection.insert(session.connection_id, session);
    }

    /// 移除连接对应的会话；重复调用返回 `None`
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<Session> {
        let mut tables = self.tables.write().await;
        let session = tables.by_connection.remove(&connection_id)?;

        if let Some(connections) = tables.by_user.get_mut(session.user_id()) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                tables.by_user.remove(session.user_id());
            }
        }

        Some(session)
    }

    pub async fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.tables
            .read()
            .await
            .by_user
            .get(user_id)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.tables.read().await.by_user.contains_key(user_id)
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.tables.read().await.by_user.keys().cloned().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.tables.read().await.by_connection.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn session(user: &str) -> Session {
        Session::new(
            ConnectionId::new(),
            UserSummary::new(UserId::parse(user).unwrap(), user, None),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn user_stays_online_until_last_connection_leaves() {
        let registry = SessionRegistry::new();
        let first = session("u1");
        let second = Session::new(ConnectionId::new(), first.user.clone(), Utc::now());
        let uid = first.user_id().clone();

        registry.register(first.clone()).await;
        registry.register(second.clone()).await;
        assert_eq!(registry.connections_of(&uid).await.len(), 2);

        registry.unregister(first.connection_id).await;
        assert!(registry.is_online(&uid).await);

        registry.unregister(second.connection_id).await;
        assert!(!registry.is_online(&uid).await);
        assert!(registry.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let s = session("u1");
        registry.register(s.clone()).await;

        assert_eq!(registry.unregister(s.connection_id).await, Some(s.clone()));
        assert_eq!(registry.unregister(s.connection_id).await, None);
        assert_eq!(registry.connection_count().await, 0);
    }
}
