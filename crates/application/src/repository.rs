//! 持久化协作方接口。
//!
//! 实时核心只通过这些接口读取参与者列表、写入系统消息；
//! 具体实现见 `memory` 模块与 infrastructure crate 中的 PostgreSQL 仓储。

use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageContent, MessageId, NewMessage, ReactionAction,
    ReactionKind, ReactionUpdate, RepositoryError, UserId, UserSummary,
};

/// `add_participant_if_absent` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantAddition {
    /// 本次调用是否真正写入了新参与者
    pub added: bool,
    /// 写入后的完整参与者列表
    pub participants: Vec<UserSummary>,
}

/// `create_unless_exists` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationCreation {
    pub conversation: Conversation,
    /// `false` 表示返回的是参与者集合相同的已有会话
    pub created: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserSummary>, RepositoryError>;

    /// 按给定 ID 批量查询，只返回存在的用户
    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<UserSummary>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 参与者集合（忽略顺序）相同的会话已存在时返回它，否则写入新会话。
    /// 查找与写入是一个原子操作，并发创建同一组参与者只会得到一个会话。
    async fn create_unless_exists(
        &self,
        conversation: Conversation,
    ) -> Result<ConversationCreation, RepositoryError>;

    async fn find_by_id(&self, id: &ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;

    /// 会话不存在时返回 `RepositoryError::NotFound`
    async fn participants(&self, id: &ConversationId)
        -> Result<Vec<UserSummary>, RepositoryError>;

    /// 原子的"不存在才添加"，重复调用不会产生重复参与者
    async fn add_participant_if_absent(
        &self,
        id: &ConversationId,
        user: &UserSummary,
    ) -> Result<ParticipantAddition, RepositoryError>;

    /// 更新会话列表中的最后一条消息预览
    async fn record_last_message(&self, message: &Message) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create_message(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    async fn create_system_message(
        &self,
        conversation_id: &ConversationId,
        content: MessageContent,
    ) -> Result<Message, RepositoryError>;

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError>;

    /// 递减不会低于 0；消息不存在时返回 `RepositoryError::NotFound`
    async fn update_reaction(
        &self,
        id: &MessageId,
        kind: ReactionKind,
        action: ReactionAction,
    ) -> Result<ReactionUpdate, RepositoryError>;
}
