//! 实时会话系统核心领域模型
//!
//! 包含用户摘要、会话、消息、反应计数等实体，以及标识符值对象和错误类型。

pub mod conversation;
pub mod errors;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::Conversation;
pub use errors::{DomainError, RepositoryError};
pub use message::{
    Message, MessageContent, MessageType, NewMessage, ReactionAction, ReactionKind,
    ReactionUpdate, Reactions,
};
pub use user::UserSummary;
pub use value_objects::{ConnectionId, ConversationId, MessageId, Timestamp, UserId};
