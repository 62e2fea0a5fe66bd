//! 应用层实现。
//!
//! 实时会话核心：连接网关、房间成员表、事件路由、参与者同步与广播桥，
//! 以及 REST 写路径使用的消息 / 会话服务。持久化通过 `repository` 中的接口抽象。

pub mod auth;
pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod events;
pub mod gateway;
pub mod memory;
pub mod participants;
pub mod repository;
pub mod rooms;
pub mod router;
pub mod services;
pub mod session;

#[cfg(test)]
mod test_support;

pub use auth::{AuthError, Authenticator, Credential};
pub use broadcaster::{LocalMessageBroadcaster, MessageBroadcaster};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use events::{ClientEvent, OutboundFrame, ServerEvent};
pub use gateway::{Admission, ConnectionGateway};
pub use memory::{InMemoryStore, SeedData};
pub use participants::{ParticipantSync, ParticipantSynchronizer};
pub use repository::{
    ConversationCreation, ConversationRepository, MessageRepository, ParticipantAddition,
    UserRepository,
};
pub use rooms::{Channel, RoomRegistry};
pub use router::{EventRouter, Outcome};
pub use services::{
    ConversationService, ConversationServiceDependencies, CreateConversationRequest,
    CreatedConversation, MessageService, MessageServiceDependencies, ReactToMessageRequest,
    SendMessageRequest,
};
pub use session::{Session, SessionRegistry};
