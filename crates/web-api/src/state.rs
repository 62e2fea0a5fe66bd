use std::sync::Arc;

use application::{
    Authenticator, Clock, ConnectionGateway, ConversationRepository, ConversationService,
    ConversationServiceDependencies, EventRouter, LocalMessageBroadcaster, MessageRepository,
    MessageService, MessageServiceDependencies, ParticipantSynchronizer, RoomRegistry,
    SessionRegistry, SystemClock, UserRepository,
};
use config::RealtimeConfig;

/// 存储后端（PostgreSQL 或内存）
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ConnectionGateway>,
    pub router: Arc<EventRouter>,
    pub message_service: Arc<MessageService>,
    pub conversation_service: Arc<ConversationService>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    /// 装配实时核心与写路径服务
    pub fn new(
        realtime: &RealtimeConfig,
        repositories: Repositories,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let rooms = Arc::new(RoomRegistry::new());
        let broadcaster = Arc::new(LocalMessageBroadcaster::new(
            rooms,
            realtime.outbound_capacity,
        ));
        let synchronizer = ParticipantSynchronizer::new(
            repositories.conversations.clone(),
            repositories.messages.clone(),
        );

        let gateway = ConnectionGateway::new(
            authenticator.clone(),
            Arc::new(SessionRegistry::new()),
            broadcaster.clone(),
            clock.clone(),
        );
        let router = EventRouter::new(
            broadcaster.clone(),
            repositories.conversations.clone(),
            synchronizer.clone(),
        );
        let message_service = MessageService::new(MessageServiceDependencies {
            conversation_repository: repositories.conversations.clone(),
            message_repository: repositories.messages.clone(),
            synchronizer,
            broadcaster: broadcaster.clone(),
        });
        let conversation_service = ConversationService::new(ConversationServiceDependencies {
            user_repository: repositories.users,
            conversation_repository: repositories.conversations,
            message_repository: repositories.messages,
            clock,
            broadcaster,
        });

        Self {
            gateway: Arc::new(gateway),
            router: Arc::new(router),
            message_service: Arc::new(message_service),
            conversation_service: Arc::new(conversation_service),
            authenticator,
        }
    }
}
