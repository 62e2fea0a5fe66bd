//! 单元测试共用的装配：内存存储 + 完整的实时核心。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Conversation, ConversationId, UserId, UserSummary};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    AuthError, Authenticator, ConnectionGateway, ConversationService,
    ConversationServiceDependencies, Credential, EventRouter, InMemoryStore,
    LocalMessageBroadcaster, MessageService, MessageServiceDependencies, OutboundFrame,
    ParticipantSynchronizer, RoomRegistry, Session, SessionRegistry, SystemClock, UserRepository,
};

/// 直接按用户 ID 查表的认证器
pub struct DirectAuthenticator {
    store: Arc<InMemoryStore>,
}

#[async_trait]
impl Authenticator for DirectAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> Result<UserSummary, AuthError> {
        let Credential::UserId(raw) = credential else {
            return Err(AuthError::InvalidToken("tokens are not accepted here".into()));
        };
        let id = UserId::parse(raw.as_str()).map_err(|_| AuthError::UnknownUser)?;
        UserRepository::find_by_id(self.store.as_ref(), &id)
            .await
            .map_err(|err| AuthError::Unavailable(err.to_string()))?
            .ok_or(AuthError::UnknownUser)
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub rooms: Arc<RoomRegistry>,
    pub broadcaster: Arc<LocalMessageBroadcaster>,
    pub gateway: ConnectionGateway,
    pub router: EventRouter,
    pub messages: MessageService,
    pub conversations: ConversationService,
}

pub fn user(id: &str, name: &str) -> UserSummary {
    UserSummary::new(UserId::parse(id).unwrap(), name, None)
}

pub fn conversation_id(id: &str) -> ConversationId {
    ConversationId::parse(id).unwrap()
}

impl Harness {
    /// 用户 u1(alice) u2(bob) u3(carol)；会话 conv123 只有 bob
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::default());
        for u in [user("u1", "alice"), user("u2", "bob"), user("u3", "carol")] {
            store.insert_user(u).await;
        }
        store
            .insert_conversation(Conversation::new(
                conversation_id("conv123"),
                vec![user("u2", "bob")],
                None,
                chrono::Utc::now(),
            ))
            .await;
        Self::with_store(store)
    }

    pub fn with_store(store: Arc<InMemoryStore>) -> Self {
        let clock = Arc::new(SystemClock);
        let rooms = Arc::new(RoomRegistry::new());
        let broadcaster = Arc::new(LocalMessageBroadcaster::new(rooms.clone(), 64));
        let synchronizer = ParticipantSynchronizer::new(store.clone(), store.clone());

        let gateway = ConnectionGateway::new(
            Arc::new(DirectAuthenticator {
                store: store.clone(),
            }),
            Arc::new(SessionRegistry::new()),
            broadcaster.clone(),
            clock.clone(),
        );
        let router = EventRouter::new(broadcaster.clone(), store.clone(), synchronizer.clone());
        let messages = MessageService::new(MessageServiceDependencies {
            conversation_repository: store.clone(),
            message_repository: store.clone(),
            synchronizer,
            broadcaster: broadcaster.clone(),
        });
        let conversations = ConversationService::new(ConversationServiceDependencies {
            user_repository: store.clone(),
            conversation_repository: store.clone(),
            message_repository: store.clone(),
            clock,
            broadcaster: broadcaster.clone(),
        });

        Self {
            store,
            rooms,
            broadcaster,
            gateway,
            router,
            messages,
            conversations,
        }
    }

    /// 建立连接并吞掉 `connected` 欢迎帧
    pub async fn connect(&self, user_id: &str) -> Client {
        let admission = self
            .gateway
            .admit(Some(Credential::UserId(user_id.to_string())))
            .await
            .expect("handshake accepted");
        let mut client = Client {
            session: admission.session,
            outbox: admission.outbox,
        };
        assert_eq!(client.event_names(), vec!["connected"]);
        client
    }

    pub async fn send(&self, client: &Client, frame: Value) {
        self.router.dispatch(&client.session, &frame.to_string()).await;
    }
}

pub struct Client {
    pub session: Session,
    pub outbox: mpsc::Receiver<OutboundFrame>,
}

impl Client {
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbox.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("outbound frames are JSON"));
        }
        frames
    }

    pub fn event_names(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .map(|frame| frame["event"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}
