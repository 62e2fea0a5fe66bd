//! 进程内存储实现，供本地开发（未配置数据库）与测试使用。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageContent, MessageId, NewMessage, ReactionAction,
    ReactionKind, ReactionUpdate, RepositoryError, UserId, UserSummary,
};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::repository::{
    ConversationCreation, ConversationRepository, MessageRepository, ParticipantAddition,
    UserRepository,
};

/// 启动时导入的初始数据
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedData {
    #[serde(default)]
    pub users: Vec<UserSummary>,
    #[serde(default)]
    pub conversations: Vec<SeedConversation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedConversation {
    pub id: ConversationId,
    pub participant_ids: Vec<UserId>,
    #[serde(default)]
    pub title: Option<String>,
}

/// 同时实现三个仓储接口的内存存储
pub struct InMemoryStore {
    users: RwLock<HashMap<UserId, UserSummary>>,
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
    messages: RwLock<HashMap<MessageId, Message>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn insert_user(&self, user: UserSummary) {
        self.users.write().await.insert(user.user_id.clone(), user);
    }

    pub async fn insert_conversation(&self, conversation: Conversation) {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation);
    }

    /// 导入初始数据；引用了未知用户的会话会被拒绝
    pub async fn load_seed(&self, seed: SeedData) -> Result<(), RepositoryError> {
        for user in seed.users {
            self.insert_user(user).await;
        }

        for entry in seed.conversations {
            let users = self.users.read().await;
            let participants = entry
                .participant_ids
                .iter()
                .map(|id| {
                    users.get(id).cloned().ok_or_else(|| {
                        RepositoryError::storage(format!(
                            "seed conversation {} references unknown user {id}",
                            entry.id
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            drop(users);

            let conversation = Conversation::new(entry.id, participants, entry.title, self.clock.now());
            self.insert_conversation(conversation).await;
        }
        Ok(())
    }

    pub async fn message_count(&self, conversation_id: &ConversationId) -> usize {
        self.messages
            .read()
            .await
            .values()
            .filter(|m| &m.conversation_id == conversation_id)
            .count()
    }

    pub async fn messages_in(&self, conversation_id: &ConversationId) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .read()
            .await
            .values()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    async fn insert_message(&self, message: Message) -> Message {
        self.messages
            .write()
            .await
            .insert(message.id.clone(), message.clone());
        message
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserSummary>, RepositoryError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<UserSummary>, RepositoryError> {
        let users = self.users.read().await;
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn create_unless_exists(
        &self,
        conversation: Conversation,
    ) -> Result<ConversationCreation, RepositoryError> {
        // 查找与写入持有同一把写锁
        let mut conversations = self.conversations.write().await;
        let wanted = conversation.participant_set();
        if let Some(existing) = conversations
            .values()
            .find(|c| c.participant_set() == wanted)
        {
            return Ok(ConversationCreation {
                conversation: existing.clone(),
                created: false,
            });
        }
        if conversations.contains_key(&conversation.id) {
            return Err(RepositoryError::Conflict);
        }

        conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(ConversationCreation {
            conversation,
            created: true,
        })
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn participants(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<UserSummary>, RepositoryError> {
        self.conversations
            .read()
            .await
            .get(id)
            .map(|c| c.participants.clone())
            .ok_or(RepositoryError::NotFound)
    }

    async fn add_participant_if_absent(
        &self,
        id: &ConversationId,
        user: &UserSummary,
    ) -> Result<ParticipantAddition, RepositoryError> {
        let now = self.clock.now();
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.get_mut(id).ok_or(RepositoryError::NotFound)?;
        let added = conversation.add_participant(user.clone(), now);
        Ok(ParticipantAddition {
            added,
            participants: conversation.participants.clone(),
        })
    }

    async fn record_last_message(&self, message: &Message) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(&message.conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.record_last_message(message);
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn create_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let message = Message::from_new(MessageId::generate(), message, self.clock.now());
        Ok(self.insert_message(message).await)
    }

    async fn create_system_message(
        &self,
        conversation_id: &ConversationId,
        content: MessageContent,
    ) -> Result<Message, RepositoryError> {
        let message = Message::system(
            MessageId::generate(),
            conversation_id.clone(),
            content,
            self.clock.now(),
        );
        Ok(self.insert_message(message).await)
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.messages.read().await.get(id).cloned())
    }

    async fn update_reaction(
        &self,
        id: &MessageId,
        kind: ReactionKind,
        action: ReactionAction,
    ) -> Result<ReactionUpdate, RepositoryError> {
        let mut messages = self.messages.write().await;
        let message = messages.get_mut(id).ok_or(RepositoryError::NotFound)?;
        message.reactions.apply(kind, action);
        Ok(ReactionUpdate {
            message_id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            reactions: message.reactions,
        })
    }
}
