use std::collections::HashSet;
use std::sync::Arc;

use domain::{Conversation, ConversationId, Message, MessageContent, UserId, UserSummary};
use tracing::{info, warn};

use crate::{
    broadcaster::MessageBroadcaster,
    clock::Clock,
    error::ApplicationError,
    events::ServerEvent,
    repository::{ConversationRepository, MessageRepository, UserRepository},
};

#[derive(Debug, Clone)]
pub struct CreateConversationRequest {
    pub initiator: UserSummary,
    pub participant_ids: Vec<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedConversation {
    pub conversation: Conversation,
    /// `false` 表示返回的是参与者完全相同的已有会话
    pub created: bool,
    pub system_message: Option<Message>,
}

pub struct ConversationServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
    pub broadcaster: Arc<dyn MessageBroadcaster>,
}

pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<CreatedConversation, ApplicationError> {
        if request.participant_ids.is_empty() {
            return Err(ApplicationError::validation(
                "participantIds",
                "must contain at least one user",
            ));
        }

        // 发起者总是参与者；去重并保持原有顺序
        let mut seen = HashSet::new();
        let mut participant_ids = Vec::with_capacity(request.participant_ids.len() + 1);
        for raw in std::iter::once(request.initiator.user_id.to_string())
            .chain(request.participant_ids)
        {
            let id = UserId::parse(raw)?;
            if seen.insert(id.clone()) {
                participant_ids.push(id);
            }
        }

        let users = self.deps.user_repository.find_many(&participant_ids).await?;
        let found: HashSet<&UserId> = users.iter().map(|u| &u.user_id).collect();
        let missing: Vec<&str> = participant_ids
            .iter()
            .filter(|id| !found.contains(id))
            .map(UserId::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ApplicationError::not_found("user", missing.join(", ")));
        }

        // 按请求顺序排列参与者
        let participants = participant_ids
            .iter()
            .filter_map(|id| users.iter().find(|u| &u.user_id == id).cloned())
            .collect();
        let conversation = Conversation::new(
            ConversationId::generate(),
            participants,
            request.title,
            self.deps.clock.now(),
        );
        let creation = self
            .deps
            .conversation_repository
            .create_unless_exists(conversation)
            .await?;
        let conversation = creation.conversation;
        if !creation.created {
            info!(conversation_id = %conversation.id, "返回参与者相同的已有会话");
            return Ok(CreatedConversation {
                conversation,
                created: false,
                system_message: None,
            });
        }
        info!(conversation_id = %conversation.id, "会话已创建");

        let system_message = self.write_creation_notice(&conversation, &request.initiator).await;
        if let Some(message) = &system_message {
            self.deps
                .broadcaster
                .broadcast_to_room(&conversation.id, &ServerEvent::NewMessage(message.clone()))
                .await;
            let list_update = ServerEvent::UpdateConversationList {
                conversation_id: conversation.id.clone(),
                last_message: message.clone(),
            };
            for participant in &conversation.participants {
                self.deps
                    .broadcaster
                    .broadcast_to_user(&participant.user_id, &list_update)
                    .await;
            }
        }

        Ok(CreatedConversation {
            conversation,
            created: true,
            system_message,
        })
    }

    async fn write_creation_notice(
        &self,
        conversation: &Conversation,
        initiator: &UserSummary,
    ) -> Option<Message> {
        let content =
            MessageContent::new(format!("Conversation created by {}.", initiator.username)).ok()?;
        match self
            .deps
            .message_repository
            .create_system_message(&conversation.id, content)
            .await
        {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(conversation_id = %conversation.id, error = %err, "创建会话的系统消息写入失败");
                None
            }
        }
    }
}
