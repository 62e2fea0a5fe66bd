use std::sync::Arc;

use domain::{
    ConversationId, Message, MessageContent, MessageId, MessageType, NewMessage, ReactionAction,
    ReactionKind, ReactionUpdate, UserSummary,
};
use tracing::{info, warn};

use crate::{
    broadcaster::MessageBroadcaster,
    error::ApplicationError,
    events::ServerEvent,
    participants::{ParticipantSync, ParticipantSynchronizer},
    repository::{ConversationRepository, MessageRepository},
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub sender: UserSummary, // 已认证的发送者
    pub message_type: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ReactToMessageRequest {
    pub message_id: String,
    pub user: UserSummary,
    pub reaction_type: String,
    pub action: String,
}

pub struct MessageServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub synchronizer: ParticipantSynchronizer,
    pub broadcaster: Arc<dyn MessageBroadcaster>,
}

pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    /// 发送消息。
    ///
    /// 非参与者发消息时先自动加入会话；提交成功后依次推送
    /// 房间内的 `newMessage` 与每个参与者个人房间的 `updateConversationList`。
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let conversation_id = ConversationId::parse(request.conversation_id)?;
        let message_type: MessageType = request.message_type.parse()?;
        if message_type == MessageType::System {
            return Err(ApplicationError::validation(
                "type",
                "system messages cannot be sent by users",
            ));
        }
        let content = MessageContent::new(request.content)?;

        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(&conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("conversation", conversation_id.as_str()))?;

        let mut participants = conversation.participants;
        if !participants
            .iter()
            .any(|p| p.user_id == request.sender.user_id)
        {
            let sync = self
                .deps
                .synchronizer
                .ensure_participant(&conversation_id, &request.sender)
                .await?;
            for event in sync.room_events(&conversation_id) {
                self.deps
                    .broadcaster
                    .broadcast_to_room(&conversation_id, &event)
                    .await;
            }
            participants = match sync {
                ParticipantSync::Added {
                    participants: updated,
                    ..
                } => updated,
                ParticipantSync::AlreadyParticipant => {
                    self.deps
                        .conversation_repository
                        .participants(&conversation_id)
                        .await?
                }
            };
        }

        let message = self
            .deps
            .message_repository
            .create_message(NewMessage {
                conversation_id: conversation_id.clone(),
                sender: request.sender,
                message_type,
                content,
            })
            .await?;

        if let Err(err) = self
            .deps
            .conversation_repository
            .record_last_message(&message)
            .await
        {
            warn!(%conversation_id, message_id = %message.id, error = %err, "更新会话预览失败");
        }

        info!(%conversation_id, message_id = %message.id, "消息已发送");

        self.deps
            .broadcaster
            .broadcast_to_room(&conversation_id, &ServerEvent::NewMessage(message.clone()))
            .await;
        let list_update = ServerEvent::UpdateConversationList {
            conversation_id: conversation_id.clone(),
            last_message: message.clone(),
        };
        for participant in &participants {
            self.deps
                .broadcaster
                .broadcast_to_user(&participant.user_id, &list_update)
                .await;
        }

        Ok(message)
    }

    /// 增减消息反应计数，并推送给会话房间
    pub async fn react(
        &self,
        request: ReactToMessageRequest,
    ) -> Result<ReactionUpdate, ApplicationError> {
        let message_id = MessageId::parse(request.message_id)?;
        let kind: ReactionKind = request.reaction_type.parse()?;
        let action: ReactionAction = request.action.parse()?;

        let message = self
            .deps
            .message_repository
            .find_by_id(&message_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("message", message_id.as_str()))?;

        let participants = self
            .deps
            .conversation_repository
            .participants(&message.conversation_id)
            .await
            .map_err(|err| {
                ApplicationError::from_repository(
                    "conversation",
                    message.conversation_id.as_str(),
                    err,
                )
            })?;
        if !participants.iter().any(|p| p.user_id == request.user.user_id) {
            return Err(ApplicationError::Forbidden);
        }

        let update = self
            .deps
            .message_repository
            .update_reaction(&message_id, kind, action)
            .await
            .map_err(|err| ApplicationError::from_repository("message", message_id.as_str(), err))?;

        self.deps
            .broadcaster
            .broadcast_to_room(
                &update.conversation_id,
                &ServerEvent::MessageReactionUpdated {
                    message_id: update.message_id.clone(),
                    reactions: update.reactions,
                },
            )
            .await;

        Ok(update)
    }
}
