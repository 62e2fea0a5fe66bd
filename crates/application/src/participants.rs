use std::sync::Arc;

use domain::{ConversationId, Message, MessageContent, UserSummary};
use tracing::{info, warn};

use crate::error::ApplicationError;
use crate::events::ServerEvent;
use crate::repository::{ConversationRepository, MessageRepository};

/// 参与者同步的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantSync {
    /// 用户已经是参与者（可能由并发的另一条连接刚刚加入）
    AlreadyParticipant,
    Added {
        participants: Vec<UserSummary>,
        /// 系统消息写入失败时为 `None`，成员变更本身仍然生效
        notice: Option<Message>,
    },
}

impl ParticipantSync {
    pub fn was_added(&self) -> bool {
        matches!(self, Self::Added { .. })
    }

    /// 需要推送到会话房间的事件：系统消息在前，参与者列表在后
    pub fn room_events(&self, conversation_id: &ConversationId) -> Vec<ServerEvent> {
        match self {
            Self::AlreadyParticipant => Vec::new(),
            Self::Added {
                participants,
                notice,
            } => {
                let mut events = Vec::with_capacity(2);
                if let Some(message) = notice {
                    events.push(ServerEvent::NewMessage(message.clone()));
                }
                events.push(ServerEvent::ParticipantsUpdated {
                    conversation_id: conversation_id.clone(),
                    participants: participants.clone(),
                });
                events
            }
        }
    }
}

/// 把"进入房间"与持久化的参与者列表对齐
///
/// 非参与者加入会话房间或在会话中发消息时，自动将其写入参与者列表，
/// 并生成一条系统消息。
#[derive(Clone)]
pub struct ParticipantSynchronizer {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
}

impl ParticipantSynchronizer {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            conversations,
            messages,
        }
    }

    pub async fn ensure_participant(
        &self,
        conversation_id: &ConversationId,
        user: &UserSummary,
    ) -> Result<ParticipantSync, ApplicationError> {
        let addition = self
            .conversations
            .add_participant_if_absent(conversation_id, user)
            .await
            .map_err(|err| {
                ApplicationError::from_repository("conversation", conversation_id.as_str(), err)
            })?;

        if !addition.added {
            return Ok(ParticipantSync::AlreadyParticipant);
        }

        info!(
            conversation_id = %conversation_id,
            user_id = %user.user_id,
            "用户已自动加入会话参与者列表"
        );

        let notice = match self.write_join_notice(conversation_id, user).await {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(
                    conversation_id = %conversation_id,
                    user_id = %user.user_id,
                    error = %err,
                    "系统消息写入失败，跳过加入通知"
                );
                None
            }
        };

        Ok(ParticipantSync::Added {
            participants: addition.participants,
            notice,
        })
    }

    async fn write_join_notice(
        &self,
        conversation_id: &ConversationId,
        user: &UserSummary,
    ) -> Result<Message, ApplicationError> {
        let content = MessageContent::new(format!("{} has joined the conversation.", user.username))?;
        let message = self
            .messages
            .create_system_message(conversation_id, content)
            .await?;
        Ok(message)
    }
}
