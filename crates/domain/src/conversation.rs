use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageType};
use crate::user::UserSummary;
use crate::value_objects::{ConversationId, Timestamp, UserId};

/// 会话记录。参与者列表是"谁可以出现在这个房间里"的唯一事实来源。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversation {
    pub fn new(
        id: ConversationId,
        participants: Vec<UserSummary>,
        title: Option<String>,
        now: Timestamp,
    ) -> Self {
        let title = title
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        Self {
            id,
            participants,
            title,
            last_message_text: None,
            last_message_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user_id == user_id)
    }

    /// 参与者集合（忽略顺序），用于查找已存在的同组会话。
    pub fn participant_set(&self) -> BTreeSet<&UserId> {
        self.participants.iter().map(|p| &p.user_id).collect()
    }

    /// 幂等地追加参与者，返回是否真正新增。
    pub fn add_participant(&mut self, user: UserSummary, now: Timestamp) -> bool {
        if self.has_participant(&user.user_id) {
            return false;
        }
        self.participants.push(user);
        self.updated_at = now;
        true
    }

    /// 用新消息刷新会话列表中的预览。系统消息不改变预览。
    pub fn record_last_message(&mut self, message: &Message) {
        let Some(preview) = last_message_preview(message) else {
            return;
        };
        self.last_message_text = Some(preview);
        self.last_message_at = Some(message.timestamp);
        self.updated_at = message.timestamp;
    }
}

/// 会话列表中显示的最后一条消息文本。
pub fn last_message_preview(message: &Message) -> Option<String> {
    match message.message_type {
        MessageType::Text => Some(message.content.as_str().to_owned()),
        MessageType::Image => Some("[Image]".to_owned()),
        MessageType::System => None,
    }
}
