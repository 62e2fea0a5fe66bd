use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::user::UserSummary;
use crate::value_objects::{ConversationId, MessageId, Timestamp};

/// 消息内容允许的最大长度。
const MAX_CONTENT_LEN: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    /// 由平台自身发出的成员变动通知，没有发送者。
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "system" => Ok(Self::System),
            other => Err(DomainError::invalid_argument(
                "type",
                format!("unknown message type `{other}`"),
            )),
        }
    }
}

/// 经过校验的消息内容（去除首尾空白，非空）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("content", "cannot be empty"));
        }
        if value.chars().count() > MAX_CONTENT_LEN {
            return Err(DomainError::invalid_argument("content", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Love,
    Laugh,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 3] = [Self::Like, Self::Love, Self::Laugh];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Laugh => "laugh",
        }
    }
}

impl FromStr for ReactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                DomainError::invalid_argument(
                    "reactionType",
                    format!("invalid reaction type `{s}`, allowed: like, love, laugh"),
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Increment,
    Decrement,
}

impl FromStr for ReactionAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "increment" => Ok(Self::Increment),
            "decrement" => Ok(Self::Decrement),
            _ => Err(DomainError::invalid_argument(
                "action",
                "must be `increment` or `decrement`",
            )),
        }
    }
}

/// 反应计数。计数为无符号整数，递减到 0 后保持为 0。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    pub like: u32,
    pub love: u32,
    pub laugh: u32,
}

impl Reactions {
    pub fn count(&self, kind: ReactionKind) -> u32 {
        match kind {
            ReactionKind::Like => self.like,
            ReactionKind::Love => self.love,
            ReactionKind::Laugh => self.laugh,
        }
    }

    fn slot(&mut self, kind: ReactionKind) -> &mut u32 {
        match kind {
            ReactionKind::Like => &mut self.like,
            ReactionKind::Love => &mut self.love,
            ReactionKind::Laugh => &mut self.laugh,
        }
    }

    /// 应用一次反应变更，返回计数是否真的发生了变化。
    pub fn apply(&mut self, kind: ReactionKind, action: ReactionAction) -> bool {
        let slot = self.slot(kind);
        match action {
            ReactionAction::Increment => {
                *slot = slot.saturating_add(1);
                true
            }
            ReactionAction::Decrement if *slot > 0 => {
                *slot -= 1;
                true
            }
            ReactionAction::Decrement => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// 系统消息没有发送者。
    pub sender: Option<UserSummary>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: MessageContent,
    pub reactions: Reactions,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn from_new(id: MessageId, new: NewMessage, timestamp: Timestamp) -> Self {
        Self {
            id,
            conversation_id: new.conversation_id,
            sender: Some(new.sender),
            message_type: new.message_type,
            content: new.content,
            reactions: Reactions::default(),
            timestamp,
        }
    }

    pub fn system(
        id: MessageId,
        conversation_id: ConversationId,
        content: MessageContent,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender: None,
            message_type: MessageType::System,
            content,
            reactions: Reactions::default(),
            timestamp,
        }
    }
}

/// 待持久化的用户消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender: UserSummary,
    pub message_type: MessageType,
    pub content: MessageContent,
}

/// 反应变更提交后的结果，供广播使用。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdate {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub reactions: Reactions,
}
