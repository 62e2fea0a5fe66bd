//! 实时通道的线协议。
//!
//! 每一帧都是 `{"event": <名称>, "data": <载荷>}` 形式的 JSON 文本。

use domain::{ConversationId, Message, MessageId, Reactions, UserId, UserSummary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// 已序列化、可在多个连接之间共享的出站帧
pub type OutboundFrame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
}

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Connected {
        message: String,
    },
    Error {
        message: String,
    },
    JoinedConversation {
        conversation_id: ConversationId,
        status: AckStatus,
    },
    JoinConversationError {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        message: String,
    },
    LeftConversation {
        conversation_id: ConversationId,
        status: AckStatus,
    },
    UserTyping {
        conversation_id: ConversationId,
        user_id: UserId,
        username: String,
        is_typing: bool,
    },
    NewMessage(Message),
    ParticipantsUpdated {
        conversation_id: ConversationId,
        participants: Vec<UserSummary>,
    },
    UpdateConversationList {
        conversation_id: ConversationId,
        last_message: Message,
    },
    MessageReactionUpdated {
        message_id: MessageId,
        reactions: Reactions,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn join_error(conversation_id: Option<String>, message: impl Into<String>) -> Self {
        Self::JoinConversationError {
            conversation_id,
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Error { .. } => "error",
            Self::JoinedConversation { .. } => "joinedConversation",
            Self::JoinConversationError { .. } => "joinConversationError",
            Self::LeftConversation { .. } => "leftConversation",
            Self::UserTyping { .. } => "userTyping",
            Self::NewMessage(_) => "newMessage",
            Self::ParticipantsUpdated { .. } => "participantsUpdated",
            Self::UpdateConversationList { .. } => "updateConversationList",
            Self::MessageReactionUpdated { .. } => "messageReactionUpdated",
        }
    }

    pub fn to_frame(&self) -> Result<OutboundFrame, serde_json::Error> {
        serde_json::to_string(self).map(OutboundFrame::from)
    }
}

/// 客户端发来的、已通过校验的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    JoinConversation(ConversationId),
    LeaveConversation(ConversationId),
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },
}

pub const JOIN_CONVERSATION: &str = "joinConversation";
pub const LEAVE_CONVERSATION: &str = "leaveConversation";
pub const TYPING: &str = "typing";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    /// 事件名合法但载荷不合法
    #[error("{message}")]
    InvalidPayload {
        event: &'static str,
        conversation_id: Option<String>,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// `joinConversation` / `leaveConversation` 接受裸字符串或 `{ "conversationId": ... }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConversationRef {
    Bare(String),
    Object {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    conversation_id: String,
    is_typing: bool,
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let frame: RawFrame =
            serde_json::from_str(text).map_err(|err| FrameError::Malformed(err.to_string()))?;

        match frame.event.as_str() {
            JOIN_CONVERSATION => {
                parse_conversation_ref(JOIN_CONVERSATION, frame.data).map(Self::JoinConversation)
            }
            LEAVE_CONVERSATION => {
                parse_conversation_ref(LEAVE_CONVERSATION, frame.data).map(Self::LeaveConversation)
            }
            TYPING => {
                let payload: TypingPayload =
                    serde_json::from_value(frame.data).map_err(|err| FrameError::InvalidPayload {
                        event: TYPING,
                        conversation_id: None,
                        message: format!("invalid typing payload: {err}"),
                    })?;
                let conversation_id =
                    ConversationId::parse(payload.conversation_id.as_str()).map_err(|err| {
                        FrameError::InvalidPayload {
                            event: TYPING,
                            conversation_id: Some(payload.conversation_id.clone()),
                            message: err.to_string(),
                        }
                    })?;
                Ok(Self::Typing {
                    conversation_id,
                    is_typing: payload.is_typing,
                })
            }
            _ => Err(FrameError::UnknownEvent(frame.event)),
        }
    }
}

fn parse_conversation_ref(event: &'static str, data: Value) -> Result<ConversationId, FrameError> {
    let raw = match serde_json::from_value::<ConversationRef>(data) {
        Ok(ConversationRef::Bare(id)) | Ok(ConversationRef::Object { conversation_id: id }) => id,
        Err(_) => {
            return Err(FrameError::InvalidPayload {
                event,
                conversation_id: None,
                message: "Invalid conversation ID.".to_string(),
            })
        }
    };
    ConversationId::parse(raw.as_str()).map_err(|_| FrameError::InvalidPayload {
        event,
        conversation_id: Some(raw),
        message: "Invalid conversation ID.".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_accepts_bare_string_and_object() {
        let bare = ClientEvent::parse(r#"{"event":"joinConversation","data":"conv123"}"#).unwrap();
        let object = ClientEvent::parse(
            r#"{"event":"joinConversation","data":{"conversationId":"conv123"}}"#,
        )
        .unwrap();
        let expected = ClientEvent::JoinConversation(ConversationId::parse("conv123").unwrap());
        assert_eq!(bare, expected);
        assert_eq!(object, expected);
    }

    #[test]
    fn join_with_blank_id_is_invalid_payload() {
        let err = ClientEvent::parse(r#"{"event":"joinConversation","data":"  "}"#).unwrap_err();
        assert!(matches!(
            err,
            FrameError::InvalidPayload {
                event: JOIN_CONVERSATION,
                ..
            }
        ));

        let err = ClientEvent::parse(r#"{"event":"joinConversation"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Invalid conversation ID.");
    }

    #[test]
    fn typing_requires_boolean_flag() {
        let ok = ClientEvent::parse(
            r#"{"event":"typing","data":{"conversationId":"c1","isTyping":true}}"#,
        )
        .unwrap();
        assert!(matches!(ok, ClientEvent::Typing { is_typing: true, .. }));

        let err = ClientEvent::parse(
            r#"{"event":"typing","data":{"conversationId":"c1","isTyping":"yes"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::InvalidPayload { event: TYPING, .. }));
    }

    #[test]
    fn unknown_and_malformed_frames_are_distinguished() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"sendMessage","data":{}}"#).unwrap_err(),
            FrameError::UnknownEvent("sendMessage".into())
        );
        assert!(matches!(
            ClientEvent::parse("not json").unwrap_err(),
            FrameError::Malformed(_)
        ));
    }

    #[test]
    fn server_events_use_event_data_envelope() {
        let event = ServerEvent::JoinedConversation {
            conversation_id: ConversationId::parse("conv123").unwrap(),
            status: AckStatus::Success,
        };
        let value: Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "joinedConversation", "data": {"conversationId": "conv123", "status": "success"}})
        );

        let typing = ServerEvent::UserTyping {
            conversation_id: ConversationId::parse("c1").unwrap(),
            user_id: UserId::parse("u1").unwrap(),
            username: "alice".into(),
            is_typing: false,
        };
        let value = serde_json::to_value(&typing).unwrap();
        assert_eq!(value["event"], typing.name());
        assert_eq!(value["data"]["isTyping"], false);
        assert_eq!(value["data"]["userId"], "u1");
    }

    #[test]
    fn join_error_omits_missing_conversation_id() {
        let value = serde_json::to_value(ServerEvent::join_error(None, "Invalid conversation ID.")).unwrap();
        assert_eq!(value["event"], "joinConversationError");
        assert!(value["data"].get("conversationId").is_none());
    }
}
