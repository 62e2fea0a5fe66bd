use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 对外暴露的用户摘要（会话参与者、消息发送者、连接身份）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserSummary {
    pub fn new(user_id: UserId, username: impl Into<String>, avatar: Option<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            avatar,
        }
    }
}
