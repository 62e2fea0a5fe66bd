use async_trait::async_trait;
use domain::UserSummary;
use thiserror::Error;

/// 客户端在握手时提交的凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// HS256 签名的访问令牌
    Token(String),
    /// 直接声明的用户 ID，仅在开发模式下被接受
    UserId(String),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::UserId(_) => "userId",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("user not found")]
    UnknownUser,
    #[error("userId handshake is disabled")]
    UserIdHandshakeDisabled,
    #[error("authentication backend unavailable: {0}")]
    Unavailable(String),
}

/// 将握手凭证解析为已验证的用户身份
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &Credential) -> Result<UserSummary, AuthError>;
}
