use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 握手或请求凭证无效，连接在进入路由前即被拒绝
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    /// 客户端载荷格式错误
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },
    /// 会话或消息不存在
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("not a participant of this conversation")]
    Forbidden,
    /// 底层存储调用失败（可重试）
    #[error("persistence failure: {0}")]
    Persistence(RepositoryError),
}

impl ApplicationError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// 将仓储的 NotFound 映射为带资源信息的业务错误
    pub fn from_repository(resource: &'static str, id: impl Into<String>, err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::not_found(resource, id),
            other => Self::Persistence(other),
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument { field, reason } => Self::Validation {
                field,
                message: reason,
            },
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value)
    }
}
