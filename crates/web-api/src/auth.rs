//! 请求凭证提取
//!
//! REST 请求只接受 `Authorization: Bearer`；WebSocket 握手还接受查询参数。

use application::{Credential, ApplicationError};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use domain::UserSummary;
use serde::Deserialize;

use crate::{error::ApiError, state::AppState};

/// WebSocket 握手查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeQuery {
    pub token: Option<String>,
    pub user_id: Option<String>,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

/// 选择握手凭证：查询参数 token > Bearer 头 > userId
pub fn handshake_credential(query: HandshakeQuery, headers: &HeaderMap) -> Option<Credential> {
    let non_blank = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    non_blank(query.token)
        .or_else(|| bearer_token(headers))
        .map(Credential::Token)
        .or_else(|| non_blank(query.user_id).map(Credential::UserId))
}

/// 已认证的 REST 调用者
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserSummary);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let user = state
            .authenticator
            .authenticate(&Credential::Token(token))
            .await
            .map_err(ApplicationError::from)?;
        Ok(AuthUser(user))
    }
}
