//! JWT 握手认证
//!
//! 令牌使用 HS256 签名，`user_id` 声明指向 users 表中的用户。

use std::sync::Arc;

use application::auth::{AuthError, Authenticator, Credential};
use application::repository::UserRepository;
use async_trait::async_trait;
use config::AuthConfig;
use domain::{UserId, UserSummary};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    ttl_hours: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            ttl_hours: config.token_ttl_hours,
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: &UserId) -> Result<String, AuthError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.ttl_hours);
        let claims = Claims {
            user_id: user_id.to_string(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Unavailable(format!("token generation failed: {err}")))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| AuthError::InvalidToken(err.to_string()))
    }
}

/// 握手 / REST 共用的认证器：校验令牌后回表确认用户存在
pub struct JwtAuthenticator {
    jwt: JwtService,
    users: Arc<dyn UserRepository>,
    allow_user_id_handshake: bool,
}

impl JwtAuthenticator {
    pub fn new(config: &AuthConfig, users: Arc<dyn UserRepository>) -> Self {
        Self {
            jwt: JwtService::new(config),
            users,
            allow_user_id_handshake: config.allow_user_id_handshake,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    async fn lookup(&self, raw_id: &str) -> Result<UserSummary, AuthError> {
        let user_id = UserId::parse(raw_id).map_err(|_| AuthError::UnknownUser)?;
        self.users
            .find_by_id(&user_id)
            .await
            .map_err(|err| AuthError::Unavailable(err.to_string()))?
            .ok_or(AuthError::UnknownUser)
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> Result<UserSummary, AuthError> {
        match credential {
            Credential::Token(token) => {
                let claims = self.jwt.verify_token(token)?;
                self.lookup(&claims.user_id).await
            }
            Credential::UserId(user_id) if self.allow_user_id_handshake => {
                debug!(%user_id, "使用开发模式的 userId 握手");
                self.lookup(user_id).await
            }
            Credential::UserId(_) => Err(AuthError::UserIdHandshakeDisabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::memory::InMemoryStore;

    async fn authenticator(allow_user_id: bool) -> JwtAuthenticator {
        let store = Arc::new(InMemoryStore::default());
        store
            .insert_user(UserSummary::new(UserId::parse("u1").unwrap(), "alice", None))
            .await;
        let config = AuthConfig {
            allow_user_id_handshake: allow_user_id,
            ..AuthConfig::default()
        };
        JwtAuthenticator::new(&config, store)
    }

    #[tokio::test]
    async fn valid_token_resolves_user() {
        let auth = authenticator(false).await;
        let token = auth
            .jwt()
            .generate_token(&UserId::parse("u1").unwrap())
            .unwrap();

        let user = auth.authenticate(&Credential::Token(token)).await.unwrap();
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn token_for_unknown_user_is_rejected() {
        let auth = authenticator(false).await;
        let token = auth
            .jwt()
            .generate_token(&UserId::parse("ghost").unwrap())
            .unwrap();

        let err = auth.authenticate(&Credential::Token(token)).await.unwrap_err();
        assert_eq!(err, AuthError::UnknownUser);
    }

    #[tokio::test]
    async fn token_signed_with_other_secret_is_rejected() {
        let auth = authenticator(false).await;
        let other = JwtService::new(&AuthConfig {
            jwt_secret: "another-secret-that-is-long-enough-1234".into(),
            ..AuthConfig::default()
        });
        let token = other.generate_token(&UserId::parse("u1").unwrap()).unwrap();

        let err = auth.authenticate(&Credential::Token(token)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let auth = authenticator(false).await;
        let expired = JwtService::new(&AuthConfig {
            token_ttl_hours: -2,
            ..AuthConfig::default()
        });
        let token = expired.generate_token(&UserId::parse("u1").unwrap()).unwrap();

        let err = auth.authenticate(&Credential::Token(token)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn user_id_handshake_follows_configuration() {
        let strict = authenticator(false).await;
        assert_eq!(
            strict
                .authenticate(&Credential::UserId("u1".into()))
                .await
                .unwrap_err(),
            AuthError::UserIdHandshakeDisabled
        );

        let dev = authenticator(true).await;
        let user = dev
            .authenticate(&Credential::UserId("u1".into()))
            .await
            .unwrap();
        assert_eq!(user.user_id.as_str(), "u1");
        assert_eq!(
            dev.authenticate(&Credential::UserId("nobody".into()))
                .await
                .unwrap_err(),
            AuthError::UnknownUser
        );
    }
}
