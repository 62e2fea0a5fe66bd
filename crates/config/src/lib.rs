//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - HTTP/WebSocket 监听地址
//! - 数据库连接（可选，缺省时使用内存存储）
//! - 握手认证
//! - 实时推送参数
//! - 日志过滤
//!
//! 加载顺序：内置默认值 → YAML 配置文件 → `CHAT_` 前缀环境变量（`__` 分隔层级）。

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHAT_";
/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "CHAT_CONFIG";
/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const DEV_JWT_SECRET: &str = "dev-secret-key-not-for-production-use-minimum-32-chars";

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 认证配置
    pub auth: AuthConfig,
    /// 实时推送配置
    pub realtime: RealtimeConfig,
    /// 日志配置
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 为空时使用进程内存储
    pub url: Option<String>,
    pub max_connections: u32,
    /// 内存存储启动时导入的 JSON 初始数据
    pub seed_file: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            seed_file: None,
        }
    }
}

/// 认证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 签名密钥
    pub jwt_secret: String,
    /// 签发令牌的有效期（小时）
    pub token_ttl_hours: i64,
    /// 是否接受仅携带 `userId` 的握手，要求开启 `development_mode`
    pub allow_user_id_handshake: bool,
    /// 开发模式：允许内置开发密钥与 `userId` 握手
    pub development_mode: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_hours: 24,
            allow_user_id_handshake: false,
            development_mode: false,
        }
    }
}

impl AuthConfig {
    /// 内置开发密钥或明显的占位密钥
    pub fn uses_development_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
            || self.jwt_secret.contains("dev-secret")
            || self.jwt_secret.contains("not-for-production")
            || self.jwt_secret.contains("please-change")
    }
}

/// 实时推送配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// 每个连接的待发送队列容量，队列满时丢弃该连接的新帧
    pub outbound_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `RUST_LOG` 未设置时使用的过滤表达式
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,tower_http=debug".to_string(),
        }
    }
}

impl AppConfig {
    /// 构建配置来源：默认值、YAML 文件、环境变量
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["config"]))
    }

    /// 从 `CHAT_CONFIG` 指定的文件（默认 `config.yaml`）与环境变量加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证JWT密钥长度（至少256位/32字节）
        if self.auth.jwt_secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.auth.uses_development_secret() && !self.auth.development_mode {
            return Err(ConfigError::InvalidJwtSecret(
                "Cannot use development JWT secret outside development mode".to_string(),
            ));
        }

        if self.auth.allow_user_id_handshake && !self.auth.development_mode {
            return Err(ConfigError::InvalidAuthConfig(
                "userId handshake requires development mode".to_string(),
            ));
        }

        if self.auth.token_ttl_hours <= 0 {
            return Err(ConfigError::InvalidAuthConfig(
                "token TTL must be positive".to_string(),
            ));
        }

        if self.realtime.outbound_capacity == 0 {
            return Err(ConfigError::InvalidRealtimeConfig(
                "outbound capacity must be greater than 0".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.database.url, Some(url) if url.trim().is_empty()) {
            return Err(ConfigError::InvalidDatabaseConfig(
                "Database URL cannot be blank".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid auth configuration: {0}")]
    InvalidAuthConfig(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid realtime configuration: {0}")]
    InvalidRealtimeConfig(String),
}
