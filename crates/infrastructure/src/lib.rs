//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储与 JWT 认证器，实现应用层定义的接口。

pub mod auth;
pub mod migrations;
pub mod repository;

pub use auth::{Claims, JwtAuthenticator, JwtService};
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgConversationRepository, PgMessageRepository, PgStorage, PgUserRepository,
};
