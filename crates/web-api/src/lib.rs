//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 实时通道与 REST 写路径，均委托给应用层。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{bearer_token, handshake_credential, AuthUser, HandshakeQuery};
pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, Repositories};
