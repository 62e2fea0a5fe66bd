//! 主应用程序入口
//!
//! 加载配置、选择存储后端，启动 Axum 实时服务。

use std::sync::Arc;

use anyhow::Context;
use application::{InMemoryStore, SeedData};
use config::{AppConfig, DatabaseConfig};
use infrastructure::{create_pg_pool, JwtAuthenticator, PgStorage, MIGRATOR};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, Repositories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("加载配置失败")?;

    // RUST_LOG 优先于配置文件中的过滤器
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 校验已保证这两项只会在开发模式下出现
    if config.auth.development_mode {
        tracing::warn!("开发模式已开启，请勿用于生产环境");
        if config.auth.uses_development_secret() {
            tracing::warn!("正在使用开发用 JWT 密钥，生产环境请设置 CHAT_AUTH__JWT_SECRET");
        }
        if config.auth.allow_user_id_handshake {
            tracing::warn!("已启用 userId 握手");
        }
    }

    let repositories = build_repositories(&config.database).await?;
    let authenticator = Arc::new(JwtAuthenticator::new(
        &config.auth,
        repositories.users.clone(),
    ));
    let state = AppState::new(&config.realtime, repositories, authenticator);

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("无法监听 {address}"))?;

    tracing::info!("实时会话服务器启动在 http://{}", address);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

/// 配置了数据库地址则使用 PostgreSQL，否则使用内存存储
async fn build_repositories(database: &DatabaseConfig) -> anyhow::Result<Repositories> {
    if let Some(url) = database.url.as_deref() {
        tracing::info!(
            "连接数据库: {}",
            url.rsplit('@').next().unwrap_or("unknown")
        );
        let pool = create_pg_pool(url, database.max_connections)
            .await
            .context("创建数据库连接池失败")?;
        MIGRATOR.run(&pool).await.context("执行数据库迁移失败")?;

        let storage = PgStorage::new(pool);
        return Ok(Repositories {
            users: storage.user_repository,
            conversations: storage.conversation_repository,
            messages: storage.message_repository,
        });
    }

    tracing::warn!("未配置数据库，使用内存存储（重启后数据丢失）");
    let store = Arc::new(InMemoryStore::default());
    if let Some(path) = database.seed_file.as_deref() {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取初始数据文件失败: {path}"))?;
        let seed: SeedData = serde_json::from_str(&raw)
            .with_context(|| format!("解析初始数据文件失败: {path}"))?;
        let users = seed.users.len();
        let conversations = seed.conversations.len();
        store.load_seed(seed).await?;
        tracing::info!(users, conversations, "已导入初始数据");
    }

    Ok(Repositories {
        users: store.clone(),
        conversations: store.clone(),
        messages: store,
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号，开始优雅停机");
}
