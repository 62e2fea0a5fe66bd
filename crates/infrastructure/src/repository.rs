use std::sync::Arc;

use application::repository::{
    ConversationCreation, ConversationRepository, MessageRepository, ParticipantAddition,
    UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::conversation::last_message_preview;
use domain::{
    Conversation, ConversationId, Message, MessageContent, MessageId, MessageType, NewMessage,
    ReactionAction, ReactionKind, ReactionUpdate, Reactions, RepositoryError, UserId, UserSummary,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgConnection, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: String,
    username: String,
    avatar: Option<String>,
}

impl TryFrom<UserRecord> for UserSummary {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let user_id = UserId::parse(value.id).map_err(|err| invalid_data(err.to_string()))?;
        Ok(UserSummary::new(user_id, value.username, value.avatar))
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: String,
    title: Option<String>,
    last_message_text: Option<String>,
    last_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    fn into_conversation(
        self,
        participants: Vec<UserSummary>,
    ) -> Result<Conversation, RepositoryError> {
        Ok(Conversation {
            id: ConversationId::parse(self.id).map_err(|err| invalid_data(err.to_string()))?,
            participants,
            title: self.title,
            last_message_text: self.last_message_text,
            last_message_at: self.last_message_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: String,
    conversation_id: String,
    message_type: String,
    content: String,
    like_count: i32,
    love_count: i32,
    laugh_count: i32,
    created_at: DateTime<Utc>,
    sender_id: Option<String>,
    sender_username: Option<String>,
    sender_avatar: Option<String>,
}

fn count(value: i32) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| invalid_data(format!("negative reaction count {value}")))
}

fn reactions(like: i32, love: i32, laugh: i32) -> Result<Reactions, RepositoryError> {
    Ok(Reactions {
        like: count(like)?,
        love: count(love)?,
        laugh: count(laugh)?,
    })
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let sender = match (value.sender_id, value.sender_username) {
            (Some(id), Some(username)) => Some(UserSummary::try_from(UserRecord {
                id,
                username,
                avatar: value.sender_avatar,
            })?),
            _ => None,
        };

        Ok(Message {
            id: MessageId::parse(value.id).map_err(|err| invalid_data(err.to_string()))?,
            conversation_id: ConversationId::parse(value.conversation_id)
                .map_err(|err| invalid_data(err.to_string()))?,
            sender,
            message_type: value
                .message_type
                .parse::<MessageType>()
                .map_err(|err| invalid_data(err.to_string()))?,
            content: MessageContent::new(value.content)
                .map_err(|err| invalid_data(err.to_string()))?,
            reactions: reactions(value.like_count, value.love_count, value.laugh_count)?,
            timestamp: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReactionRecord {
    id: String,
    conversation_id: String,
    like_count: i32,
    love_count: i32,
    laugh_count: i32,
}

const SELECT_MESSAGE: &str = r#"
    SELECT m.id, m.conversation_id, m.message_type, m.content,
           m.like_count, m.love_count, m.laugh_count, m.created_at,
           u.id AS sender_id, u.username AS sender_username, u.avatar AS sender_avatar
    FROM messages m
    LEFT JOIN users u ON u.id = m.sender_id
"#;

async fn load_conversation(
    conn: &mut PgConnection,
    conversation_id: &str,
) -> Result<Option<Conversation>, RepositoryError> {
    let record = sqlx::query_as::<_, ConversationRecord>(
        r#"
        SELECT id, title, last_message_text, last_message_at, created_at, updated_at
        FROM conversations WHERE id = $1
        "#,
    )
    .bind(conversation_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_err)?;

    match record {
        Some(record) => {
            let participants = load_participants(conn, conversation_id).await?;
            record.into_conversation(participants).map(Some)
        }
        None => Ok(None),
    }
}

/// 参与者集合与 `ids`（已排序去重）完全相同的会话
async fn find_by_participant_set(
    conn: &mut PgConnection,
    ids: &[String],
) -> Result<Option<String>, RepositoryError> {
    sqlx::query_scalar(
        r#"
        SELECT conversation_id
        FROM conversation_participants
        GROUP BY conversation_id
        HAVING COUNT(*) = $2
           AND COUNT(*) FILTER (WHERE user_id = ANY($1)) = $2
        LIMIT 1
        "#,
    )
    .bind(ids)
    .bind(ids.len() as i64)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_err)
}

async fn load_participants(
    conn: &mut PgConnection,
    conversation_id: &str,
) -> Result<Vec<UserSummary>, RepositoryError> {
    let records = sqlx::query_as::<_, UserRecord>(
        r#"
        SELECT u.id, u.username, u.avatar
        FROM conversation_participants p
        JOIN users u ON u.id = p.user_id
        WHERE p.conversation_id = $1
        ORDER BY p.position
        "#,
    )
    .bind(conversation_id)
    .fetch_all(conn)
    .await
    .map_err(map_sqlx_err)?;

    records.into_iter().map(UserSummary::try_from).collect()
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 写入或更新用户展示信息
    pub async fn upsert(&self, user: &UserSummary) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, avatar)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET username = EXCLUDED.username, avatar = EXCLUDED.avatar
            "#,
        )
        .bind(user.user_id.as_str())
        .bind(&user.username)
        .bind(user.avatar.as_deref())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserSummary>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username, avatar FROM users WHERE id = $1"#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(UserSummary::try_from).transpose()
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<UserSummary>, RepositoryError> {
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let records = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username, avatar FROM users WHERE id = ANY($1)"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(UserSummary::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create_unless_exists(
        &self,
        conversation: Conversation,
    ) -> Result<ConversationCreation, RepositoryError> {
        let mut ids: Vec<String> = conversation
            .participants
            .iter()
            .map(|p| p.user_id.to_string())
            .collect();
        ids.sort();
        ids.dedup();

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 同一组参与者的创建串行执行，锁随事务结束释放
        sqlx::query(r#"SELECT pg_advisory_xact_lock(hashtext($1))"#)
            .bind(ids.join(","))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        if let Some(existing_id) = find_by_participant_set(&mut tx, &ids).await? {
            let existing = load_conversation(&mut tx, &existing_id)
                .await?
                .ok_or(RepositoryError::NotFound)?;
            tx.commit().await.map_err(map_sqlx_err)?;
            return Ok(ConversationCreation {
                conversation: existing,
                created: false,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, last_message_text, last_message_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(conversation.title.as_deref())
        .bind(conversation.last_message_text.as_deref())
        .bind(conversation.last_message_at)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for participant in &conversation.participants {
            sqlx::query(
                r#"INSERT INTO conversation_participants (conversation_id, user_id) VALUES ($1, $2)"#,
            )
            .bind(conversation.id.as_str())
            .bind(participant.user_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(ConversationCreation {
            conversation,
            created: true,
        })
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_err)?;
        load_conversation(&mut conn, id.as_str()).await
    }

    async fn participants(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<UserSummary>, RepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_err)?;
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1)"#)
                .bind(id.as_str())
                .fetch_one(&mut *conn)
                .await
                .map_err(map_sqlx_err)?;
        if !exists {
            return Err(RepositoryError::NotFound);
        }

        load_participants(&mut conn, id.as_str()).await
    }

    async fn add_participant_if_absent(
        &self,
        id: &ConversationId,
        user: &UserSummary,
    ) -> Result<ParticipantAddition, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 锁住会话行，同一会话的成员变更串行执行
        let locked: Option<String> =
            sqlx::query_scalar(r#"SELECT id FROM conversations WHERE id = $1 FOR UPDATE"#)
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        if locked.is_none() {
            return Err(RepositoryError::NotFound);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (conversation_id, user_id) DO NOTHING
            "#,
        )
        .bind(id.as_str())
        .bind(user.user_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();

        let added = inserted == 1;
        if added {
            sqlx::query(r#"UPDATE conversations SET updated_at = NOW() WHERE id = $1"#)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }

        let participants = load_participants(&mut tx, id.as_str()).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(ParticipantAddition {
            added,
            participants,
        })
    }

    async fn record_last_message(&self, message: &Message) -> Result<(), RepositoryError> {
        let Some(preview) = last_message_preview(message) else {
            return Ok(());
        };

        let updated = sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_text = $2, last_message_at = $3, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(message.conversation_id.as_str())
        .bind(preview)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(
        &self,
        conversation_id: &ConversationId,
        sender_id: Option<&UserId>,
        message_type: MessageType,
        content: &MessageContent,
    ) -> Result<(MessageId, DateTime<Utc>), RepositoryError> {
        let id = MessageId::generate();
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, message_type, content)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING created_at
            "#,
        )
        .bind(id.as_str())
        .bind(conversation_id.as_str())
        .bind(sender_id.map(UserId::as_str))
        .bind(message_type.as_str())
        .bind(content.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok((id, created_at))
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let (id, created_at) = self
            .insert(
                &message.conversation_id,
                Some(&message.sender.user_id),
                message.message_type,
                &message.content,
            )
            .await?;
        Ok(Message::from_new(id, message, created_at))
    }

    async fn create_system_message(
        &self,
        conversation_id: &ConversationId,
        content: MessageContent,
    ) -> Result<Message, RepositoryError> {
        let (id, created_at) = self
            .insert(conversation_id, None, MessageType::System, &content)
            .await?;
        Ok(Message::system(id, conversation_id.clone(), content, created_at))
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        let sql = format!("{SELECT_MESSAGE} WHERE m.id = $1");
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn update_reaction(
        &self,
        id: &MessageId,
        kind: ReactionKind,
        action: ReactionAction,
    ) -> Result<ReactionUpdate, RepositoryError> {
        let column = match kind {
            ReactionKind::Like => "like_count",
            ReactionKind::Love => "love_count",
            ReactionKind::Laugh => "laugh_count",
        };
        let assignment = match action {
            ReactionAction::Increment => format!("{column} = {column} + 1"),
            ReactionAction::Decrement => format!("{column} = GREATEST({column} - 1, 0)"),
        };
        let sql = format!(
            "UPDATE messages SET {assignment} WHERE id = $1 \
             RETURNING id, conversation_id, like_count, love_count, laugh_count"
        );

        let record = sqlx::query_as::<_, ReactionRecord>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(RepositoryError::NotFound)?;

        Ok(ReactionUpdate {
            message_id: MessageId::parse(record.id).map_err(|err| invalid_data(err.to_string()))?,
            conversation_id: ConversationId::parse(record.conversation_id)
                .map_err(|err| invalid_data(err.to_string()))?,
            reactions: reactions(record.like_count, record.love_count, record.laugh_count)?,
        })
    }
}

/// PostgreSQL 仓储集合
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
