use std::collections::HashSet;
use std::sync::Arc;

use application::{Clock, ConversationStore, CreatedMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ConversationId, FileMetadata, Message, MessageContent, MessageId, MessageType, NewMessage,
    OnlineStatus, RepositoryError, Timestamp, User, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

/// 外键约束冲突
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
            return RepositoryError::NotFound;
        }
    }
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    display_name: String,
    online_status: String,
    last_seen: Option<DateTime<Utc>>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let online_status = value
            .online_status
            .parse::<OnlineStatus>()
            .map_err(|err| invalid_data(err.to_string()))?;
        Ok(User {
            id: UserId::from(value.id),
            display_name: value.display_name,
            online_status,
            last_seen: value.last_seen,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: String,
    file_url: Option<String>,
    file_name: Option<String>,
    file_size: Option<i64>,
    created_at: DateTime<Utc>,
    seq: i64,
    is_read: bool,
    client_message_id: Option<String>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        // 长度在写入前已校验
        let content = MessageContent::parse(value.content, usize::MAX)
            .map_err(|err| invalid_data(err.to_string()))?;
        let message_type = value
            .message_type
            .parse::<MessageType>()
            .map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            content,
            message_type,
            file: FileMetadata {
                file_url: value.file_url,
                file_name: value.file_name,
                file_size: value.file_size,
            },
            created_at: value.created_at,
            sequence: value.seq,
            is_read: value.is_read,
            client_message_id: value.client_message_id,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, message_type, file_url, \
     file_name, file_size, created_at, seq, is_read, client_message_id";

/// 基于 PostgreSQL 的会话存储
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgConversationStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn find_by_client_token(
        &self,
        message: &NewMessage,
        token: &str,
    ) -> Result<Option<Message>, RepositoryError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = $1 AND sender_id = $2 AND client_message_id = $3"
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(message.conversation_id))
            .bind(Uuid::from(message.sender_id))
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(Message::try_from).transpose()
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn find_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<HashSet<UserId>, RepositoryError> {
        let id = Uuid::from(conversation_id);
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM conversations WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        if !exists {
            return Err(RepositoryError::NotFound);
        }

        let rows: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(UserId::from).collect())
    }

    async fn create_message(&self, message: NewMessage) -> Result<CreatedMessage, RepositoryError> {
        // created_at 在同一会话内不回退，seq 由序列严格递增分配
        let sql = format!(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, content, message_type,
                file_url, file_name, file_size, created_at, client_message_id
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8,
                GREATEST(
                    $9,
                    COALESCE(
                        (SELECT MAX(created_at) FROM messages WHERE conversation_id = $2),
                        $9
                    )
                ),
                $10
            )
            ON CONFLICT (conversation_id, sender_id, client_message_id)
                WHERE client_message_id IS NOT NULL
                DO NOTHING
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(Uuid::from(message.conversation_id))
            .bind(Uuid::from(message.sender_id))
            .bind(message.content.as_str())
            .bind(message.message_type.as_str())
            .bind(message.file.file_url.as_deref())
            .bind(message.file.file_name.as_deref())
            .bind(message.file.file_size)
            .bind(self.clock.now())
            .bind(message.client_message_id.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if let Some(record) = record {
            return Ok(CreatedMessage {
                message: Message::try_from(record)?,
                created: true,
            });
        }

        // 只有幂等令牌冲突时才会没有返回行
        let token = message
            .client_message_id
            .as_deref()
            .ok_or(RepositoryError::Conflict)?;
        let existing = self
            .find_by_client_token(&message, token)
            .await?
            .ok_or(RepositoryError::Conflict)?;
        Ok(CreatedMessage {
            message: existing,
            created: false,
        })
    }

    async fn touch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET updated_at = GREATEST(updated_at, $2) WHERE id = $1",
        )
        .bind(Uuid::from(conversation_id))
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_user_presence(
        &self,
        user_id: UserId,
        status: OnlineStatus,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE users SET online_status = $2, last_seen = $3 WHERE id = $1")
                .bind(Uuid::from(user_id))
                .bind(status.as_str())
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_messages_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        message_ids: Option<Vec<MessageId>>,
    ) -> Result<u64, RepositoryError> {
        let ids: Option<Vec<Uuid>> =
            message_ids.map(|ids| ids.into_iter().map(Uuid::from).collect());
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_read = TRUE
            WHERE conversation_id = $1
              AND sender_id <> $2
              AND is_read = FALSE
              AND ($3::uuid[] IS NULL OR id = ANY($3))
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(reader))
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, display_name, online_status, last_seen FROM users WHERE id = $1",
        )
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
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
