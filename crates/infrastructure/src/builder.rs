use std::sync::Arc;

use application::{Clock, ConversationStore, MemoryConversationStore, NotificationHook};
use config::DatabaseConfig;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    notification::LoggingNotificationHook,
    repository::{create_pg_pool, PgConversationStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 组装好的基础设施适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub store: Arc<dyn ConversationStore>,
    pub notification_hook: Arc<dyn NotificationHook>,
}

impl Infrastructure {
    /// 配置了数据库地址时连接 PostgreSQL，否则使用内存存储
    pub async fn from_config(
        config: &DatabaseConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InfrastructureError> {
        match config.url.as_deref() {
            Some(url) => {
                Self::connect(url, config.max_connections, config.run_migrations, clock).await
            }
            None => {
                tracing::warn!("未配置数据库地址，使用内存存储，重启后数据丢失");
                Ok(Self::in_memory(clock))
            }
        }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        run_migrations: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(database_url, max_connections).await?;
        if run_migrations {
            MIGRATOR.run(&pool).await?;
            tracing::info!("数据库迁移完成");
        }

        Ok(Self {
            store: Arc::new(PgConversationStore::new(pool, clock)),
            notification_hook: Arc::new(LoggingNotificationHook),
        })
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(MemoryConversationStore::new(clock)),
            notification_hook: Arc::new(LoggingNotificationHook),
        }
    }
}
