//! 基础设施层实现。
//!
//! 提供 PostgreSQL 会话存储、数据库迁移与默认的离线通知钩子，实现应用层定义的接口。

pub mod builder;
pub mod migrations;
pub mod notification;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use notification::LoggingNotificationHook;
pub use repository::{create_pg_pool, PgConversationStore};
