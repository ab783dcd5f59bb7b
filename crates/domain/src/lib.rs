//! 实时会话子系统的核心领域模型
//!
//! 包含用户、会话、消息等实体，标识符值对象，以及客户端与服务器之间的事件协议。

pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::{Conversation, ConversationType};
pub use errors::{DomainError, RepositoryError};
pub use events::{ClientRequest, MessagePreview, SenderSummary, ServerEvent};
pub use message::{FileMetadata, Message, MessageContent, MessageType, NewMessage};
pub use user::{OnlineStatus, User};
pub use value_objects::{ConnectionId, ConversationId, MessageId, Timestamp, UserId};
