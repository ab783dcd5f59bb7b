use std::collections::HashSet;

use async_trait::async_trait;
use domain::{
    ConversationId, Message, MessageId, NewMessage, OnlineStatus, RepositoryError, Timestamp, User,
    UserId,
};

/// `create_message` 的结果。`created == false` 表示命中了幂等令牌，返回的是原消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedMessage {
    pub message: Message,
    pub created: bool,
}

/// 实时子系统对持久化存储的全部依赖
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 当前参与者集合，授权判断的唯一依据
    async fn find_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<HashSet<UserId>, RepositoryError>;

    /// 原子写入一条消息，由存储分配 `id`、`created_at` 与 `sequence`
    async fn create_message(&self, message: NewMessage) -> Result<CreatedMessage, RepositoryError>;

    /// 刷新会话的 `updated_at`
    async fn touch_conversation(&self, conversation_id: ConversationId)
        -> Result<(), RepositoryError>;

    async fn update_user_presence(
        &self,
        user_id: UserId,
        status: OnlineStatus,
        at: Timestamp,
    ) -> Result<(), RepositoryError>;

    /// 将 `reader` 收到的未读消息标记为已读，返回实际变更的条数。
    /// 自己发送的消息与已读消息不会被修改。`message_ids == None` 表示会话内全部。
    async fn mark_messages_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        message_ids: Option<Vec<MessageId>>,
    ) -> Result<u64, RepositoryError>;

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, RepositoryError>;
}
