use std::sync::Arc;

use domain::{ConversationId, MessageId, ServerEvent};

use crate::authorization::AuthorizationGate;
use crate::error::{ApplicationError, RoomOperation};
use crate::registry::ConnectionHandle;
use crate::repository::ConversationStore;
use crate::rooms::RoomBroadcaster;

/// 已读回执同步器
///
/// 只会标记他人发送的消息；已读消息再次标记是空操作，因此整个操作幂等。
pub struct ReadReceiptSynchronizer {
    gate: Arc<AuthorizationGate>,
    store: Arc<dyn ConversationStore>,
    rooms: Arc<RoomBroadcaster>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReceipt {
    /// 本次实际从未读变为已读的条数
    pub updated: u64,
    pub delivered: usize,
}

impl ReadReceiptSynchronizer {
    pub fn new(
        gate: Arc<AuthorizationGate>,
        store: Arc<dyn ConversationStore>,
        rooms: Arc<RoomBroadcaster>,
    ) -> Self {
        Self { gate, store, rooms }
    }

    pub async fn mark_as_read(
        &self,
        origin: &ConnectionHandle,
        conversation_id: ConversationId,
        message_ids: Option<Vec<MessageId>>,
    ) -> Result<ReadReceipt, ApplicationError> {
        let reader = origin.user_id();
        self.gate
            .authorize(reader, conversation_id, RoomOperation::MarkAsRead)
            .await?;

        if matches!(message_ids.as_deref(), Some([])) {
            return Ok(ReadReceipt {
                updated: 0,
                delivered: 0,
            });
        }

        let updated = self
            .store
            .mark_messages_read(conversation_id, reader, message_ids.clone())
            .await
            .map_err(|err| {
                tracing::error!(
                    conversation_id = %conversation_id,
                    user_id = %reader,
                    error = %err,
                    "已读状态写入失败"
                );
                ApplicationError::from(err)
            })?;

        // 包括读者自己的其他标签页，保持多端一致
        let event = ServerEvent::MessagesRead {
            conversation_id,
            user_id: reader,
            message_ids,
        };
        let delivered = self.rooms.broadcast(conversation_id, &event, None);

        tracing::debug!(
            conversation_id = %conversation_id,
            user_id = %reader,
            updated,
            "已读回执已同步"
        );
        Ok(ReadReceipt { updated, delivered })
    }
}
