//! 消息管道：发送消息的完整流程
//!
//! 授权 → 校验 → 持久化 → 更新会话时间 → 房间广播 → 离线通知分发。
//! 持久化失败时不广播，也不通知，错误只返回给发起连接。

use std::sync::Arc;

use dashmap::DashMap;
use domain::{
    ConversationId, DomainError, FileMetadata, Message, MessageContent, MessageType, NewMessage,
    ServerEvent, UserId,
};
use tokio::sync::Mutex;

use crate::authorization::AuthorizationGate;
use crate::error::{ApplicationError, RoomOperation};
use crate::notification::{DispatchReport, OfflineNotificationDispatcher};
use crate::registry::ConnectionHandle;
use crate::repository::ConversationStore;
use crate::rooms::RoomBroadcaster;

/// 已从帧中解析、尚未校验的发送请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub content: String,
    pub message_type: Option<String>,
    pub file: FileMetadata,
    pub client_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub message: Message,
    /// 房间内收到 `new_message` 的连接数
    pub delivered: usize,
    pub notifications: DispatchReport,
    /// 幂等令牌命中已有消息，本次未写入新数据
    pub duplicate: bool,
}

pub struct MessagePipeline {
    gate: Arc<AuthorizationGate>,
    store: Arc<dyn ConversationStore>,
    rooms: Arc<RoomBroadcaster>,
    dispatcher: Arc<OfflineNotificationDispatcher>,
    max_content_length: usize,
    ordering: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl MessagePipeline {
    pub fn new(
        gate: Arc<AuthorizationGate>,
        store: Arc<dyn ConversationStore>,
        rooms: Arc<RoomBroadcaster>,
        dispatcher: Arc<OfflineNotificationDispatcher>,
        max_content_length: usize,
    ) -> Self {
        Self {
            gate,
            store,
            rooms,
            dispatcher,
            max_content_length,
            ordering: DashMap::new(),
        }
    }

    pub async fn submit(
        &self,
        origin: &ConnectionHandle,
        request: SendMessageRequest,
    ) -> Result<SendOutcome, ApplicationError> {
        let sender_id = origin.user_id();
        let conversation_id = request.conversation_id;

        let participants = self
            .gate
            .authorize(sender_id, conversation_id, RoomOperation::SendMessage)
            .await?;
        let new_message = self.validate(sender_id, request)?;

        // 同一会话的“写入 + 广播”串行，广播顺序与存储顺序一致
        let lock = self.ordering.entry(conversation_id).or_default().clone();
        let guard = lock.lock().await;

        let created = self.store.create_message(new_message).await.map_err(|err| {
            tracing::error!(
                conversation_id = %conversation_id,
                sender_id = %sender_id,
                error = %err,
                "消息持久化失败"
            );
            ApplicationError::from(err)
        })?;
        let message = created.message;

        if !created.created {
            drop(guard);
            self.release_ordering(conversation_id, lock);
            tracing::info!(
                conversation_id = %conversation_id,
                message_id = %message.id,
                "重复提交，仅回执给发起连接"
            );
            let delivered = usize::from(
                origin
                    .send(ServerEvent::NewMessage {
                        message: message.clone(),
                        conversation_id,
                    })
                    .is_ok(),
            );
            return Ok(SendOutcome {
                message,
                delivered,
                notifications: DispatchReport::default(),
                duplicate: true,
            });
        }

        if let Err(err) = self.store.touch_conversation(conversation_id).await {
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %err,
                "会话更新时间写入失败"
            );
        }

        // 发送者自己也在房间内时同样收到，用作送达确认
        let delivered = self.rooms.broadcast(
            conversation_id,
            &ServerEvent::NewMessage {
                message: message.clone(),
                conversation_id,
            },
            None,
        );
        drop(guard);
        self.release_ordering(conversation_id, lock);

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            sequence = message.sequence,
            delivered,
            "消息已发送"
        );

        let notifications = self.dispatcher.dispatch(&message, &participants).await;
        Ok(SendOutcome {
            message,
            delivered,
            notifications,
            duplicate: false,
        })
    }

    /// 没有其他提交在等待时回收该会话的排序锁
    fn release_ordering(&self, conversation_id: ConversationId, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.ordering
            .remove_if(&conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn validate(
        &self,
        sender_id: UserId,
        request: SendMessageRequest,
    ) -> Result<NewMessage, ApplicationError> {
        let content = MessageContent::parse(request.content, self.max_content_length)?;
        let message_type = match request.message_type.as_deref() {
            None => MessageType::Text,
            Some(value) => value.parse::<MessageType>()?,
        };
        if matches!(request.file.file_size, Some(size) if size < 0) {
            return Err(DomainError::invalid_argument("fileSize", "must not be negative").into());
        }
        let client_message_id = request
            .client_message_id
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        Ok(NewMessage {
            conversation_id: request.conversation_id,
            sender_id,
            content,
            message_type,
            file: request.file,
            client_message_id,
        })
    }
}
