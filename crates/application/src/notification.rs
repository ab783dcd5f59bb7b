//! 离线通知分发
//!
//! 新消息广播之后，对每个未订阅该会话房间的参与者（发送者除外）：
//! 有存活连接则推送到其个人通道；一条都没有则交给通知钩子。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ConversationId, Message, MessagePreview, SenderSummary, ServerEvent, UserId};

use crate::error::ApplicationError;
use crate::registry::ConnectionRegistry;
use crate::repository::ConversationStore;
use crate::rooms::RoomBroadcaster;

/// 一条错过的消息通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineNotification {
    pub recipient_id: UserId,
    pub conversation_id: ConversationId,
    pub message: MessagePreview,
    pub sender: SenderSummary,
}

impl OfflineNotification {
    pub fn into_event(self) -> ServerEvent {
        ServerEvent::MessageNotification {
            conversation_id: self.conversation_id,
            message: self.message,
            sender: self.sender,
            recipient_id: self.recipient_id,
        }
    }
}

/// 完全离线用户的通知出口（推送、邮件等由实现方决定）
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NotificationHook: Send + Sync {
    async fn notify_missed(&self, notification: &OfflineNotification)
        -> Result<(), ApplicationError>;
}

/// 单次分发结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// 通过个人通道收到通知的用户
    pub notified: Vec<UserId>,
    /// 没有任何存活连接、交给钩子的用户
    pub missed: Vec<UserId>,
}

pub struct OfflineNotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomBroadcaster>,
    store: Arc<dyn ConversationStore>,
    hook: Arc<dyn NotificationHook>,
    preview_length: usize,
}

impl OfflineNotificationDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomBroadcaster>,
        store: Arc<dyn ConversationStore>,
        hook: Arc<dyn NotificationHook>,
        preview_length: usize,
    ) -> Self {
        Self {
            registry,
            rooms,
            store,
            hook,
            preview_length,
        }
    }

    /// 分发失败只记录日志，不影响消息本身
    pub async fn dispatch(
        &self,
        message: &Message,
        participants: &HashSet<UserId>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut sender: Option<SenderSummary> = None;

        for &recipient_id in participants {
            if recipient_id == message.sender_id
                || self
                    .rooms
                    .is_user_subscribed(message.conversation_id, recipient_id)
            {
                continue;
            }

            if sender.is_none() {
                sender = Some(self.sender_summary(message.sender_id).await);
            }
            let notification = OfflineNotification {
                recipient_id,
                conversation_id: message.conversation_id,
                message: MessagePreview {
                    id: message.id,
                    content: message.content.preview(self.preview_length),
                    message_type: message.message_type,
                },
                sender: sender.clone().unwrap_or_else(|| SenderSummary {
                    id: message.sender_id,
                    name: message.sender_id.to_string(),
                }),
            };

            let delivered = self
                .registry
                .send_to_user(recipient_id, &notification.clone().into_event());
            if delivered > 0 {
                tracing::debug!(
                    conversation_id = %message.conversation_id,
                    recipient_id = %recipient_id,
                    delivered,
                    "已推送消息通知"
                );
                report.notified.push(recipient_id);
                continue;
            }

            if let Err(err) = self.hook.notify_missed(&notification).await {
                tracing::warn!(
                    conversation_id = %message.conversation_id,
                    recipient_id = %recipient_id,
                    error = %err,
                    "离线通知钩子执行失败"
                );
            }
            report.missed.push(recipient_id);
        }

        report
    }

    async fn sender_summary(&self, sender_id: UserId) -> SenderSummary {
        let name = match self.store.find_user(sender_id).await {
            Ok(Some(user)) => user.display_name,
            Ok(None) => sender_id.to_string(),
            Err(err) => {
                tracing::warn!(user_id = %sender_id, error = %err, "发送者信息查询失败");
                sender_id.to_string()
            }
        };
        SenderSummary {
            id: sender_id,
            name,
        }
    }
}
