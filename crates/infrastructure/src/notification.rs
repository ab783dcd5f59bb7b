use application::{ApplicationError, NotificationHook, OfflineNotification};
use async_trait::async_trait;

/// 只写日志的离线通知钩子。
///
/// 接入推送或邮件服务之前的默认实现。
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationHook;

#[async_trait]
impl NotificationHook for LoggingNotificationHook {
    async fn notify_missed(
        &self,
        notification: &OfflineNotification,
    ) -> Result<(), ApplicationError> {
        tracing::info!(
            recipient_id = %notification.recipient_id,
            conversation_id = %notification.conversation_id,
            message_id = %notification.message.id,
            sender = %notification.sender.name,
            "用户离线，记录错过的消息"
        );
        Ok(())
    }
}
