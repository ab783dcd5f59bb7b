//! 实时会话服务：连接生命周期与入站事件的统一入口
//!
//! 传输层只负责帧的收发，所有请求都经由 [`RealtimeService::handle`] 分派到各组件。

use std::sync::Arc;

use domain::{ClientRequest, ConversationId, FileMetadata, OnlineStatus, ServerEvent, UserId};
use tokio::sync::broadcast;

use crate::authorization::AuthorizationGate;
use crate::clock::Clock;
use crate::error::{ApplicationError, RoomOperation};
use crate::notification::{NotificationHook, OfflineNotificationDispatcher};
use crate::pipeline::{MessagePipeline, SendMessageRequest};
use crate::presence::{PresenceChannel, PresenceTracker};
use crate::receipts::ReadReceiptSynchronizer;
use crate::registry::{ConnectionHandle, ConnectionRegistry, EventSender};
use crate::repository::ConversationStore;
use crate::rooms::RoomBroadcaster;
use crate::typing::TypingChannel;

/// 运行参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    pub max_content_length: usize,
    pub presence_channel_capacity: usize,
    pub preview_length: usize,
    pub typing_timeout_seconds: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_content_length: 4000,
            presence_channel_capacity: 1024,
            preview_length: 100,
            typing_timeout_seconds: 8,
        }
    }
}

impl From<&config::ChatConfig> for ChatSettings {
    fn from(value: &config::ChatConfig) -> Self {
        Self {
            max_content_length: value.max_content_length,
            presence_channel_capacity: value.presence_channel_capacity,
            preview_length: value.preview_length,
            typing_timeout_seconds: value.typing_timeout_seconds,
        }
    }
}

pub struct RealtimeServiceDependencies {
    pub store: Arc<dyn ConversationStore>,
    pub clock: Arc<dyn Clock>,
    pub notification_hook: Arc<dyn NotificationHook>,
    pub settings: ChatSettings,
}

pub struct RealtimeService {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomBroadcaster>,
    gate: Arc<AuthorizationGate>,
    pipeline: MessagePipeline,
    presence: PresenceTracker,
    typing: TypingChannel,
    receipts: ReadReceiptSynchronizer,
    settings: ChatSettings,
}

impl RealtimeService {
    pub fn new(deps: RealtimeServiceDependencies) -> Self {
        let RealtimeServiceDependencies {
            store,
            clock,
            notification_hook,
            settings,
        } = deps;

        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomBroadcaster::new());
        let gate = Arc::new(AuthorizationGate::new(store.clone()));
        let dispatcher = Arc::new(OfflineNotificationDispatcher::new(
            registry.clone(),
            rooms.clone(),
            store.clone(),
            notification_hook,
            settings.preview_length,
        ));

        Self {
            pipeline: MessagePipeline::new(
                gate.clone(),
                store.clone(),
                rooms.clone(),
                dispatcher,
                settings.max_content_length,
            ),
            presence: PresenceTracker::new(
                store.clone(),
                registry.clone(),
                clock,
                PresenceChannel::new(settings.presence_channel_capacity),
            ),
            typing: TypingChannel::new(gate.clone(), rooms.clone()),
            receipts: ReadReceiptSynchronizer::new(gate.clone(), store, rooms.clone()),
            registry,
            rooms,
            gate,
            settings,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomBroadcaster {
        &self.rooms
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// 订阅全局在线状态事件
    pub fn subscribe_presence(&self) -> broadcast::Receiver<ServerEvent> {
        self.presence.subscribe()
    }

    /// 注册一条已认证连接。没有身份时整条连接被拒绝。
    ///
    /// 成功后先推送 `connected`，再处理上线转换；连接不会自动加入任何房间。
    pub async fn connect(
        &self,
        identity: Option<UserId>,
        sender: EventSender,
    ) -> Result<ConnectionHandle, ApplicationError> {
        let user_id = identity.ok_or(ApplicationError::AuthenticationMissing)?;
        let registration = self.registry.register(user_id, sender);
        let handle = registration.handle;

        let greeting = ServerEvent::Connected {
            user_id,
            connection_id: handle.id(),
            typing_timeout_seconds: self.settings.typing_timeout_seconds,
        };
        if let Err(err) = handle.send(greeting) {
            self.registry.unregister(&handle);
            return Err(err);
        }

        if let Err(err) = self.presence.connection_opened(user_id).await {
            tracing::warn!(user_id = %user_id, error = %err, "上线状态写入失败");
        }
        Ok(handle)
    }

    /// 连接断开：退出所有房间；若是该用户最后一条连接则转为离线
    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        let left = self.rooms.leave_all(handle.id());
        let last_connection = self.registry.unregister(handle);
        tracing::info!(
            user_id = %handle.user_id(),
            connection_id = %handle.id(),
            rooms = left.len(),
            last_connection,
            "连接已断开"
        );

        if last_connection {
            if let Err(err) = self.presence.connection_closed(handle.user_id()).await {
                tracing::warn!(user_id = %handle.user_id(), error = %err, "离线状态写入失败");
            }
        }
    }

    /// 处理一条入站请求。失败时错误事件只发给该连接，连接保持打开。
    pub async fn handle(
        &self,
        connection: &ConnectionHandle,
        request: ClientRequest,
    ) -> Result<(), ApplicationError> {
        let kind = request.kind();
        let conversation_id = request.conversation_id();

        let result = self.execute(connection, request).await;
        if let Err(err) = &result {
            tracing::debug!(
                user_id = %connection.user_id(),
                connection_id = %connection.id(),
                request = kind,
                code = err.code(),
                "请求处理失败"
            );
            // 连接已关闭时无处可报
            let _ = connection.send(err.to_event(conversation_id));
        }
        result
    }

    async fn execute(
        &self,
        connection: &ConnectionHandle,
        request: ClientRequest,
    ) -> Result<(), ApplicationError> {
        match request {
            ClientRequest::JoinConversation { conversation_id } => {
                self.join(connection, conversation_id).await
            }
            ClientRequest::LeaveConversation { conversation_id } => {
                self.leave(connection, conversation_id).await
            }
            ClientRequest::SendMessage {
                conversation_id,
                content,
                message_type,
                file_url,
                file_name,
                file_size,
                client_message_id,
            } => {
                let request = SendMessageRequest {
                    conversation_id,
                    content,
                    message_type,
                    file: FileMetadata {
                        file_url,
                        file_name,
                        file_size,
                    },
                    client_message_id,
                };
                self.pipeline.submit(connection, request).await.map(|_| ())
            }
            ClientRequest::TypingStart { conversation_id } => self
                .typing
                .signal(connection, conversation_id, true)
                .await
                .map(|_| ()),
            ClientRequest::TypingStop { conversation_id } => self
                .typing
                .signal(connection, conversation_id, false)
                .await
                .map(|_| ()),
            ClientRequest::MarkAsRead {
                conversation_id,
                message_ids,
            } => self
                .receipts
                .mark_as_read(connection, conversation_id, message_ids)
                .await
                .map(|_| ()),
            ClientRequest::UpdatePresence { status } => {
                let status = status.parse::<OnlineStatus>()?;
                self.presence
                    .update_status(connection.user_id(), status)
                    .await
            }
            ClientRequest::Ping => connection.send(ServerEvent::Pong),
        }
    }

    async fn join(
        &self,
        connection: &ConnectionHandle,
        conversation_id: ConversationId,
    ) -> Result<(), ApplicationError> {
        self.gate
            .authorize(connection.user_id(), conversation_id, RoomOperation::Join)
            .await?;
        self.rooms.join(conversation_id, connection);
        connection.send(ServerEvent::JoinedConversation { conversation_id })
    }

    async fn leave(
        &self,
        connection: &ConnectionHandle,
        conversation_id: ConversationId,
    ) -> Result<(), ApplicationError> {
        let authorized = self
            .gate
            .authorize(connection.user_id(), conversation_id, RoomOperation::Leave)
            .await;
        // 已被移出会话的用户同样不应继续收到该房间的事件
        self.rooms.leave(conversation_id, connection.id());
        authorized?;
        connection.send(ServerEvent::LeftConversation { conversation_id })
    }
}
