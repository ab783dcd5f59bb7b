//! 实时事件协议
//!
//! 客户端请求与服务器事件都是封闭的带标签枚举，帧格式为
//! `{"event": "<snake_case 名称>", "data": { ...camelCase 字段... }}`。
//! 请求中不包含任何发送者身份字段，身份只来自已认证的连接。

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageType};
use crate::user::OnlineStatus;
use crate::value_objects::{ConnectionId, ConversationId, MessageId, Timestamp, UserId};

/// 客户端发往服务器的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientRequest {
    JoinConversation {
        conversation_id: ConversationId,
    },
    LeaveConversation {
        conversation_id: ConversationId,
    },
    SendMessage {
        conversation_id: ConversationId,
        content: String,
        /// 缺省为 `text`，未知取值在消息管道中被拒绝
        #[serde(rename = "type", default)]
        message_type: Option<String>,
        #[serde(default)]
        file_url: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        file_size: Option<i64>,
        /// 客户端生成的幂等令牌
        #[serde(default)]
        client_message_id: Option<String>,
    },
    TypingStart {
        conversation_id: ConversationId,
    },
    TypingStop {
        conversation_id: ConversationId,
    },
    MarkAsRead {
        conversation_id: ConversationId,
        /// 缺省表示“该会话内全部未读”
        #[serde(default)]
        message_ids: Option<Vec<MessageId>>,
    },
    UpdatePresence {
        status: String,
    },
    Ping,
}

impl ClientRequest {
    /// 请求的事件名，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::JoinConversation { .. } => "join_conversation",
            ClientRequest::LeaveConversation { .. } => "leave_conversation",
            ClientRequest::SendMessage { .. } => "send_message",
            ClientRequest::TypingStart { .. } => "typing_start",
            ClientRequest::TypingStop { .. } => "typing_stop",
            ClientRequest::MarkAsRead { .. } => "mark_as_read",
            ClientRequest::UpdatePresence { .. } => "update_presence",
            ClientRequest::Ping => "ping",
        }
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            ClientRequest::JoinConversation { conversation_id }
            | ClientRequest::LeaveConversation { conversation_id }
            | ClientRequest::SendMessage {
                conversation_id, ..
            }
            | ClientRequest::TypingStart { conversation_id }
            | ClientRequest::TypingStop { conversation_id }
            | ClientRequest::MarkAsRead {
                conversation_id, ..
            } => Some(*conversation_id),
            ClientRequest::UpdatePresence { .. } | ClientRequest::Ping => None,
        }
    }
}

/// 离线通知中的消息摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub id: MessageId,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

/// 离线通知中的发送者摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderSummary {
    pub id: UserId,
    pub name: String,
}

/// 服务器推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// 连接建立后的第一帧
    Connected {
        user_id: UserId,
        connection_id: ConnectionId,
        typing_timeout_seconds: u64,
    },
    JoinedConversation {
        conversation_id: ConversationId,
    },
    LeftConversation {
        conversation_id: ConversationId,
    },
    NewMessage {
        message: Message,
        conversation_id: ConversationId,
    },
    UserTyping {
        user_id: UserId,
        conversation_id: ConversationId,
        is_typing: bool,
    },
    MessagesRead {
        conversation_id: ConversationId,
        user_id: UserId,
        message_ids: Option<Vec<MessageId>>,
    },
    PresenceUpdated {
        user_id: UserId,
        status: OnlineStatus,
        timestamp: Timestamp,
    },
    UserOnline {
        user_id: UserId,
        timestamp: Timestamp,
    },
    UserOffline {
        user_id: UserId,
        timestamp: Timestamp,
    },
    /// 发给未订阅该会话房间的参与者个人通道
    MessageNotification {
        conversation_id: ConversationId,
        message: MessagePreview,
        sender: SenderSummary,
        recipient_id: UserId,
    },
    Pong,
    /// 只发给请求方，不广播
    Error {
        code: String,
        reason: String,
        retryable: bool,
        conversation_id: Option<ConversationId>,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::JoinedConversation { .. } => "joined_conversation",
            ServerEvent::LeftConversation { .. } => "left_conversation",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::MessagesRead { .. } => "messages_read",
            ServerEvent::PresenceUpdated { .. } => "presence_updated",
            ServerEvent::UserOnline { .. } => "user_online",
            ServerEvent::UserOffline { .. } => "user_offline",
            ServerEvent::MessageNotification { .. } => "message_notification",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
