use std::fmt;

use domain::{ConnectionId, ConversationId, DomainError, RepositoryError, ServerEvent, UserId};
use thiserror::Error;

/// 需要经过授权闸门的房间级操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomOperation {
    Join,
    Leave,
    SendMessage,
    MarkAsRead,
    Typing,
}

impl fmt::Display for RoomOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoomOperation::Join => "join",
            RoomOperation::Leave => "leave",
            RoomOperation::SendMessage => "send_message",
            RoomOperation::MarkAsRead => "mark_as_read",
            RoomOperation::Typing => "typing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplicationError {
    /// 连接没有可解析的身份，整条连接被拒绝
    #[error("authentication required")]
    AuthenticationMissing,
    #[error("user {user_id} may not {operation} in conversation {conversation_id}")]
    AuthorizationDenied {
        user_id: UserId,
        conversation_id: ConversationId,
        operation: RoomOperation,
    },
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] DomainError),
    /// 可重试：客户端应重新提交
    #[error("persistence failed: {message}")]
    PersistenceFailed { message: String },
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

impl ApplicationError {
    pub fn persistence(message: impl Into<String>) -> Self {
        ApplicationError::PersistenceFailed {
            message: message.into(),
        }
    }

    /// 下发给客户端的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::AuthenticationMissing => "AUTHENTICATION_MISSING",
            ApplicationError::AuthorizationDenied { .. } => "AUTHORIZATION_DENIED",
            ApplicationError::ValidationFailed(_) => "VALIDATION_FAILED",
            ApplicationError::PersistenceFailed { .. } => "PERSISTENCE_FAILED",
            ApplicationError::ConnectionClosed(_) => "CONNECTION_CLOSED",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplicationError::PersistenceFailed { .. })
    }

    /// 转换为只发给请求方的错误事件
    pub fn to_event(&self, conversation_id: Option<ConversationId>) -> ServerEvent {
        let reason = match self {
            // 不向客户端暴露存储细节
            ApplicationError::PersistenceFailed { .. } => {
                "temporarily unable to store the request, please retry".to_string()
            }
            other => other.to_string(),
        };
        ServerEvent::Error {
            code: self.code().to_string(),
            reason,
            retryable: self.is_retryable(),
            conversation_id,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::persistence(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_persistence_failures_are_retryable() {
        let denied = ApplicationError::AuthorizationDenied {
            user_id: UserId::random(),
            conversation_id: ConversationId::random(),
            operation: RoomOperation::Join,
        };
        assert!(!denied.is_retryable());
        assert!(!ApplicationError::from(DomainError::EmptyContent).is_retryable());
        assert!(ApplicationError::from(RepositoryError::storage("db down")).is_retryable());
    }

    #[test]
    fn persistence_event_hides_storage_details() {
        let err = ApplicationError::from(RepositoryError::storage("password authentication failed"));
        match err.to_event(None) {
            ServerEvent::Error {
                code,
                reason,
                retryable,
                ..
            } => {
                assert_eq!(code, "PERSISTENCE_FAILED");
                assert!(retryable);
                assert!(!reason.contains("password"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
