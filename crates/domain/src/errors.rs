//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 消息内容为空
    #[error("消息内容为空")]
    EmptyContent,

    /// 消息内容超过长度上限
    #[error("消息内容过长: {length} > {max}")]
    ContentTooLong { length: usize, max: usize },

    /// 未知的消息类型
    #[error("未知的消息类型: {0}")]
    UnknownMessageType(String),

    /// 未知的在线状态
    #[error("未知的在线状态: {0}")]
    UnknownStatus(String),

    /// 参数不合法
    #[error("参数不合法: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 持久化层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("记录不存在")]
    NotFound,

    #[error("记录冲突")]
    Conflict,

    #[error("存储错误: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
