use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    Code,
    Project,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::Code => "code",
            MessageType::Project => "project",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "code" => Ok(MessageType::Code),
            "project" => Ok(MessageType::Project),
            other => Err(DomainError::UnknownMessageType(other.to_owned())),
        }
    }
}

/// 消息正文内容，构造时完成非空与长度校验。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    /// `max_chars` 按字符数计，而不是字节数
    pub fn parse(value: impl Into<String>, max_chars: usize) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::EmptyContent);
        }
        let length = value.chars().count();
        if length > max_chars {
            return Err(DomainError::ContentTooLong {
                length,
                max: max_chars,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// 截取前 `max_chars` 个字符作为预览
    pub fn preview(&self, max_chars: usize) -> String {
        match self.0.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}…", &self.0[..idx]),
            None => self.0.clone(),
        }
    }
}

/// 附件元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
}

/// 已持久化的消息。
///
/// `created_at` 与 `sequence` 由存储层在写入时分配，`(created_at, sequence)` 即会话内的规范顺序。
/// 创建后只有 `is_read` 会被已读回执同步器修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(flatten)]
    pub file: FileMetadata,
    pub created_at: Timestamp,
    pub sequence: i64,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

impl Message {
    /// 规范排序键
    pub fn order_key(&self) -> (Timestamp, i64) {
        (self.created_at, self.sequence)
    }

    pub fn mark_read(&mut self) -> bool {
        let changed = !self.is_read;
        self.is_read = true;
        changed
    }
}

/// 待写入的消息。标识与时间戳由存储层分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub message_type: MessageType,
    pub file: FileMetadata,
    pub client_message_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_rejects_blank_and_oversized() {
        assert_eq!(MessageContent::parse("   ", 10), Err(DomainError::EmptyContent));
        assert_eq!(
            MessageContent::parse("hello world", 5),
            Err(DomainError::ContentTooLong { length: 11, max: 5 })
        );
        assert!(MessageContent::parse("你好", 2).is_ok());
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let content = MessageContent::parse("你好世界", 100).unwrap();
        assert_eq!(content.preview(2), "你好…");
        assert_eq!(content.preview(10), "你好世界");
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert_eq!("code".parse::<MessageType>().unwrap(), MessageType::Code);
        assert_eq!(
            "video".parse::<MessageType>(),
            Err(DomainError::UnknownMessageType("video".into()))
        );
    }
}
