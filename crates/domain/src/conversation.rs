use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Direct,
    Group,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationType::Direct => "direct",
            ConversationType::Group => "group",
        }
    }
}

/// 会话。由外部的建群/建会话流程创建，本子系统只读取并更新 `updated_at`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    pub name: Option<String>,
    pub updated_at: Timestamp,
}

impl Conversation {
    pub fn new(
        id: ConversationId,
        conversation_type: ConversationType,
        name: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_type,
            name,
            updated_at: now,
        }
    }

    /// 新消息到达时刷新会话时间，时间不回退
    pub fn touch(&mut self, at: Timestamp) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}
