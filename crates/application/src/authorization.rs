//! 授权闸门：房间级操作的唯一检查点
//!
//! 每次都重新读取参与者集合；任何查询错误都按拒绝处理（fail closed）。

use std::collections::HashSet;
use std::sync::Arc;

use domain::{ConversationId, UserId};

use crate::error::{ApplicationError, RoomOperation};
use crate::repository::ConversationStore;

pub struct AuthorizationGate {
    store: Arc<dyn ConversationStore>,
}

impl AuthorizationGate {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// 校验 `user_id` 是 `conversation_id` 的当前参与者，成功时返回参与者集合
    pub async fn authorize(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        operation: RoomOperation,
    ) -> Result<HashSet<UserId>, ApplicationError> {
        let denied = || ApplicationError::AuthorizationDenied {
            user_id,
            conversation_id,
            operation,
        };

        let participants = match self.store.find_participants(conversation_id).await {
            Ok(participants) => participants,
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    conversation_id = %conversation_id,
                    operation = %operation,
                    error = %err,
                    "参与者查询失败，拒绝操作"
                );
                return Err(denied());
            }
        };

        if !participants.contains(&user_id) {
            tracing::warn!(
                user_id = %user_id,
                conversation_id = %conversation_id,
                operation = %operation,
                "非参与者尝试房间操作"
            );
            return Err(denied());
        }

        Ok(participants)
    }
}
