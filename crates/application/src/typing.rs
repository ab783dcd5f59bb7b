//! “正在输入”信号
//!
//! 纯转发、不持久化、服务端不计时。接收方需要在本地超时（建议 5-10 秒）后自行清除提示，
//! 连接崩溃不会留下任何服务端状态，因此也不存在需要补发的过期信号。

use std::sync::Arc;

use domain::{ConversationId, ServerEvent};

use crate::authorization::AuthorizationGate;
use crate::error::{ApplicationError, RoomOperation};
use crate::registry::ConnectionHandle;
use crate::rooms::RoomBroadcaster;

pub struct TypingChannel {
    gate: Arc<AuthorizationGate>,
    rooms: Arc<RoomBroadcaster>,
}

impl TypingChannel {
    pub fn new(gate: Arc<AuthorizationGate>, rooms: Arc<RoomBroadcaster>) -> Self {
        Self { gate, rooms }
    }

    /// 广播给房间内除发起连接之外的订阅者，返回投递数
    pub async fn signal(
        &self,
        origin: &ConnectionHandle,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<usize, ApplicationError> {
        self.gate
            .authorize(origin.user_id(), conversation_id, RoomOperation::Typing)
            .await?;

        let event = ServerEvent::UserTyping {
            user_id: origin.user_id(),
            conversation_id,
            is_typing,
        };
        Ok(self.rooms.broadcast(conversation_id, &event, Some(origin.id())))
    }
}
