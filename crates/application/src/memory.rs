//! 内存实现的会话存储（用于测试和未配置数据库的本地运行）

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageId, NewMessage, OnlineStatus, RepositoryError,
    Timestamp, User, UserId,
};
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::repository::{ConversationStore, CreatedMessage};

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    conversations: HashMap<ConversationId, Conversation>,
    participants: HashMap<ConversationId, HashSet<UserId>>,
    messages: Vec<Message>,
    next_sequence: i64,
}

pub struct MemoryConversationStore {
    state: RwLock<MemoryState>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryConversationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// 模拟存储不可用：之后的所有调用都返回存储错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("store unavailable"));
        }
        Ok(())
    }

    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn insert_conversation(
        &self,
        conversation: Conversation,
        participants: impl IntoIterator<Item = UserId>,
    ) {
        let mut state = self.state.write().await;
        state
            .participants
            .insert(conversation.id, participants.into_iter().collect());
        state.conversations.insert(conversation.id, conversation);
    }

    pub async fn user(&self, user_id: UserId) -> Option<User> {
        self.state.read().await.users.get(&user_id).cloned()
    }

    pub async fn conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.state
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned()
    }

    /// 按规范顺序返回会话全部消息
    pub async fn transcript(&self, conversation_id: ConversationId) -> Vec<Message> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(Message::order_key);
        messages
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<HashSet<UserId>, RepositoryError> {
        self.ensure_available()?;
        self.state
            .read()
            .await
            .participants
            .get(&conversation_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn create_message(&self, message: NewMessage) -> Result<CreatedMessage, RepositoryError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        if !state.conversations.contains_key(&message.conversation_id) {
            return Err(RepositoryError::NotFound);
        }

        if let Some(token) = message.client_message_id.as_deref() {
            let existing = state.messages.iter().find(|m| {
                m.conversation_id == message.conversation_id
                    && m.sender_id == message.sender_id
                    && m.client_message_id.as_deref() == Some(token)
            });
            if let Some(existing) = existing {
                return Ok(CreatedMessage {
                    message: existing.clone(),
                    created: false,
                });
            }
        }

        // 同一会话内 created_at 不回退，sequence 严格递增
        let latest = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == message.conversation_id)
            .map(|m| m.created_at)
            .max();
        let now = self.clock.now();
        let created_at = latest.map_or(now, |latest| latest.max(now));
        state.next_sequence += 1;

        let stored = Message {
            id: MessageId::random(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            file: message.file,
            created_at,
            sequence: state.next_sequence,
            is_read: false,
            client_message_id: message.client_message_id,
        };
        state.messages.push(stored.clone());

        Ok(CreatedMessage {
            message: stored,
            created: true,
        })
    }

    async fn touch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), RepositoryError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.touch(now);
        Ok(())
    }

    async fn update_user_presence(
        &self,
        user_id: UserId,
        status: OnlineStatus,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(&user_id).ok_or(RepositoryError::NotFound)?;
        user.set_presence(status, at);
        Ok(())
    }

    async fn mark_messages_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        message_ids: Option<Vec<MessageId>>,
    ) -> Result<u64, RepositoryError> {
        self.ensure_available()?;
        let wanted: Option<HashSet<MessageId>> = message_ids.map(|ids| ids.into_iter().collect());
        let mut state = self.state.write().await;
        let mut changed = 0;
        for message in state.messages.iter_mut() {
            if message.conversation_id != conversation_id || message.sender_id == reader {
                continue;
            }
            if let Some(wanted) = wanted.as_ref() {
                if !wanted.contains(&message.id) {
                    continue;
                }
            }
            if message.mark_read() {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, RepositoryError> {
        self.ensure_available()?;
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }
}
