use std::sync::Arc;

use dashmap::DashMap;
use domain::{OnlineStatus, ServerEvent, UserId};
use tokio::sync::{broadcast, Mutex};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::registry::ConnectionRegistry;
use crate::repository::ConversationStore;

/// 进程级在线状态通道，所有连接共享，不按会话划分
#[derive(Clone)]
pub struct PresenceChannel {
    sender: broadcast::Sender<ServerEvent>,
}

impl PresenceChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: ServerEvent) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        // 只有在没有接收者时才会失败，可以忽略
        let _ = self.sender.send(event);
    }
}

/// 在线状态跟踪器
///
/// 负责 `online_status` / `last_seen` 的全部转换：先持久化，再在全局通道广播。
/// 同一用户的转换在该用户的互斥锁内串行执行，并在锁内以注册表的实际连接数为准，
/// 避免“上线”与“下线”的持久化乱序。
pub struct PresenceTracker {
    store: Arc<dyn ConversationStore>,
    registry: Arc<ConnectionRegistry>,
    clock: Arc<dyn Clock>,
    channel: PresenceChannel,
    statuses: DashMap<UserId, Arc<Mutex<Option<OnlineStatus>>>>,
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        registry: Arc<ConnectionRegistry>,
        clock: Arc<dyn Clock>,
        channel: PresenceChannel,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            channel,
            statuses: DashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.channel.subscribe()
    }

    fn slot(&self, user_id: UserId) -> Arc<Mutex<Option<OnlineStatus>>> {
        self.statuses.entry(user_id).or_default().clone()
    }

    /// 当前已知状态（未跟踪过的用户视为离线）
    pub async fn status_of(&self, user_id: UserId) -> OnlineStatus {
        let slot = self.statuses.get(&user_id).map(|entry| entry.value().clone());
        match slot {
            Some(slot) => slot.lock().await.unwrap_or(OnlineStatus::Offline),
            None => OnlineStatus::Offline,
        }
    }

    /// 用户有连接建立：此前离线则转为在线并广播 `user_online`
    pub async fn connection_opened(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let slot = self.slot(user_id);
        let mut current = slot.lock().await;
        if !self.registry.is_online(user_id) {
            return Ok(());
        }
        if matches!(*current, Some(status) if status != OnlineStatus::Offline) {
            return Ok(());
        }

        let now = self.clock.now();
        self.store
            .update_user_presence(user_id, OnlineStatus::Online, now)
            .await?;
        *current = Some(OnlineStatus::Online);
        drop(current);

        tracing::info!(user_id = %user_id, "用户上线");
        self.channel.publish(ServerEvent::UserOnline {
            user_id,
            timestamp: now,
        });
        Ok(())
    }

    /// 用户最后一条连接关闭：转为离线并广播 `user_offline`
    pub async fn connection_closed(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let slot = self.slot(user_id);
        let mut current = slot.lock().await;
        if self.registry.is_online(user_id) {
            // 期间又有新连接建立
            return Ok(());
        }

        let now = self.clock.now();
        self.store
            .update_user_presence(user_id, OnlineStatus::Offline, now)
            .await?;
        *current = Some(OnlineStatus::Offline);
        drop(current);
        // 离线与未跟踪等价，无人等待时回收该用户的槽位
        drop(slot);
        self.statuses
            .remove_if(&user_id, |_, slot| Arc::strong_count(slot) == 1);

        tracing::info!(user_id = %user_id, "用户下线");
        self.channel.publish(ServerEvent::UserOffline {
            user_id,
            timestamp: now,
        });
        Ok(())
    }

    /// 用户显式设置状态，广播 `presence_updated`
    pub async fn update_status(
        &self,
        user_id: UserId,
        status: OnlineStatus,
    ) -> Result<(), ApplicationError> {
        let slot = self.slot(user_id);
        let mut current = slot.lock().await;

        let now = self.clock.now();
        self.store.update_user_presence(user_id, status, now).await?;
        *current = Some(status);
        drop(current);

        tracing::info!(user_id = %user_id, status = %status, "用户状态更新");
        self.channel.publish(ServerEvent::PresenceUpdated {
            user_id,
            status,
            timestamp: now,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::MemoryConversationStore;
    use domain::User;
    use tokio::sync::mpsc;

    async fn setup() -> (
        Arc<MemoryConversationStore>,
        Arc<ConnectionRegistry>,
        PresenceTracker,
        UserId,
    ) {
        let store = Arc::new(MemoryConversationStore::default());
        let user = UserId::random();
        store.insert_user(User::new(user, "alice")).await;
        let registry = Arc::new(ConnectionRegistry::new());
        let tracker = PresenceTracker::new(
            store.clone(),
            registry.clone(),
            Arc::new(SystemClock),
            PresenceChannel::new(16),
        );
        (store, registry, tracker, user)
    }

    #[tokio::test]
    async fn first_connection_goes_online_once() {
        let (store, registry, tracker, user) = setup().await;
        let mut events = tracker.subscribe();

        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.register(user, tx1);
        tracker.connection_opened(user).await.unwrap();
        registry.register(user, tx2);
        tracker.connection_opened(user).await.unwrap();

        assert!(matches!(events.try_recv().unwrap(), ServerEvent::UserOnline { .. }));
        assert!(events.try_recv().is_err());
        let stored = store.user(user).await.unwrap();
        assert_eq!(stored.online_status, OnlineStatus::Online);
        assert!(stored.last_seen.is_some());
    }

    #[tokio::test]
    async fn explicit_status_survives_extra_tabs() {
        let (_store, registry, tracker, user) = setup().await;
        let (tx1, _rx1) = mpsc::unbounded_channel();
        registry.register(user, tx1);
        tracker.connection_opened(user).await.unwrap();
        tracker.update_status(user, OnlineStatus::Busy).await.unwrap();

        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.register(user, tx2);
        tracker.connection_opened(user).await.unwrap();
        assert_eq!(tracker.status_of(user).await, OnlineStatus::Busy);
    }

    #[tokio::test]
    async fn closing_while_still_connected_is_ignored() {
        let (_store, registry, tracker, user) = setup().await;
        let mut events = tracker.subscribe();
        let (tx, _rx) = mpsc::unbounded_channel();
        let registration = registry.register(user, tx);
        tracker.connection_opened(user).await.unwrap();
        let _ = events.try_recv();

        tracker.connection_closed(user).await.unwrap();
        assert!(events.try_recv().is_err());

        registry.unregister(&registration.handle);
        tracker.connection_closed(user).await.unwrap();
        assert!(matches!(events.try_recv().unwrap(), ServerEvent::UserOffline { .. }));
        assert_eq!(tracker.status_of(user).await, OnlineStatus::Offline);
    }

    #[tokio::test]
    async fn persistence_failure_skips_broadcast() {
        let (store, registry, tracker, user) = setup().await;
        let mut events = tracker.subscribe();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(user, tx);
        store.set_unavailable(true);

        let result = tracker.update_status(user, OnlineStatus::Away).await;
        assert!(matches!(result, Err(ApplicationError::PersistenceFailed { .. })));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_users_do_not_keep_a_slot() {
        let (store, registry, tracker, _) = setup().await;
        for _ in 0..50 {
            let user = UserId::random();
            store.insert_user(User::new(user, "guest")).await;
            let (tx, _rx) = mpsc::unbounded_channel();
            let registration = registry.register(user, tx);
            tracker.connection_opened(user).await.unwrap();
            registry.unregister(&registration.handle);
            tracker.connection_closed(user).await.unwrap();
            assert_eq!(tracker.status_of(user).await, OnlineStatus::Offline);
        }
        assert!(tracker.statuses.is_empty());
    }

    #[tokio::test]
    async fn reconnect_after_slot_release_goes_online_again() {
        let (_store, registry, tracker, user) = setup().await;
        let mut events = tracker.subscribe();
        for _ in 0..2 {
            let (tx, _rx) = mpsc::unbounded_channel();
            let registration = registry.register(user, tx);
            tracker.connection_opened(user).await.unwrap();
            assert!(matches!(events.try_recv().unwrap(), ServerEvent::UserOnline { .. }));
            registry.unregister(&registration.handle);
            tracker.connection_closed(user).await.unwrap();
            assert!(matches!(events.try_recv().unwrap(), ServerEvent::UserOffline { .. }));
        }
        assert!(tracker.statuses.is_empty());
    }
}
