//! 连接注册表
//!
//! 记录每个用户当前存活的连接（同一用户可有零到多条），并提供“发送给用户”原语。
//! 只暴露按 key 的窄操作，锁的粒度是 DashMap 的分片。

use std::collections::HashMap;

use dashmap::DashMap;
use domain::{ConnectionId, ServerEvent, UserId};
use tokio::sync::mpsc;

use crate::error::ApplicationError;

/// 单条连接的出站通道
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// 一条已认证连接的句柄。身份只来自这里，从不取自请求载荷。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    sender: EventSender,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, sender: EventSender) -> Self {
        Self {
            id: ConnectionId::random(),
            user_id,
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// 投递到连接的出站队列，不阻塞
    pub fn send(&self, event: ServerEvent) -> Result<(), ApplicationError> {
        self.sender
            .send(event)
            .map_err(|_| ApplicationError::ConnectionClosed(self.id))
    }
}

/// 注册结果
#[derive(Debug, Clone)]
pub struct Registration {
    pub handle: ConnectionHandle,
    /// 该用户此前没有任何存活连接
    pub first_connection: bool,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    users: DashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: UserId, sender: EventSender) -> Registration {
        let handle = ConnectionHandle::new(user_id, sender);
        let mut entry = self.users.entry(user_id).or_default();
        let first_connection = entry.is_empty();
        entry.insert(handle.id(), handle.clone());
        drop(entry);

        tracing::info!(
            user_id = %user_id,
            connection_id = %handle.id(),
            first_connection,
            "连接已注册"
        );
        Registration {
            handle,
            first_connection,
        }
    }

    /// 注销连接，返回这是否是该用户最后一条存活连接
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let user_id = handle.user_id();
        let mut removed = false;
        let last = self
            .users
            .remove_if_mut(&user_id, |_, connections| {
                removed = connections.remove(&handle.id()).is_some();
                connections.is_empty()
            })
            .is_some();

        tracing::info!(
            user_id = %user_id,
            connection_id = %handle.id(),
            last_connection = last,
            "连接已注销"
        );
        removed && last
    }

    /// 发送到用户的所有存活连接，返回成功投递的连接数。
    ///
    /// 已关闭但尚未注销的连接只计为失败，由其自身的断开流程负责注销。
    pub fn send_to_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        let Some(connections) = self.users.get(&user_id) else {
            return 0;
        };
        connections
            .values()
            .filter(|handle| match handle.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!(
                        user_id = %user_id,
                        connection_id = %handle.id(),
                        "连接已关闭，跳过投递"
                    );
                    false
                }
            })
            .count()
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.users
            .get(&user_id)
            .map(|connections| connections.len())
            .unwrap_or(0)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.connection_count(user_id) > 0
    }

    pub fn online_user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_first_and_last_connection() {
        let registry = ConnectionRegistry::new();
        let user = UserId::random();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let first = registry.register(user, tx1);
        let second = registry.register(user, tx2);
        assert!(first.first_connection);
        assert!(!second.first_connection);
        assert_eq!(registry.connection_count(user), 2);

        assert!(!registry.unregister(&first.handle));
        assert!(registry.is_online(user));
        assert!(registry.unregister(&second.handle));
        assert!(!registry.is_online(user));
        // 重复注销不会再次报告“最后一条”
        assert!(!registry.unregister(&second.handle));
    }

    #[test]
    fn send_to_user_reaches_every_live_tab() {
        let registry = ConnectionRegistry::new();
        let user = UserId::random();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        registry.register(user, tx1);
        registry.register(user, tx2);
        drop(rx2);

        let delivered = registry.send_to_user(user, &ServerEvent::Pong);
        assert_eq!(delivered, 1);
        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::Pong);
        // 注销只由连接自身的断开流程触发
        assert_eq!(registry.connection_count(user), 2);
    }

    #[test]
    fn unknown_user_receives_nothing() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.send_to_user(UserId::random(), &ServerEvent::Pong), 0);
    }
}
