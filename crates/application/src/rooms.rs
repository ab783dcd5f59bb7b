//! 会话房间广播器
//!
//! 维护会话 -> 订阅连接集合的映射，并向该集合扇出事件。
//! 同一房间的广播在房间条目的写锁内完成投递，因此订阅者看到的顺序与 `broadcast` 调用顺序一致；
//! 不同房间之间不保证顺序。

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use domain::{ConnectionId, ConversationId, ServerEvent, UserId};

use crate::registry::ConnectionHandle;

#[derive(Default)]
pub struct RoomBroadcaster {
    rooms: DashMap<ConversationId, HashMap<ConnectionId, ConnectionHandle>>,
    memberships: DashMap<ConnectionId, HashSet<ConversationId>>,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅房间。调用方必须先通过授权闸门。重复加入是空操作，返回 `false`。
    pub fn join(&self, conversation_id: ConversationId, connection: &ConnectionHandle) -> bool {
        let inserted = self
            .rooms
            .entry(conversation_id)
            .or_default()
            .insert(connection.id(), connection.clone())
            .is_none();
        self.memberships
            .entry(connection.id())
            .or_default()
            .insert(conversation_id);

        if inserted {
            tracing::info!(
                conversation_id = %conversation_id,
                connection_id = %connection.id(),
                user_id = %connection.user_id(),
                "连接加入会话房间"
            );
        }
        inserted
    }

    /// 退订房间，幂等
    pub fn leave(&self, conversation_id: ConversationId, connection_id: ConnectionId) -> bool {
        let removed = self.remove_subscriber(conversation_id, connection_id);
        self.memberships
            .remove_if_mut(&connection_id, |_, rooms| {
                rooms.remove(&conversation_id);
                rooms.is_empty()
            });
        removed
    }

    /// 连接断开时退出所有已加入的房间，返回退出的房间列表
    pub fn leave_all(&self, connection_id: ConnectionId) -> Vec<ConversationId> {
        let rooms: Vec<ConversationId> = self
            .memberships
            .remove(&connection_id)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();
        for conversation_id in &rooms {
            self.remove_subscriber(*conversation_id, connection_id);
        }
        rooms
    }

    fn remove_subscriber(&self, conversation_id: ConversationId, connection_id: ConnectionId) -> bool {
        let mut removed = false;
        self.rooms.remove_if_mut(&conversation_id, |_, subscribers| {
            removed = subscribers.remove(&connection_id).is_some();
            subscribers.is_empty()
        });
        removed
    }

    /// 向房间全部订阅者投递事件，可排除发起连接。返回成功投递数。
    ///
    /// 投递失败的连接视为已失效，直接从房间中剔除。
    pub fn broadcast(
        &self,
        conversation_id: ConversationId,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();
        let now_empty = match self.rooms.get_mut(&conversation_id) {
            Some(mut subscribers) => {
                subscribers.retain(|connection_id, handle| {
                    if Some(*connection_id) == exclude {
                        return true;
                    }
                    match handle.send(event.clone()) {
                        Ok(()) => {
                            delivered += 1;
                            true
                        }
                        Err(_) => {
                            stale.push(*connection_id);
                            false
                        }
                    }
                });
                subscribers.is_empty()
            }
            None => return 0,
        };

        if now_empty {
            self.rooms
                .remove_if(&conversation_id, |_, subscribers| subscribers.is_empty());
        }
        for connection_id in stale {
            tracing::warn!(
                conversation_id = %conversation_id,
                connection_id = %connection_id,
                "从房间剔除失效连接"
            );
            self.memberships.remove_if_mut(&connection_id, |_, rooms| {
                rooms.remove(&conversation_id);
                rooms.is_empty()
            });
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            event = event.kind(),
            delivered,
            "房间广播完成"
        );
        delivered
    }

    /// 用户是否有任意一条连接订阅了该房间
    pub fn is_user_subscribed(&self, conversation_id: ConversationId, user_id: UserId) -> bool {
        self.rooms
            .get(&conversation_id)
            .map(|subscribers| {
                subscribers
                    .values()
                    .any(|handle| handle.user_id() == user_id && !handle.is_closed())
            })
            .unwrap_or(false)
    }

    pub fn is_subscribed(&self, conversation_id: ConversationId, connection_id: ConnectionId) -> bool {
        self.rooms
            .get(&conversation_id)
            .map(|subscribers| subscribers.contains_key(&connection_id))
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self, conversation_id: ConversationId) -> usize {
        self.rooms
            .get(&conversation_id)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection(user_id: UserId) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(user_id, tx), rx)
    }

    #[test]
    fn join_and_leave_are_idempotent() {
        let rooms = RoomBroadcaster::new();
        let conversation = ConversationId::random();
        let (conn, _rx) = connection(UserId::random());

        assert!(rooms.join(conversation, &conn));
        assert!(!rooms.join(conversation, &conn));
        assert_eq!(rooms.subscriber_count(conversation), 1);

        assert!(rooms.leave(conversation, conn.id()));
        assert!(!rooms.leave(conversation, conn.id()));
        assert_eq!(rooms.subscriber_count(conversation), 0);
    }

    #[test]
    fn broadcast_skips_excluded_connection() {
        let rooms = RoomBroadcaster::new();
        let conversation = ConversationId::random();
        let (a, mut rx_a) = connection(UserId::random());
        let (b, mut rx_b) = connection(UserId::random());
        rooms.join(conversation, &a);
        rooms.join(conversation, &b);

        let delivered = rooms.broadcast(conversation, &ServerEvent::Pong, Some(a.id()));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::Pong);
    }

    #[test]
    fn dead_subscribers_are_pruned_on_broadcast() {
        let rooms = RoomBroadcaster::new();
        let conversation = ConversationId::random();
        let user = UserId::random();
        let (dead, rx) = connection(user);
        rooms.join(conversation, &dead);
        drop(rx);

        assert!(!rooms.is_user_subscribed(conversation, user));
        assert_eq!(rooms.broadcast(conversation, &ServerEvent::Pong, None), 0);
        assert_eq!(rooms.subscriber_count(conversation), 0);
        assert!(rooms.leave_all(dead.id()).is_empty());
    }

    #[test]
    fn leave_all_removes_every_room() {
        let rooms = RoomBroadcaster::new();
        let (conn, _rx) = connection(UserId::random());
        let (first, second) = (ConversationId::random(), ConversationId::random());
        rooms.join(first, &conn);
        rooms.join(second, &conn);

        let mut left = rooms.leave_all(conn.id());
        left.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(left, expected);
        assert!(!rooms.is_subscribed(first, conn.id()));
        assert!(!rooms.is_subscribed(second, conn.id()));
    }

    #[test]
    fn per_room_order_is_preserved() {
        let rooms = RoomBroadcaster::new();
        let conversation = ConversationId::random();
        let (conn, mut rx) = connection(UserId::random());
        rooms.join(conversation, &conn);

        for i in 0..50 {
            rooms.broadcast(
                conversation,
                &ServerEvent::Error {
                    code: i.to_string(),
                    reason: String::new(),
                    retryable: false,
                    conversation_id: None,
                },
                None,
            );
        }
        for i in 0..50 {
            match rx.try_recv().unwrap() {
                ServerEvent::Error { code, .. } => assert_eq!(code, i.to_string()),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}
