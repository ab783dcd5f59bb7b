//! 应用层实现。
//!
//! 围绕领域模型组织实时会话的各个组件：连接注册表、授权闸门、房间广播、
//! 消息管道、在线状态、输入提示、已读回执与离线通知，并通过 [`RealtimeService`] 统一对外。

pub mod authorization;
pub mod clock;
pub mod error;
pub mod memory;
pub mod notification;
pub mod pipeline;
pub mod presence;
pub mod receipts;
pub mod registry;
pub mod repository;
pub mod rooms;
pub mod service;
pub mod typing;

pub use authorization::AuthorizationGate;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ApplicationError, RoomOperation};
pub use memory::MemoryConversationStore;
pub use notification::{
    DispatchReport, NotificationHook, OfflineNotification, OfflineNotificationDispatcher,
};
pub use pipeline::{MessagePipeline, SendMessageRequest, SendOutcome};
pub use presence::{PresenceChannel, PresenceTracker};
pub use receipts::{ReadReceipt, ReadReceiptSynchronizer};
pub use registry::{ConnectionHandle, ConnectionRegistry, EventSender, Registration};
pub use repository::{ConversationStore, CreatedMessage};
pub use rooms::RoomBroadcaster;
pub use service::{ChatSettings, RealtimeService, RealtimeServiceDependencies};
pub use typing::TypingChannel;

#[cfg(any(test, feature = "testing"))]
pub use notification::MockNotificationHook;
#[cfg(any(test, feature = "testing"))]
pub use repository::MockConversationStore;
