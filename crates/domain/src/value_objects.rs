use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// 生成随机标识
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_identifier!(
    /// 用户唯一标识，由外部身份提供方签发。
    UserId
);

uuid_identifier!(
    /// 会话唯一标识。
    ConversationId
);

uuid_identifier!(
    /// 消息唯一标识，由存储层在写入时分配。
    MessageId
);

uuid_identifier!(
    /// 单条实时连接的标识。同一用户可同时持有多条连接。
    ConnectionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_serialize_as_plain_uuid() {
        let id = Uuid::new_v4();
        let json = serde_json::to_string(&UserId::from(id)).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let back: ConversationId = serde_json::from_str(&json).unwrap();
        assert_eq!(Uuid::from(back), id);
    }
}
