use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{Timestamp, UserId};

/// 用户在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnlineStatus {
    Online,
    Away,
    Busy,
    DoNotDisturb,
    Offline,
}

impl OnlineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnlineStatus::Online => "online",
            OnlineStatus::Away => "away",
            OnlineStatus::Busy => "busy",
            OnlineStatus::DoNotDisturb => "do_not_disturb",
            OnlineStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnlineStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "online" => Ok(OnlineStatus::Online),
            "away" => Ok(OnlineStatus::Away),
            "busy" => Ok(OnlineStatus::Busy),
            "do_not_disturb" => Ok(OnlineStatus::DoNotDisturb),
            "offline" => Ok(OnlineStatus::Offline),
            other => Err(DomainError::UnknownStatus(other.to_owned())),
        }
    }
}

/// 用户资料中与实时子系统相关的部分。
///
/// 只有在线状态跟踪器会修改 `online_status` 与 `last_seen`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub online_status: OnlineStatus,
    pub last_seen: Option<Timestamp>,
}

impl User {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            online_status: OnlineStatus::Offline,
            last_seen: None,
        }
    }

    pub fn set_presence(&mut self, status: OnlineStatus, at: Timestamp) {
        self.online_status = status;
        self.last_seen = Some(at);
    }
}
