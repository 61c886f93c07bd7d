use std::fmt;

use serde::{Deserialize, Serialize};

/// 同步作用域：一个集合实例的身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// 某个用户已加入的房间列表
    JoinedRooms { user_id: String },
    /// 某个房间的消息
    RoomMessages { room_id: String },
    /// 某个房间的成员
    RoomMembers { room_id: String },
}

impl Scope {
    pub fn joined_rooms(user_id: impl Into<String>) -> Self {
        Scope::JoinedRooms {
            user_id: user_id.into(),
        }
    }

    pub fn room_messages(room_id: impl Into<String>) -> Self {
        Scope::RoomMessages {
            room_id: room_id.into(),
        }
    }

    pub fn room_members(room_id: impl Into<String>) -> Self {
        Scope::RoomMembers {
            room_id: room_id.into(),
        }
    }

    /// 房间相关作用域对应的房间 id
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Scope::JoinedRooms { .. } => None,
            Scope::RoomMessages { room_id } | Scope::RoomMembers { room_id } => Some(room_id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::JoinedRooms { user_id } => write!(f, "rooms:{}", user_id),
            Scope::RoomMessages { room_id } => write!(f, "messages:{}", room_id),
            Scope::RoomMembers { room_id } => write!(f, "members:{}", room_id),
        }
    }
}
