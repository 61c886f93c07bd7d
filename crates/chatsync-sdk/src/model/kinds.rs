//! 集合种类 - 每种集合的实体类型、排序方向和变更原因

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use super::{Entity, Message, Room, SortOrder, User};
use crate::transport::{CollectionTransport, SessionTransport};

/// 一种同步集合
///
/// 变更原因（reason）是集合相关的语义标签，随每条 ChangeRecord 一起交给观察者。
pub trait CollectionKind: Send + Sync + 'static {
    type Entity: Entity;
    type Reason: Copy + Debug + PartialEq + Eq + Send + Sync + 'static;

    /// 用于日志
    const NAME: &'static str;
    const ORDER: SortOrder;

    /// 新实体出现
    fn created(entity: &Self::Entity) -> Self::Reason;

    /// 已有实体被新快照替换
    fn updated(previous: &Self::Entity, current: &Self::Entity) -> Self::Reason;

    /// 实体被移除
    fn removed() -> Self::Reason;

    /// 分页拉取到的历史数据
    fn history_loaded() -> Self::Reason;

    /// 从会话传输层里取出本种集合的协作者
    fn transport(transport: &SessionTransport) -> &CollectionTransport<Self::Entity>;
}

/// 当前用户已加入的房间列表（最近活跃在前）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedRooms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomListReason {
    RoomJoined,
    RoomLeft,
    MessageReceived,
    DataUpdated,
    HistoryLoaded,
}

impl CollectionKind for JoinedRooms {
    type Entity = Room;
    type Reason = RoomListReason;

    const NAME: &'static str = "joined_rooms";
    const ORDER: SortOrder = SortOrder::Descending;

    fn created(_entity: &Room) -> RoomListReason {
        RoomListReason::RoomJoined
    }

    /// 最后消息时间前进了才算收到新消息，其余字段变化都是普通更新
    fn updated(previous: &Room, current: &Room) -> RoomListReason {
        match (previous.last_message_at, current.last_message_at) {
            (None, Some(_)) => RoomListReason::MessageReceived,
            (Some(old), Some(new)) if new > old => RoomListReason::MessageReceived,
            _ => RoomListReason::DataUpdated,
        }
    }

    fn removed() -> RoomListReason {
        RoomListReason::RoomLeft
    }

    fn history_loaded() -> RoomListReason {
        RoomListReason::HistoryLoaded
    }

    fn transport(transport: &SessionTransport) -> &CollectionTransport<Room> {
        &transport.rooms
    }
}

/// 单个房间的消息时间线（旧消息在前）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomMessages;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageReason {
    MessageReceived,
    MessageEdited,
    MessageDeleted,
    HistoryLoaded,
}

impl CollectionKind for RoomMessages {
    type Entity = Message;
    type Reason = MessageReason;

    const NAME: &'static str = "room_messages";
    const ORDER: SortOrder = SortOrder::Ascending;

    fn created(_entity: &Message) -> MessageReason {
        MessageReason::MessageReceived
    }

    fn updated(previous: &Message, current: &Message) -> MessageReason {
        if current.deleted && !previous.deleted {
            MessageReason::MessageDeleted
        } else {
            MessageReason::MessageEdited
        }
    }

    fn removed() -> MessageReason {
        MessageReason::MessageDeleted
    }

    fn history_loaded() -> MessageReason {
        MessageReason::HistoryLoaded
    }

    fn transport(transport: &SessionTransport) -> &CollectionTransport<Message> {
        &transport.messages
    }
}

/// 单个房间的成员列表（按名字排序）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomMembers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberReason {
    UserJoined,
    UserLeft,
    PresenceChanged,
    DataUpdated,
    HistoryLoaded,
}

impl CollectionKind for RoomMembers {
    type Entity = User;
    type Reason = MemberReason;

    const NAME: &'static str = "room_members";
    const ORDER: SortOrder = SortOrder::Ascending;

    fn created(_entity: &User) -> MemberReason {
        MemberReason::UserJoined
    }

    fn updated(previous: &User, current: &User) -> MemberReason {
        if previous.presence != current.presence {
            MemberReason::PresenceChanged
        } else {
            MemberReason::DataUpdated
        }
    }

    fn removed() -> MemberReason {
        MemberReason::UserLeft
    }

    fn history_loaded() -> MemberReason {
        MemberReason::HistoryLoaded
    }

    fn transport(transport: &SessionTransport) -> &CollectionTransport<User> {
        &transport.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Presence;

    fn room(last: Option<i64>) -> Room {
        Room {
            id: "r1".to_string(),
            name: "general".to_string(),
            created_at: 1,
            last_message_at: last,
            unread_count: 0,
            is_private: false,
        }
    }

    #[test]
    fn test_room_reason_from_last_message() {
        assert_eq!(
            JoinedRooms::updated(&room(Some(5)), &room(Some(15))),
            RoomListReason::MessageReceived
        );
        assert_eq!(
            JoinedRooms::updated(&room(None), &room(Some(3))),
            RoomListReason::MessageReceived
        );
        assert_eq!(
            JoinedRooms::updated(&room(Some(5)), &room(Some(5))),
            RoomListReason::DataUpdated
        );
    }

    #[test]
    fn test_member_presence_reason() {
        let offline = User {
            id: "u1".to_string(),
            name: "alice".to_string(),
            avatar_url: None,
            presence: Presence::Offline,
            updated_at: 0,
        };
        let mut online = offline.clone();
        online.presence = Presence::Online;
        assert_eq!(RoomMembers::updated(&offline, &online), MemberReason::PresenceChanged);

        let mut renamed = offline.clone();
        renamed.avatar_url = Some("https://cdn/a.png".to_string());
        assert_eq!(RoomMembers::updated(&offline, &renamed), MemberReason::DataUpdated);
    }
}
