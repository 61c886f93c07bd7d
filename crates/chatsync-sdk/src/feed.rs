//! 实时事件适配
//!
//! 把传输层推送的领域事件翻译成有序集合操作（附带变更原因）或连接状态切换。
//! 事件按到达顺序应用，这里不做重排也不做去重：重复的 update/remove 本身是幂等的。

use std::marker::PhantomData;
use std::sync::Weak;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::collection::OrderedCollectionStore;
use crate::connection_state::ConnectionState;
use crate::coordinator::SyncCoordinator;
use crate::error::{Result, SyncError};
use crate::model::{CollectionKind, Entity};

/// 实时通道推送的事件
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<E: Entity> {
    EntityCreated(E),
    EntityUpdated(E),
    EntityRemoved { id: E::Id },
    ConnectionDegraded,
    ConnectionRestored,
    /// 无法识别的事件类型，属于编程错误
    Unrecognized { kind: String },
}

impl<E: Entity> FeedEvent<E> {
    pub fn event_type(&self) -> &str {
        match self {
            FeedEvent::EntityCreated(_) => "entity_created",
            FeedEvent::EntityUpdated(_) => "entity_updated",
            FeedEvent::EntityRemoved { .. } => "entity_removed",
            FeedEvent::ConnectionDegraded => "connection_degraded",
            FeedEvent::ConnectionRestored => "connection_restored",
            FeedEvent::Unrecognized { kind } => kind,
        }
    }
}

/// 翻译后的集合操作
#[derive(Debug, Clone, PartialEq)]
pub enum FeedAction<K: CollectionKind> {
    Insert { entity: K::Entity, reason: K::Reason },
    Update { entity: K::Entity, reason: K::Reason },
    Remove { id: <K::Entity as Entity>::Id, reason: K::Reason },
    Connection(ConnectionState),
    /// 事件被丢弃（残缺、或对当前集合无意义）
    Drop,
}

/// 实时事件适配器
pub struct RealTimeFeedAdapter<K: CollectionKind> {
    _kind: PhantomData<K>,
}

impl<K: CollectionKind> RealTimeFeedAdapter<K> {
    /// 把一条事件翻译成集合操作
    ///
    /// `store` 用来取旧快照推断原因，例如房间的最后消息时间前进了就是 `MessageReceived`。
    pub fn translate(
        event: FeedEvent<K::Entity>,
        store: &OrderedCollectionStore<K::Entity>,
    ) -> FeedAction<K> {
        match event {
            FeedEvent::EntityCreated(entity) => {
                if let Err(reason) = entity.validate() {
                    warn!("[{}] 丢弃残缺的 entity_created 事件: {}", K::NAME, reason);
                    return FeedAction::Drop;
                }
                let reason = K::created(&entity);
                FeedAction::Insert { entity, reason }
            }
            FeedEvent::EntityUpdated(entity) => {
                if let Err(reason) = entity.validate() {
                    warn!("[{}] 丢弃残缺的 entity_updated 事件: {}", K::NAME, reason);
                    return FeedAction::Drop;
                }
                match store.get(entity.id()) {
                    Some(previous) => {
                        let reason = K::updated(previous, &entity);
                        FeedAction::Update { entity, reason }
                    }
                    None => {
                        debug!("[{}] 忽略未知实体的更新: {:?}", K::NAME, entity.id());
                        FeedAction::Drop
                    }
                }
            }
            FeedEvent::EntityRemoved { id } => FeedAction::Remove {
                id,
                reason: K::removed(),
            },
            FeedEvent::ConnectionDegraded => FeedAction::Connection(ConnectionState::Degraded),
            FeedEvent::ConnectionRestored => FeedAction::Connection(ConnectionState::Connected),
            FeedEvent::Unrecognized { kind } => {
                debug_assert!(false, "unrecognized feed event: {}", kind);
                error!("[{}] 无法识别的实时事件类型: {}", K::NAME, kind);
                FeedAction::Drop
            }
        }
    }
}

/// JSON 形式的原始事件：`{"event": "...", "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeedEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RawFeedEvent {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 解码为强类型事件，缺少必要字段时返回 `MalformedEvent`
    pub fn decode<E>(&self) -> Result<FeedEvent<E>>
    where
        E: Entity + DeserializeOwned,
        E::Id: DeserializeOwned,
    {
        match self.event.as_str() {
            "entity_created" => Ok(FeedEvent::EntityCreated(self.entity()?)),
            "entity_updated" => Ok(FeedEvent::EntityUpdated(self.entity()?)),
            "entity_removed" => {
                let id = self
                    .data
                    .get("id")
                    .ok_or_else(|| SyncError::MalformedEvent("entity_removed without id".to_string()))?;
                let id = serde_json::from_value(id.clone())
                    .map_err(|e| SyncError::MalformedEvent(format!("entity_removed: {}", e)))?;
                Ok(FeedEvent::EntityRemoved { id })
            }
            "connection_degraded" => Ok(FeedEvent::ConnectionDegraded),
            "connection_restored" => Ok(FeedEvent::ConnectionRestored),
            other => Ok(FeedEvent::Unrecognized {
                kind: other.to_string(),
            }),
        }
    }

    fn entity<E: DeserializeOwned>(&self) -> Result<E> {
        if self.data.is_null() {
            return Err(SyncError::MalformedEvent(format!("{} without data", self.event)));
        }
        serde_json::from_value(self.data.clone())
            .map_err(|e| SyncError::MalformedEvent(format!("{}: {}", self.event, e)))
    }
}

/// 启动事件泵：把订阅到的事件按到达顺序交给协调器
///
/// 泵只持有协调器的弱引用；通道关闭时把连接标记为降级后退出。
pub(crate) fn spawn_pump<K: CollectionKind>(
    coordinator: Weak<SyncCoordinator<K>>,
    mut receiver: mpsc::Receiver<FeedEvent<K::Entity>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = receiver.recv() => {
                    let Some(coordinator) = coordinator.upgrade() else {
                        break;
                    };
                    match event {
                        Some(event) => {
                            coordinator.ingest(event);
                        }
                        None => {
                            warn!("[{}] 实时通道已关闭: {}", K::NAME, coordinator.scope());
                            coordinator.ingest(FeedEvent::ConnectionDegraded);
                            break;
                        }
                    }
                }
            }
        }
        debug!("[{}] 事件泵退出", K::NAME);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JoinedRooms, Message, Room, RoomListReason, SortOrder};

    fn room(id: &str, last: Option<i64>) -> Room {
        Room {
            id: id.to_string(),
            name: id.to_string(),
            created_at: 1,
            last_message_at: last,
            unread_count: 0,
            is_private: false,
        }
    }

    #[test]
    fn test_translate_infers_message_received() {
        let mut store = OrderedCollectionStore::new(SortOrder::Descending);
        store.insert(room("a", Some(5)));

        let action = RealTimeFeedAdapter::<JoinedRooms>::translate(
            FeedEvent::EntityUpdated(room("a", Some(15))),
            &store,
        );
        assert_eq!(
            action,
            FeedAction::Update {
                entity: room("a", Some(15)),
                reason: RoomListReason::MessageReceived,
            }
        );
    }

    #[test]
    fn test_translate_drops_malformed_and_unknown_updates() {
        let store = OrderedCollectionStore::new(SortOrder::Descending);
        let action =
            RealTimeFeedAdapter::<JoinedRooms>::translate(FeedEvent::EntityCreated(room("", None)), &store);
        assert_eq!(action, FeedAction::Drop);

        let action =
            RealTimeFeedAdapter::<JoinedRooms>::translate(FeedEvent::EntityUpdated(room("x", None)), &store);
        assert_eq!(action, FeedAction::Drop);
    }

    #[test]
    fn test_translate_connection_events() {
        let store = OrderedCollectionStore::<Room>::new(SortOrder::Descending);
        assert_eq!(
            RealTimeFeedAdapter::<JoinedRooms>::translate(FeedEvent::ConnectionDegraded, &store),
            FeedAction::Connection(ConnectionState::Degraded)
        );
        assert_eq!(
            RealTimeFeedAdapter::<JoinedRooms>::translate(FeedEvent::ConnectionRestored, &store),
            FeedAction::Connection(ConnectionState::Connected)
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "unrecognized feed event")]
    fn test_unrecognized_event_asserts_in_debug() {
        let store = OrderedCollectionStore::<Room>::new(SortOrder::Descending);
        RealTimeFeedAdapter::<JoinedRooms>::translate(
            FeedEvent::Unrecognized {
                kind: "room_exploded".to_string(),
            },
            &store,
        );
    }

    #[test]
    fn test_decode_raw_events() {
        let raw = RawFeedEvent::from_json_str(
            r#"{"event": "entity_created", "data": {"id": 3, "room_id": "r1", "sender_id": "u1", "text": "hi", "created_at": 10}}"#,
        )
        .unwrap();
        match raw.decode::<Message>().unwrap() {
            FeedEvent::EntityCreated(message) => {
                assert_eq!(message.id, 3);
                assert_eq!(message.text, "hi");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let raw = RawFeedEvent::from_json_str(r#"{"event": "entity_removed", "data": {"id": 9}}"#).unwrap();
        assert_eq!(raw.decode::<Message>().unwrap(), FeedEvent::EntityRemoved { id: 9 });

        let raw = RawFeedEvent::from_json_str(r#"{"event": "connection_restored"}"#).unwrap();
        assert_eq!(raw.decode::<Message>().unwrap(), FeedEvent::ConnectionRestored);
    }

    #[test]
    fn test_decode_missing_fields_is_malformed() {
        let raw = RawFeedEvent::from_json_str(r#"{"event": "entity_updated"}"#).unwrap();
        assert!(matches!(raw.decode::<Message>(), Err(SyncError::MalformedEvent(_))));

        let raw = RawFeedEvent::from_json_str(r#"{"event": "entity_created", "data": {"id": 3}}"#).unwrap();
        assert!(matches!(raw.decode::<Message>(), Err(SyncError::MalformedEvent(_))));

        let raw = RawFeedEvent::from_json_str(r#"{"event": "entity_removed", "data": {}}"#).unwrap();
        assert!(matches!(raw.decode::<Message>(), Err(SyncError::MalformedEvent(_))));

        let raw = RawFeedEvent::from_json_str(r#"{"event": "typing"}"#).unwrap();
        assert_eq!(
            raw.decode::<Message>().unwrap(),
            FeedEvent::<Message>::Unrecognized {
                kind: "typing".to_string()
            }
        );
    }
}
