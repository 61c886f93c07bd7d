//! 领域模型
//!
//! - `Entity`：可排序、可按 id 定位的不可变快照
//! - `Room` / `Message` / `User`：三类具体实体
//! - `CollectionKind`：绑定实体类型、排序方向和变更原因推断规则
//! - `Scope`：一个同步集合实例的标识

mod entities;
mod kinds;
mod scope;

use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

pub use entities::{Message, Presence, Room, User};
pub use kinds::{
    CollectionKind, JoinedRooms, MemberReason, MessageReason, RoomListReason, RoomMembers,
    RoomMessages,
};
pub use scope::Scope;

/// 排序方向（只作用于 ordering key，id 永远升序作为决胜）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// 可同步实体
///
/// 实体是不可变快照：任何修改都产生新的值，交给观察者之后不会再被原地修改。
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    type Id: Clone + Eq + Ord + Hash + Debug + Send + Sync + 'static;
    type Key: Clone + Ord + Debug + Send + Sync + 'static;

    fn id(&self) -> &Self::Id;

    fn ordering_key(&self) -> Self::Key;

    /// 必填字段检查，失败说明实时事件残缺
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}
