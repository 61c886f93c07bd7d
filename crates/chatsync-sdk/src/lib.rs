//! Chatsync SDK - 聊天客户端的数据同步层
//!
//! 本 SDK 让客户端的房间列表、消息时间线、成员列表和服务端保持一致：
//! - 📚 有序集合：按排序键维护，每次变更给出 插入/更新/移动/删除 及原因
//! - 📄 分页：向前拉取历史，自动识别是否已拉完，同一时间只有一个请求
//! - 📡 实时事件：按到达顺序应用，通道断开时标记降级
//! - ⏱️ 合并写入：已读游标在窗口内只上报最大值
//! - ⚙️ 事件系统：作用域生命周期、连接状态、分页结果的会话级广播
//!
//! 传输、鉴权和持久化都由调用方通过 `transport` 里的 trait 提供。
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use chatsync_sdk::{SessionTransport, SyncConfig, SyncSession};
//!
//! # async fn run(transport: SessionTransport) -> chatsync_sdk::Result<()> {
//! let config = SyncConfig::builder().default_page_size(30).build()?;
//! let session = SyncSession::new("user123", config, transport)?;
//!
//! // 打开房间列表并注册观察者
//! let rooms = session.joined_rooms().await?;
//! rooms.set_observer(|change| {
//!     println!("房间列表变更: {:?} ({:?})", change.kind, change.reason);
//! });
//! rooms.fetch_next_page().await?;
//!
//! // 消息时间线与已读游标
//! let messages = session.room_messages("room-1").await?;
//! messages.fetch_next_page().await?;
//! messages.mark_all_read().await?;
//!
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

// 导出核心模块
pub mod collection;
pub mod config;
pub mod connection_state;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod events;
pub mod feed;
pub mod model;
pub mod registry;
pub mod session;
pub mod transport;
pub mod version;

#[cfg(test)]
mod testing;

// 重新导出核心类型，方便使用
pub use collection::{
    ChangeKind, ChangeRecord, OrderedCollectionStore, PaginationState, PaginationTracker,
};
pub use config::{
    SyncConfig, SyncConfigBuilder, DEFAULT_DEBOUNCE_INTERVAL, DEFAULT_DEBOUNCE_INTERVAL_MS,
    DEFAULT_PAGE_SIZE,
};
pub use connection_state::{CollectionState, ConnectionState};
pub use coordinator::{ChangeObserver, FetchOutcome, SyncCoordinator};
pub use debounce::{
    CoalescedWriter, CoalescerStats, DebounceCoalescer, MergePolicy, WriteCallback,
};
pub use error::{Result, SyncError};
pub use events::{EventListener, EventManager, EventStats, SyncEvent};
pub use feed::{FeedAction, FeedEvent, RawFeedEvent, RealTimeFeedAdapter};
pub use model::{
    CollectionKind, Entity, JoinedRooms, MemberReason, Message, MessageReason, Presence, Room,
    RoomListReason, RoomMembers, RoomMessages, Scope, SortOrder, User,
};
pub use registry::{ScopeHandle, ScopeRegistry};
pub use session::SyncSession;
pub use transport::{
    CollectionTransport, FetchPage, PagedFetcher, PositionWriter, RealTimeFeed, SessionTransport,
};
pub use version::{user_agent, SDK_NAME, SDK_VERSION};
