//! 同步会话
//!
//! 会话是一个登录用户的同步上下文：
//! - 按作用域缓存协调器（每个作用域至多一个）
//! - 持有已读游标的合并写入器
//! - 会话级事件广播
//!
//! 协调器只弱引用会话；会话被释放后协调器仍可读，但需要会话的操作返回 `SessionGone`。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::debounce::{CoalescedWriter, DebounceCoalescer};
use crate::error::{Result, SyncError};
use crate::events::{event_builders, EventManager};
use crate::model::{CollectionKind, JoinedRooms, RoomMembers, RoomMessages, Scope, User};
use crate::registry::ScopeRegistry;
use crate::transport::{PositionWriter, SessionTransport};
use crate::version::user_agent;

/// 已读游标写入：转交位置写入协作者并广播结果
struct ReadCursorWriter {
    positions: Arc<dyn PositionWriter>,
    events: Arc<EventManager>,
}

#[async_trait]
impl CoalescedWriter<Scope, u64> for ReadCursorWriter {
    async fn write(&self, scope: &Scope, position: u64) -> Result<()> {
        let result = self.positions.send_position(scope, position).await;
        self.events.emit(event_builders::read_cursor_flushed(
            scope.clone(),
            position,
            result.is_ok(),
        ));
        result
    }
}

pub(crate) struct SessionInner {
    user_id: String,
    config: SyncConfig,
    transport: SessionTransport,
    registry: ScopeRegistry,
    read_cursors: DebounceCoalescer<Scope, u64>,
    pub(crate) events: Arc<EventManager>,
    shut_down: AtomicBool,
}

impl SessionInner {
    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }
        Ok(())
    }

    /// 协调器关闭后注销作用域并写出待写的已读游标
    ///
    /// 注册的已是别的协调器（关闭后被替换，或会话关闭时已移出）时什么都不做。
    pub(crate) async fn release_scope(&self, scope: &Scope, handle: usize) {
        if !self.registry.remove_exact(scope, handle) {
            return;
        }
        self.read_cursors.flush(scope).await;
        self.events.emit(event_builders::scope_closed(scope.clone()));
        debug!("作用域已注销: {}", scope);
    }

    /// 合并上报已读位置，写入完成后返回
    pub(crate) async fn mark_read(&self, scope: Scope, position: u64) -> Result<()> {
        self.ensure_running()?;
        debug!("标记已读: scope={}, position={}", scope, position);
        self.read_cursors.submit(scope, position).await
    }
}

/// 同步会话
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl SyncSession {
    pub fn new(
        user_id: impl Into<String>,
        config: SyncConfig,
        transport: SessionTransport,
    ) -> Result<Self> {
        config.validate()?;
        let user_id = user_id.into();

        let events = Arc::new(EventManager::new(config.event_capacity));
        let writer = Arc::new(ReadCursorWriter {
            positions: transport.positions.clone(),
            events: events.clone(),
        });
        let read_cursors = DebounceCoalescer::new(config.debounce_interval(), writer);

        info!(
            "🚀 同步会话已创建: user={}, debounce={}ms, page_size={}, sdk={}",
            user_id,
            config.debounce_interval_ms,
            config.default_page_size,
            user_agent()
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                user_id,
                config,
                transport,
                registry: ScopeRegistry::new(),
                read_cursors,
                events,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// 会话事件管理器
    pub fn events(&self) -> Arc<EventManager> {
        self.inner.events.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// 当前用户已加入的房间列表
    pub async fn joined_rooms(&self) -> Result<Arc<SyncCoordinator<JoinedRooms>>> {
        self.open::<JoinedRooms>(Scope::joined_rooms(self.inner.user_id.clone()))
            .await
    }

    /// 房间消息时间线
    pub async fn room_messages(
        &self,
        room_id: impl Into<String>,
    ) -> Result<Arc<SyncCoordinator<RoomMessages>>> {
        self.open::<RoomMessages>(Scope::room_messages(room_id)).await
    }

    /// 房间成员列表
    pub async fn room_members(
        &self,
        room_id: impl Into<String>,
    ) -> Result<Arc<SyncCoordinator<RoomMembers>>> {
        self.open::<RoomMembers>(Scope::room_members(room_id)).await
    }

    /// 当前打开的作用域
    pub fn open_scopes(&self) -> Vec<Scope> {
        self.inner.registry.scopes()
    }

    /// 关闭作用域，之后再打开会得到新的协调器
    ///
    /// 等同于直接调用协调器的 `close`：作用域上待写的已读游标会被写出。
    /// 作用域未打开或已关闭时返回 false。
    pub async fn close_scope(&self, scope: &Scope) -> bool {
        match self.inner.registry.handle(scope) {
            Some(handle) => handle.close().await,
            None => false,
        }
    }

    /// 合并上报房间的已读位置，写入完成后返回
    pub async fn mark_read(&self, room_id: impl Into<String>, position: u64) -> Result<()> {
        self.inner
            .mark_read(Scope::room_messages(room_id), position)
            .await
    }

    /// 合并上报房间的已读位置，不等待写入
    pub fn set_read_cursor(&self, room_id: impl Into<String>, position: u64) -> Result<()> {
        self.inner.ensure_running()?;
        self.inner
            .read_cursors
            .set(Scope::room_messages(room_id), position);
        Ok(())
    }

    /// 把带外拉取的用户快照应用到所有打开的成员列表
    ///
    /// 返回实际发生变更的作用域数量。
    pub fn apply_user_refresh(&self, user: User) -> usize {
        let mut updated = 0;
        for coordinator in self.inner.registry.handles_of::<RoomMembers>() {
            if coordinator.apply_user_refresh(user.clone()).is_some() {
                updated += 1;
            }
        }
        debug!("用户快照已应用: user={}, 更新 {} 个成员列表", user.id, updated);
        updated
    }

    /// 关闭会话
    ///
    /// 先写出所有待写的已读游标，再关闭合并写入器和全部作用域。
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("正在关闭同步会话: user={}", self.inner.user_id);

        self.inner.read_cursors.flush_all().await;
        self.inner.read_cursors.shutdown();

        let handles = self.inner.registry.drain();
        join_all(handles.iter().map(|handle| handle.close())).await;
        for handle in &handles {
            self.inner
                .events
                .emit(event_builders::scope_closed(handle.scope().clone()));
        }
        info!("✅ 同步会话已关闭: user={}", self.inner.user_id);
    }

    async fn open<K: CollectionKind>(&self, scope: Scope) -> Result<Arc<SyncCoordinator<K>>> {
        self.inner.ensure_running()?;

        let (coordinator, created) = self
            .inner
            .registry
            .get_or_insert_with::<K, _>(&scope, || {
                SyncCoordinator::with_session(
                    scope.clone(),
                    K::transport(&self.inner.transport).clone(),
                    &self.inner.config,
                    Arc::downgrade(&self.inner),
                )
            })
            .ok_or_else(|| {
                SyncError::ScopeClosed(format!("{} is registered with another kind", scope))
            })?;

        if created {
            info!("[{}] 打开作用域: {}", K::NAME, scope);
            self.inner.events.emit(event_builders::scope_opened(scope.clone()));
            if let Err(e) = coordinator.start().await {
                warn!(
                    "[{}] 实时通道不可用，以降级状态运行: scope={}, error={}",
                    K::NAME,
                    scope,
                    e
                );
            }
            // 打开期间会话被关闭：shutdown 可能没看到这个作用域
            if self.inner.ensure_running().is_err() {
                warn!("[{}] 会话已关闭，撤销作用域: {}", K::NAME, scope);
                coordinator.close().await;
                return Err(SyncError::ShuttingDown);
            }
        }
        Ok(coordinator)
    }
}
