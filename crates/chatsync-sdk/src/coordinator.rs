//! 同步协调器
//!
//! 每个作用域一个协调器，是该集合唯一的修改入口：
//! - 实时事件经 `RealTimeFeedAdapter` 翻译后由 `ingest` 应用
//! - 历史数据由 `fetch_more` 分页拉取后插入
//! - 每次生效的变更同步通知给唯一的观察者
//!
//! 串行约束：所有修改及其通知都在 `sequencer` 内执行，实时事件和分页结果按到达顺序生效。
//! 集合状态放在独立的 `RwLock` 里，通知发生在写锁释放之后，观察者可以回读 `current_entities()`。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collection::{ChangeRecord, OrderedCollectionStore, PaginationTracker};
use crate::config::SyncConfig;
use crate::connection_state::{CollectionState, ConnectionState};
use crate::events::{event_builders, SyncEvent};
use crate::error::{Result, SyncError};
use crate::feed::{spawn_pump, FeedAction, FeedEvent, RealTimeFeedAdapter};
use crate::model::{
    CollectionKind, Entity, MemberReason, RoomMembers, RoomMessages, Scope, SortOrder, User,
};
use crate::session::SessionInner;
use crate::transport::{CollectionTransport, FetchPage};

/// 观察者：每条生效的变更调用一次
pub type ChangeObserver<R> = Arc<dyn Fn(&ChangeRecord<R>) + Send + Sync>;

/// 一次分页拉取的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    /// 实际插入的条数
    pub inserted: usize,
    /// 已存在或残缺而跳过的条数
    pub skipped: usize,
    /// 拉取完成后的组合状态
    pub state: CollectionState,
}

struct CoordinatorState<E: Entity> {
    store: OrderedCollectionStore<E>,
    pagination: PaginationTracker,
    connection: ConnectionState,
}

struct FeedPump {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 分页请求的 future 在完成前被丢弃时，把分页状态退回 `PartiallyPopulated`
struct FetchGuard<'a, K: CollectionKind> {
    coordinator: &'a SyncCoordinator<K>,
    armed: bool,
}

impl<'a, K: CollectionKind> FetchGuard<'a, K> {
    fn new(coordinator: &'a SyncCoordinator<K>) -> Self {
        Self {
            coordinator,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<K: CollectionKind> Drop for FetchGuard<'_, K> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.coordinator.state.write().pagination.abort();
        debug!(
            "[{}] 分页请求被取消: scope={}",
            K::NAME,
            self.coordinator.scope
        );
    }
}

/// 同步协调器
pub struct SyncCoordinator<K: CollectionKind> {
    scope: Scope,
    page_size: usize,
    feed_buffer: usize,
    state: RwLock<CoordinatorState<K::Entity>>,
    sequencer: Mutex<()>,
    observer: Mutex<Option<ChangeObserver<K::Reason>>>,
    closed: AtomicBool,
    transport: CollectionTransport<K::Entity>,
    /// 所属会话，非拥有引用
    session: Weak<SessionInner>,
    pump: Mutex<Option<FeedPump>>,
}

impl<K: CollectionKind> SyncCoordinator<K> {
    /// 创建不属于任何会话的协调器
    pub fn detached(
        scope: Scope,
        transport: CollectionTransport<K::Entity>,
        config: &SyncConfig,
    ) -> Arc<Self> {
        Self::with_session(scope, transport, config, Weak::new())
    }

    pub(crate) fn with_session(
        scope: Scope,
        transport: CollectionTransport<K::Entity>,
        config: &SyncConfig,
        session: Weak<SessionInner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scope,
            page_size: config.default_page_size.max(1),
            feed_buffer: config.feed_buffer.max(1),
            state: RwLock::new(CoordinatorState {
                store: OrderedCollectionStore::new(K::ORDER),
                pagination: PaginationTracker::new(),
                connection: ConnectionState::Degraded,
            }),
            sequencer: Mutex::new(()),
            observer: Mutex::new(None),
            closed: AtomicBool::new(false),
            transport,
            session,
            pump: Mutex::new(None),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 订阅实时通道并启动事件泵；已启动时直接返回
    ///
    /// 订阅失败时集合保持 `Degraded`，仍可分页拉取，调用方可稍后重试。
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_closed() {
            return Err(SyncError::ScopeClosed(self.scope.to_string()));
        }
        if self.pump.lock().is_some() {
            return Ok(());
        }

        let receiver = match self.transport.feed.subscribe(&self.scope, self.feed_buffer).await {
            Ok(receiver) => receiver,
            Err(e) => {
                warn!("[{}] 订阅实时通道失败: scope={}, error={}", K::NAME, self.scope, e);
                return Err(e);
            }
        };

        self.ingest(FeedEvent::ConnectionRestored);

        let cancel = CancellationToken::new();
        let handle = spawn_pump(Arc::downgrade(self), receiver, cancel.clone());
        let lost = {
            let mut pump = self.pump.lock();
            if pump.is_some() || self.is_closed() {
                cancel.cancel();
                handle.abort();
                true
            } else {
                *pump = Some(FeedPump { cancel, handle });
                false
            }
        };
        if lost {
            // 订阅期间被关闭：close 的退订早于这次订阅，需要再退订一次
            if self.is_closed() {
                self.transport.feed.unsubscribe(&self.scope).await;
            }
            return Ok(());
        }

        info!("✅ [{}] 作用域已启动: {}", K::NAME, self.scope);
        Ok(())
    }

    /// 当前集合的时间点快照
    pub fn current_entities(&self) -> Vec<K::Entity> {
        self.state.read().store.snapshot()
    }

    pub fn len(&self) -> usize {
        self.state.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().store.is_empty()
    }

    pub fn get(&self, id: &<K::Entity as Entity>::Id) -> Option<K::Entity> {
        self.state.read().store.get(id).cloned()
    }

    /// 组合状态 `{real_time, paged}`
    pub fn state(&self) -> CollectionState {
        let state = self.state.read();
        CollectionState {
            real_time: state.connection,
            paged: state.pagination.state(),
        }
    }

    /// 注册观察者，替换之前的观察者
    ///
    /// 不补发错过的变更：新观察者应先读一次 `current_entities()`。
    /// 观察者可以读取集合，但不能在回调里再修改同一个协调器。
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(&ChangeRecord<K::Reason>) + Send + Sync + 'static,
    {
        *self.observer.lock() = Some(Arc::new(observer));
    }

    pub fn clear_observer(&self) {
        self.observer.lock().take();
    }

    /// 应用一条实时事件
    ///
    /// 返回本次通知给观察者的变更；no-op、连接事件和被丢弃的事件返回 None。
    pub fn ingest(&self, event: FeedEvent<K::Entity>) -> Option<ChangeRecord<K::Reason>> {
        let _sequencer = self.sequencer.lock();
        if self.is_closed() {
            debug!("[{}] 作用域已关闭，忽略事件: {}", K::NAME, event.event_type());
            return None;
        }

        let action = {
            let state = self.state.read();
            RealTimeFeedAdapter::<K>::translate(event, &state.store)
        };
        self.apply_action(action)
    }

    /// 拉取更早的一页数据
    ///
    /// `AlreadyFetching` / `NothingToFetch` 在发起请求之前立即返回。
    /// `count` 为 0 时使用配置的分页大小。
    /// 返回的 future 在完成前被丢弃（超时、select 落败）时，分页状态恢复为可重试。
    pub async fn fetch_more(&self, count: usize) -> Result<FetchOutcome> {
        let count = self.effective_count(count);
        let cursor = self.begin_fetch()?;
        let mut guard = FetchGuard::new(self);
        debug!(
            "[{}] 发起分页: scope={}, cursor={:?}, count={}",
            K::NAME,
            self.scope,
            cursor,
            count
        );
        let result = self.transport.fetcher.fetch(&self.scope, cursor, count).await;
        guard.disarm();
        self.complete_fetch(count, result)
    }

    /// 按配置的分页大小拉取
    pub async fn fetch_next_page(&self) -> Result<FetchOutcome> {
        self.fetch_more(self.page_size).await
    }

    /// 回调形式的 `fetch_more`
    ///
    /// 状态类错误同步返回，不会调用回调；否则请求在后台执行，完成后回调恰好调用一次。
    /// 请求进行中协调器被释放或关闭时，回调收到 `ScopeClosed`。
    pub fn fetch_more_with<F>(self: &Arc<Self>, count: usize, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<FetchOutcome>) + Send + 'static,
    {
        let count = self.effective_count(count);
        let cursor = self.begin_fetch()?;

        let coordinator = Arc::downgrade(self);
        let fetcher = self.transport.fetcher.clone();
        let scope = self.scope.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch(&scope, cursor, count).await;
            let outcome = match coordinator.upgrade() {
                Some(coordinator) => coordinator.complete_fetch(count, result),
                None => Err(SyncError::ScopeClosed(scope.to_string())),
            };
            on_complete(outcome);
        });
        Ok(())
    }

    /// 关闭作用域
    ///
    /// 之后的实时事件和分页结果都不再生效，观察者被清除，事件泵停止并退订。
    /// 属于会话时同时从会话注销，并写出该作用域待写的已读游标；之后再打开会得到新的协调器。
    /// 返回本次调用是否真正执行了关闭。
    pub async fn close(&self) -> bool {
        {
            let _sequencer = self.sequencer.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return false;
            }
            self.observer.lock().take();
        }

        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.cancel.cancel();
            pump.handle.abort();
        }
        self.transport.feed.unsubscribe(&self.scope).await;
        info!("[{}] 作用域已关闭: {}", K::NAME, self.scope);

        if let Some(session) = self.session.upgrade() {
            let handle = self as *const Self as usize;
            session.release_scope(&self.scope, handle).await;
        }
        true
    }

    fn effective_count(&self, count: usize) -> usize {
        if count == 0 {
            self.page_size
        } else {
            count
        }
    }

    /// 进入 Fetching 并返回游标（当前最旧实体的 id）
    fn begin_fetch(&self) -> Result<Option<<K::Entity as Entity>::Id>> {
        if self.is_closed() {
            return Err(SyncError::ScopeClosed(self.scope.to_string()));
        }
        let mut state = self.state.write();
        if !state.pagination.request_fetch()? {
            return Err(SyncError::NothingToFetch);
        }
        let oldest = match K::ORDER {
            SortOrder::Ascending => state.store.first(),
            SortOrder::Descending => state.store.last(),
        };
        Ok(oldest.map(|entity| entity.id().clone()))
    }

    fn complete_fetch(
        &self,
        requested: usize,
        result: Result<FetchPage<K::Entity>>,
    ) -> Result<FetchOutcome> {
        let _sequencer = self.sequencer.lock();
        if self.is_closed() {
            debug!("[{}] 作用域已关闭，丢弃分页结果: {}", K::NAME, self.scope);
            return Err(SyncError::ScopeClosed(self.scope.to_string()));
        }

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                self.state.write().pagination.abort();
                warn!("[{}] 分页失败: scope={}, error={}", K::NAME, self.scope, e);
                self.emit(event_builders::fetch_failed(self.scope.clone(), e.to_string()));
                return Err(e);
            }
        };

        let returned = page.items.len();
        let reason = K::history_loaded();
        let mut inserted = 0usize;
        let mut skipped = 0usize;
        for entity in page.items {
            if let Err(why) = entity.validate() {
                warn!("[{}] 跳过残缺的分页数据: {}", K::NAME, why);
                skipped += 1;
                continue;
            }
            let change = self.state.write().store.insert(entity);
            match change {
                Some(kind) => {
                    inserted += 1;
                    self.notify(&ChangeRecord::new(kind, reason));
                }
                None => skipped += 1,
            }
        }

        let paged = self
            .state
            .write()
            .pagination
            .complete(returned, requested, page.has_more);
        info!(
            "[{}] 分页完成: scope={}, 插入 {} 条, 跳过 {} 条, state={}",
            K::NAME,
            self.scope,
            inserted,
            skipped,
            paged
        );
        self.emit(event_builders::fetch_completed(self.scope.clone(), inserted, paged));

        Ok(FetchOutcome {
            inserted,
            skipped,
            state: self.state(),
        })
    }

    /// 需在 sequencer 内调用
    fn apply_action(&self, action: FeedAction<K>) -> Option<ChangeRecord<K::Reason>> {
        let record = match action {
            FeedAction::Insert { entity, reason } => {
                let change = self.state.write().store.insert(entity);
                change.map(|kind| ChangeRecord::new(kind, reason))
            }
            FeedAction::Update { entity, reason } => {
                let change = self.state.write().store.update(entity);
                change.map(|kind| ChangeRecord::new(kind, reason))
            }
            FeedAction::Remove { id, reason } => {
                let change = self.state.write().store.remove(&id);
                change.map(|kind| ChangeRecord::new(kind, reason))
            }
            FeedAction::Connection(new_state) => {
                self.set_connection(new_state);
                None
            }
            FeedAction::Drop => None,
        };

        if let Some(record) = &record {
            self.notify(record);
        }
        record
    }

    fn set_connection(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut self.state.write().connection, new_state);
        if old_state != new_state {
            info!(
                "[{}] 实时通道状态变更: scope={}, {} -> {}",
                K::NAME,
                self.scope,
                old_state,
                new_state
            );
            self.emit(event_builders::connection_state_changed(
                self.scope.clone(),
                old_state,
                new_state,
            ));
        }
    }

    fn notify(&self, record: &ChangeRecord<K::Reason>) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer(record);
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(session) = self.session.upgrade() {
            session.events.emit(event);
        }
    }
}

impl<K: CollectionKind> Drop for SyncCoordinator<K> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.cancel.cancel();
            pump.handle.abort();
        }
    }
}

impl SyncCoordinator<RoomMessages> {
    /// 标记已读到指定消息，经会话的合并写入器上报
    pub async fn mark_read_up_to(&self, message_id: u64) -> Result<()> {
        let session = self.session.upgrade().ok_or(SyncError::SessionGone)?;
        session.mark_read(self.scope.clone(), message_id).await
    }

    /// 标记已读到当前最新的一条消息；集合为空时什么都不做
    pub async fn mark_all_read(&self) -> Result<()> {
        let newest = self.state.read().store.last().map(|message| message.id);
        match newest {
            Some(message_id) => self.mark_read_up_to(message_id).await,
            None => Ok(()),
        }
    }
}

impl SyncCoordinator<RoomMembers> {
    /// 应用带外拉取到的用户快照
    ///
    /// 只更新已在成员列表中的用户，不会因此插入新成员。
    pub fn apply_user_refresh(&self, user: User) -> Option<ChangeRecord<MemberReason>> {
        self.ingest(FeedEvent::EntityUpdated(user))
    }
}
