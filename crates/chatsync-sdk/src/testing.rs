//! 测试用的内存协作者

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, SyncError};
use crate::feed::FeedEvent;
use crate::model::{Entity, Message, Presence, Room, Scope, User};
use crate::transport::{
    CollectionTransport, FetchPage, PagedFetcher, PositionWriter, RealTimeFeed, SessionTransport,
};

pub(crate) fn room(id: &str, last_message_at: Option<i64>) -> Room {
    Room {
        id: id.to_string(),
        name: id.to_string(),
        created_at: 1,
        last_message_at,
        unread_count: 0,
        is_private: false,
    }
}

pub(crate) fn message(id: u64) -> Message {
    Message {
        id,
        room_id: "r1".to_string(),
        sender_id: "u1".to_string(),
        text: format!("message {}", id),
        created_at: id as i64,
        updated_at: None,
        deleted: false,
    }
}

pub(crate) fn user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        avatar_url: None,
        presence: Presence::Offline,
        updated_at: 0,
    }
}

type FetchCall<E> = (Scope, Option<<E as Entity>::Id>, usize);

/// 按脚本返回分页结果；脚本耗尽后返回空页
pub(crate) struct ScriptedFetcher<E: Entity> {
    pages: Mutex<VecDeque<Result<FetchPage<E>>>>,
    calls: Mutex<Vec<FetchCall<E>>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl<E: Entity> ScriptedFetcher<E> {
    pub(crate) fn new() -> Self {
        Self {
            pages: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    pub(crate) fn push_page(&self, items: Vec<E>, has_more: bool) {
        self.pages.lock().push_back(Ok(FetchPage::new(items, has_more)));
    }

    pub(crate) fn push_error(&self, error: SyncError) {
        self.pages.lock().push_back(Err(error));
    }

    /// 下一次请求挂起，直到返回的 sender 被触发
    pub(crate) fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock() = Some(rx);
        tx
    }

    pub(crate) fn calls(&self) -> Vec<FetchCall<E>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl<E: Entity> PagedFetcher<E> for ScriptedFetcher<E> {
    async fn fetch(&self, scope: &Scope, cursor: Option<E::Id>, count: usize) -> Result<FetchPage<E>> {
        self.calls.lock().push((scope.clone(), cursor, count));
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let next = self.pages.lock().pop_front();
        next.unwrap_or_else(|| Ok(FetchPage::new(Vec::new(), false)))
    }
}

/// 每个作用域一条 mpsc 通道，测试持有发送端
pub(crate) struct ChannelFeed<E: Entity> {
    senders: Mutex<HashMap<Scope, mpsc::Sender<FeedEvent<E>>>>,
    unsubscribed: Mutex<Vec<Scope>>,
    fail: AtomicBool,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl<E: Entity> ChannelFeed<E> {
    pub(crate) fn new() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            unsubscribed: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            gate: Mutex::new(None),
        }
    }

    /// 下一次订阅挂起，直到返回的 sender 被触发
    pub(crate) fn hold_next_subscribe(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock() = Some(rx);
        tx
    }

    pub(crate) fn sender(&self, scope: &Scope) -> Option<mpsc::Sender<FeedEvent<E>>> {
        self.senders.lock().get(scope).cloned()
    }

    /// 丢弃发送端，模拟通道关闭
    pub(crate) fn drop_sender(&self, scope: &Scope) {
        self.senders.lock().remove(scope);
    }

    pub(crate) fn fail_subscriptions(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn unsubscribed(&self) -> Vec<Scope> {
        self.unsubscribed.lock().clone()
    }
}

#[async_trait]
impl<E: Entity> RealTimeFeed<E> for ChannelFeed<E> {
    async fn subscribe(&self, scope: &Scope, buffer: usize) -> Result<mpsc::Receiver<FeedEvent<E>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::TransportFailure("subscribe refused".to_string()));
        }
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let (tx, rx) = mpsc::channel(buffer);
        self.senders.lock().insert(scope.clone(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, scope: &Scope) {
        self.senders.lock().remove(scope);
        self.unsubscribed.lock().push(scope.clone());
    }
}

/// 记录所有位置写入
pub(crate) struct RecordingPositions {
    writes: Mutex<Vec<(Scope, u64)>>,
    fail: AtomicBool,
}

impl RecordingPositions {
    pub(crate) fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn writes(&self) -> Vec<(Scope, u64)> {
        self.writes.lock().clone()
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PositionWriter for RecordingPositions {
    async fn send_position(&self, scope: &Scope, value: u64) -> Result<()> {
        self.writes.lock().push((scope.clone(), value));
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::TransportFailure("position rejected".to_string()));
        }
        Ok(())
    }
}

/// 一整套内存协作者
pub(crate) struct Fakes {
    pub rooms_fetcher: Arc<ScriptedFetcher<Room>>,
    pub rooms_feed: Arc<ChannelFeed<Room>>,
    pub messages_fetcher: Arc<ScriptedFetcher<Message>>,
    pub messages_feed: Arc<ChannelFeed<Message>>,
    pub members_fetcher: Arc<ScriptedFetcher<User>>,
    pub members_feed: Arc<ChannelFeed<User>>,
    pub positions: Arc<RecordingPositions>,
}

impl Fakes {
    pub(crate) fn new() -> Self {
        Self {
            rooms_fetcher: Arc::new(ScriptedFetcher::new()),
            rooms_feed: Arc::new(ChannelFeed::new()),
            messages_fetcher: Arc::new(ScriptedFetcher::new()),
            messages_feed: Arc::new(ChannelFeed::new()),
            members_fetcher: Arc::new(ScriptedFetcher::new()),
            members_feed: Arc::new(ChannelFeed::new()),
            positions: Arc::new(RecordingPositions::new()),
        }
    }

    pub(crate) fn transport(&self) -> SessionTransport {
        SessionTransport {
            rooms: CollectionTransport::new(self.rooms_fetcher.clone(), self.rooms_feed.clone()),
            messages: CollectionTransport::new(
                self.messages_fetcher.clone(),
                self.messages_feed.clone(),
            ),
            members: CollectionTransport::new(
                self.members_fetcher.clone(),
                self.members_feed.clone(),
            ),
            positions: self.positions.clone(),
        }
    }
}
