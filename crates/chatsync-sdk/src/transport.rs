//! 外部协作者接口
//!
//! 传输层、鉴权和线上协议解析都不在本 crate 内，这里只定义同步层消费它们的方式：
//! - `PagedFetcher`：按游标分页拉取历史数据
//! - `RealTimeFeed`：按作用域订阅实时事件
//! - `PositionWriter`：上报位置类数据（已读游标）
//!
//! 超时由协作者负责，同步层不做超时也不做重试。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::feed::FeedEvent;
use crate::model::{Entity, Message, Room, Scope, User};

/// 一页分页结果
#[derive(Debug, Clone)]
pub struct FetchPage<E> {
    pub items: Vec<E>,
    pub has_more: bool,
}

impl<E> FetchPage<E> {
    pub fn new(items: Vec<E>, has_more: bool) -> Self {
        Self { items, has_more }
    }
}

/// 分页拉取协作者
#[async_trait]
pub trait PagedFetcher<E: Entity>: Send + Sync {
    /// `cursor` 为当前集合中最旧实体的 id，首次拉取为 None
    async fn fetch(&self, scope: &Scope, cursor: Option<E::Id>, count: usize) -> Result<FetchPage<E>>;
}

/// 实时事件协作者
#[async_trait]
pub trait RealTimeFeed<E: Entity>: Send + Sync {
    /// 订阅作用域，返回按到达顺序排列的事件流；`buffer` 为建议的通道容量
    async fn subscribe(&self, scope: &Scope, buffer: usize) -> Result<mpsc::Receiver<FeedEvent<E>>>;

    async fn unsubscribe(&self, scope: &Scope);
}

/// 位置写入协作者
#[async_trait]
pub trait PositionWriter: Send + Sync {
    async fn send_position(&self, scope: &Scope, value: u64) -> Result<()>;
}

/// 一种集合的协作者组合
pub struct CollectionTransport<E: Entity> {
    pub fetcher: Arc<dyn PagedFetcher<E>>,
    pub feed: Arc<dyn RealTimeFeed<E>>,
}

impl<E: Entity> CollectionTransport<E> {
    pub fn new(fetcher: Arc<dyn PagedFetcher<E>>, feed: Arc<dyn RealTimeFeed<E>>) -> Self {
        Self { fetcher, feed }
    }
}

impl<E: Entity> Clone for CollectionTransport<E> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            feed: self.feed.clone(),
        }
    }
}

/// 会话使用的全部协作者
#[derive(Clone)]
pub struct SessionTransport {
    pub rooms: CollectionTransport<Room>,
    pub messages: CollectionTransport<Message>,
    pub members: CollectionTransport<User>,
    pub positions: Arc<dyn PositionWriter>,
}
