//! 合并写入模块（防抖）
//!
//! 功能包括：
//! - 同一个 key 在窗口内的多次 set 合并为一次写入
//! - 窗口从第一次 set 开始计算，后续 set 不会重置计时
//! - 每个 set 的回调都恰好调用一次，按入队顺序，拿到同一个写入结果
//! - 手动 flush / cancel / shutdown
//!
//! 已读游标就是典型场景：快速滚动时只上报窗口内最大的位置。

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

/// 合并策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// 取最大值，值只会前进
    #[default]
    MonotonicMax,
    /// 取最后一次 set 的值
    Latest,
}

impl MergePolicy {
    pub fn merge<V: Ord>(self, current: V, incoming: V) -> V {
        match self {
            MergePolicy::MonotonicMax => current.max(incoming),
            MergePolicy::Latest => incoming,
        }
    }
}

/// 合并后的写入协作者
#[async_trait]
pub trait CoalescedWriter<K, V>: Send + Sync {
    async fn write(&self, key: &K, value: V) -> Result<()>;
}

/// 写入完成回调
pub type WriteCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// 合并写入统计
#[derive(Debug, Clone, Default)]
pub struct CoalescerStats {
    /// set 调用次数
    pub submitted: u64,
    /// 合并进已有条目的次数
    pub merged: u64,
    /// 实际写入次数
    pub writes: u64,
    /// 写入失败次数
    pub failures: u64,
    /// 被 cancel / shutdown 丢弃的条目数
    pub cancelled: u64,
}

struct PendingWrite<V> {
    value: V,
    callbacks: Vec<WriteCallback>,
    timer: Option<JoinHandle<()>>,
    /// 区分同一个 key 先后出现的条目，过期的计时器不会冲掉新条目
    generation: u64,
}

struct Inner<K, V> {
    interval: Duration,
    policy: MergePolicy,
    writer: Arc<dyn CoalescedWriter<K, V>>,
    /// 计时器所在的运行时；为 None 时使用调用线程的运行时
    runtime: Option<Handle>,
    pending: Mutex<HashMap<K, PendingWrite<V>>>,
    stats: Mutex<CoalescerStats>,
    shut_down: AtomicBool,
    next_generation: AtomicU64,
}

/// 合并写入器
pub struct DebounceCoalescer<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Ord + Debug + Send + Sync + 'static,
{
    inner: Arc<Inner<K, V>>,
}

impl<K, V> DebounceCoalescer<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Ord + Debug + Send + Sync + 'static,
{
    pub fn new(interval: Duration, writer: Arc<dyn CoalescedWriter<K, V>>) -> Self {
        Self::with_policy(interval, MergePolicy::default(), writer)
    }

    /// 在运行时内创建时，计时器固定跑在该运行时上
    pub fn with_policy(
        interval: Duration,
        policy: MergePolicy,
        writer: Arc<dyn CoalescedWriter<K, V>>,
    ) -> Self {
        Self::build(interval, policy, writer, Handle::try_current().ok())
    }

    /// 指定计时器所在的运行时，之后可以从任意线程 set
    pub fn with_runtime(
        interval: Duration,
        policy: MergePolicy,
        writer: Arc<dyn CoalescedWriter<K, V>>,
        runtime: Handle,
    ) -> Self {
        Self::build(interval, policy, writer, Some(runtime))
    }

    fn build(
        interval: Duration,
        policy: MergePolicy,
        writer: Arc<dyn CoalescedWriter<K, V>>,
        runtime: Option<Handle>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                interval,
                policy,
                writer,
                runtime,
                pending: Mutex::new(HashMap::new()),
                stats: Mutex::new(CoalescerStats::default()),
                shut_down: AtomicBool::new(false),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn policy(&self) -> MergePolicy {
        self.inner.policy
    }

    /// 设置值，不关心写入结果
    pub fn set(&self, key: K, value: V) {
        self.enqueue(key, value, None);
    }

    /// 设置值，写入完成（或被丢弃）时回调恰好调用一次
    ///
    /// 可以从任意线程调用。创建时和调用时都没有 tokio 运行时，回调立即收到 `NoRuntime`。
    pub fn set_with<F>(&self, key: K, value: V, on_complete: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.enqueue(key, value, Some(Box::new(on_complete)));
    }

    /// `set_with` 的 async 形式
    pub async fn submit(&self, key: K, value: V) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.set_with(key, value, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(SyncError::ShuttingDown))
    }

    /// 立即写入 key 的待写条目；没有待写条目时返回 false
    pub async fn flush(&self, key: &K) -> bool {
        self.inner.flush_entry(key, None).await
    }

    /// 立即写入所有待写条目
    pub async fn flush_all(&self) {
        let keys: Vec<K> = self.inner.pending.lock().keys().cloned().collect();
        if keys.is_empty() {
            return;
        }
        debug!("flush_all: {} 个待写条目", keys.len());
        for key in keys {
            self.inner.flush_entry(&key, None).await;
        }
    }

    /// 丢弃 key 的待写条目，回调收到 `ShuttingDown`
    pub fn cancel(&self, key: &K) -> bool {
        let entry = self.inner.pending.lock().remove(key);
        match entry {
            Some(entry) => {
                debug!("取消待写条目: key={:?}", key);
                self.inner.discard(vec![entry]);
                true
            }
            None => false,
        }
    }

    /// 停止接收新的写入并丢弃所有待写条目
    ///
    /// 需要保留最后的值时先调用 `flush_all`。之后的 set 立即以 `ShuttingDown` 完成。
    pub fn shutdown(&self) {
        let entries: Vec<PendingWrite<V>> = {
            let mut pending = self.inner.pending.lock();
            if self.inner.shut_down.swap(true, Ordering::SeqCst) {
                return;
            }
            pending.drain().map(|(_, entry)| entry).collect()
        };
        info!("合并写入器已关闭，丢弃 {} 个待写条目", entries.len());
        self.inner.discard(entries);
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.inner.pending.lock().contains_key(key)
    }

    /// 待写的值（已合并）
    pub fn pending_value(&self, key: &K) -> Option<V> {
        self.inner.pending.lock().get(key).map(|entry| entry.value.clone())
    }

    pub fn stats(&self) -> CoalescerStats {
        self.inner.stats.lock().clone()
    }

    fn enqueue(&self, key: K, value: V, callback: Option<WriteCallback>) {
        let rejected = {
            let mut pending = self.inner.pending.lock();
            if self.inner.shut_down.load(Ordering::SeqCst) {
                debug!("合并写入器已关闭，拒绝 set: key={:?}", key);
                Some((callback, SyncError::ShuttingDown))
            } else if let Some(entry) = pending.get_mut(&key) {
                entry.value = self.inner.policy.merge(entry.value.clone(), value);
                entry.callbacks.extend(callback);
                let mut stats = self.inner.stats.lock();
                stats.submitted += 1;
                stats.merged += 1;
                None
            } else {
                let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
                match self.spawn_timer(key.clone(), generation) {
                    Some(timer) => {
                        self.inner.stats.lock().submitted += 1;
                        pending.insert(
                            key,
                            PendingWrite {
                                value,
                                callbacks: callback.into_iter().collect(),
                                timer: Some(timer),
                                generation,
                            },
                        );
                        None
                    }
                    None => {
                        warn!("没有可用的 tokio 运行时，拒绝 set: key={:?}", key);
                        Some((callback, SyncError::NoRuntime))
                    }
                }
            }
        };

        if let Some((Some(callback), error)) = rejected {
            callback(Err(error));
        }
    }

    fn spawn_timer(&self, key: K, generation: u64) -> Option<JoinHandle<()>> {
        let runtime = match &self.inner.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().ok()?,
        };
        let inner = Arc::downgrade(&self.inner);
        let interval = self.inner.interval;
        Some(runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            fire(inner, key, generation).await;
        }))
    }
}

async fn fire<K, V>(inner: Weak<Inner<K, V>>, key: K, generation: u64)
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Ord + Debug + Send + Sync + 'static,
{
    if let Some(inner) = inner.upgrade() {
        inner.flush_entry(&key, Some(generation)).await;
    }
}

impl<K, V> Inner<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Ord + Debug + Send + Sync + 'static,
{
    /// 取出条目并写入
    ///
    /// `generation` 为 Some 时由计时器触发，只写入同一代的条目；
    /// 手动 flush 传 None，并中止条目的计时器。
    async fn flush_entry(&self, key: &K, generation: Option<u64>) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            let current = pending.get(key).map(|entry| entry.generation);
            match (current, generation) {
                (Some(current), Some(expected)) if current != expected => None,
                (Some(_), _) => pending.remove(key),
                (None, _) => None,
            }
        };
        let Some(mut entry) = entry else {
            return false;
        };

        if generation.is_none() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
        self.write(key, entry).await;
        true
    }

    async fn write(&self, key: &K, entry: PendingWrite<V>) {
        let PendingWrite {
            value, callbacks, ..
        } = entry;
        debug!(
            "合并写入: key={:?}, value={:?}, 回调 {} 个",
            key,
            value,
            callbacks.len()
        );

        let result = self.writer.write(key, value).await;
        {
            let mut stats = self.stats.lock();
            stats.writes += 1;
            if result.is_err() {
                stats.failures += 1;
            }
        }
        if let Err(e) = &result {
            warn!("合并写入失败: key={:?}, error={}", key, e);
        }

        for callback in callbacks {
            callback(result.clone());
        }
    }

    fn discard(&self, entries: Vec<PendingWrite<V>>) {
        self.stats.lock().cancelled += entries.len() as u64;
        for entry in entries {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            for callback in entry.callbacks {
                callback(Err(SyncError::ShuttingDown));
            }
        }
    }
}

impl<K, V> Drop for Inner<K, V> {
    fn drop(&mut self) {
        for (_, entry) in self.pending.get_mut().drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            for callback in entry.callbacks {
                callback(Err(SyncError::ShuttingDown));
            }
        }
    }
}
