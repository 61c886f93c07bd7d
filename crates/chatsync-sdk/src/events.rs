//! 事件系统模块 - 会话级生命周期事件
//!
//! 功能包括：
//! - 作用域打开/关闭事件
//! - 实时通道连接状态变更事件
//! - 分页完成/失败事件
//! - 已读游标上报事件
//! - 事件广播和订阅机制
//!
//! 集合内的逐条变更只走协调器的观察者，这里不重复广播。

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::collection::PaginationState;
use crate::connection_state::ConnectionState;
use crate::model::Scope;

/// 会话事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 作用域已打开
    ScopeOpened { scope: Scope, timestamp: i64 },
    /// 作用域已关闭
    ScopeClosed { scope: Scope, timestamp: i64 },
    /// 实时通道状态变更
    ConnectionStateChanged {
        scope: Scope,
        old_state: ConnectionState,
        new_state: ConnectionState,
        timestamp: i64,
    },
    /// 分页拉取完成
    FetchCompleted {
        scope: Scope,
        inserted: usize,
        paged: PaginationState,
        timestamp: i64,
    },
    /// 分页拉取失败
    FetchFailed {
        scope: Scope,
        error: String,
        timestamp: i64,
    },
    /// 已读游标已上报
    ReadCursorFlushed {
        scope: Scope,
        position: u64,
        success: bool,
        timestamp: i64,
    },
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ScopeOpened { .. } => "scope_opened",
            SyncEvent::ScopeClosed { .. } => "scope_closed",
            SyncEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            SyncEvent::FetchCompleted { .. } => "fetch_completed",
            SyncEvent::FetchFailed { .. } => "fetch_failed",
            SyncEvent::ReadCursorFlushed { .. } => "read_cursor_flushed",
        }
    }

    /// 获取事件关联的作用域
    pub fn scope(&self) -> &Scope {
        match self {
            SyncEvent::ScopeOpened { scope, .. }
            | SyncEvent::ScopeClosed { scope, .. }
            | SyncEvent::ConnectionStateChanged { scope, .. }
            | SyncEvent::FetchCompleted { scope, .. }
            | SyncEvent::FetchFailed { scope, .. }
            | SyncEvent::ReadCursorFlushed { scope, .. } => scope,
        }
    }

    /// 获取事件时间戳（UTC 毫秒）
    pub fn timestamp(&self) -> i64 {
        match self {
            SyncEvent::ScopeOpened { timestamp, .. }
            | SyncEvent::ScopeClosed { timestamp, .. }
            | SyncEvent::ConnectionStateChanged { timestamp, .. }
            | SyncEvent::FetchCompleted { timestamp, .. }
            | SyncEvent::FetchFailed { timestamp, .. }
            | SyncEvent::ReadCursorFlushed { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 事件管理器
///
/// `emit` 是同步的：协调器在串行区内发布事件，不能等待。
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SyncEvent>,
    /// 事件监听器映射，"*" 表示监听全部
    listeners: RwLock<HashMap<String, Vec<EventListener>>>,
    /// 事件统计
    stats: Mutex<EventStats>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            stats: Mutex::new(EventStats::default()),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {} ({})", event.event_type(), event.scope());

        {
            let mut stats = self.stats.lock();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景，仅打 debug
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read();
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }
        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Box::new(listener));

        self.stats.lock().listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.lock().listener_count = 0;
        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub fn get_stats(&self) -> EventStats {
        self.stats.lock().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn scope_opened(scope: Scope) -> SyncEvent {
        SyncEvent::ScopeOpened {
            scope,
            timestamp: now(),
        }
    }

    pub fn scope_closed(scope: Scope) -> SyncEvent {
        SyncEvent::ScopeClosed {
            scope,
            timestamp: now(),
        }
    }

    pub fn connection_state_changed(
        scope: Scope,
        old_state: ConnectionState,
        new_state: ConnectionState,
    ) -> SyncEvent {
        SyncEvent::ConnectionStateChanged {
            scope,
            old_state,
            new_state,
            timestamp: now(),
        }
    }

    pub fn fetch_completed(scope: Scope, inserted: usize, paged: PaginationState) -> SyncEvent {
        SyncEvent::FetchCompleted {
            scope,
            inserted,
            paged,
            timestamp: now(),
        }
    }

    pub fn fetch_failed(scope: Scope, error: String) -> SyncEvent {
        SyncEvent::FetchFailed {
            scope,
            error,
            timestamp: now(),
        }
    }

    pub fn read_cursor_flushed(scope: Scope, position: u64, success: bool) -> SyncEvent {
        SyncEvent::ReadCursorFlushed {
            scope,
            position,
            success,
            timestamp: now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_event_manager_basic_functionality() {
        let manager = EventManager::new(100);
        let mut receiver = manager.subscribe();

        manager.emit(event_builders::scope_opened(Scope::room_messages("r1")));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "scope_opened");
        assert_eq!(received.scope(), &Scope::room_messages("r1"));

        let stats = manager.get_stats();
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.events_by_type.get("scope_opened"), Some(&1));
    }

    #[test]
    fn test_event_listeners() {
        let manager = EventManager::new(100);
        let typed = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let typed_clone = typed.clone();
        manager.add_listener("fetch_completed", move |_event| {
            typed_clone.fetch_add(1, Ordering::SeqCst);
        });
        let all_clone = all.clone();
        manager.add_listener("*", move |_event| {
            all_clone.fetch_add(1, Ordering::SeqCst);
        });

        let scope = Scope::joined_rooms("u1");
        manager.emit(event_builders::fetch_completed(
            scope.clone(),
            3,
            PaginationState::PartiallyPopulated,
        ));
        manager.emit(event_builders::scope_closed(scope));

        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get_stats().listener_count, 2);

        manager.clear_listeners();
        assert_eq!(manager.get_stats().listener_count, 0);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let manager = EventManager::new(4);
        assert_eq!(manager.subscriber_count(), 0);
        manager.emit(event_builders::fetch_failed(
            Scope::room_members("r1"),
            "boom".to_string(),
        ));
        assert_eq!(manager.get_stats().total_events, 1);
    }
}
