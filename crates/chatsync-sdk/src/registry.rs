//! 作用域注册表
//!
//! 会话内每个作用域最多一个协调器。注册表按 `Scope` 缓存类型擦除的句柄，
//! 取出时再还原成具体的 `SyncCoordinator<K>`。

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::coordinator::SyncCoordinator;
use crate::model::{CollectionKind, Scope};

/// 类型擦除的作用域句柄
#[async_trait]
pub trait ScopeHandle: Send + Sync {
    fn scope(&self) -> &Scope;

    fn kind_name(&self) -> &'static str;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn is_closed(&self) -> bool;

    /// 返回本次调用是否真正执行了关闭
    async fn close(&self) -> bool;
}

#[async_trait]
impl<K: CollectionKind> ScopeHandle for SyncCoordinator<K> {
    fn scope(&self) -> &Scope {
        SyncCoordinator::scope(self)
    }

    fn kind_name(&self) -> &'static str {
        K::NAME
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn is_closed(&self) -> bool {
        SyncCoordinator::is_closed(self)
    }

    async fn close(&self) -> bool {
        SyncCoordinator::close(self).await
    }
}

/// 作用域注册表
#[derive(Default)]
pub struct ScopeRegistry {
    entries: Mutex<HashMap<Scope, Arc<dyn ScopeHandle>>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出已注册的协调器；类型不符时返回 None
    pub fn get<K: CollectionKind>(&self, scope: &Scope) -> Option<Arc<SyncCoordinator<K>>> {
        let handle = self.entries.lock().get(scope).cloned()?;
        downcast(handle)
    }

    /// 类型擦除的句柄
    pub fn handle(&self, scope: &Scope) -> Option<Arc<dyn ScopeHandle>> {
        self.entries.lock().get(scope).cloned()
    }

    /// 取出或创建协调器
    ///
    /// 返回 `(协调器, 是否新建)`。已关闭的句柄会被替换。
    /// 同一个作用域已注册为其他类型时返回 None。
    pub fn get_or_insert_with<K, F>(
        &self,
        scope: &Scope,
        create: F,
    ) -> Option<(Arc<SyncCoordinator<K>>, bool)>
    where
        K: CollectionKind,
        F: FnOnce() -> Arc<SyncCoordinator<K>>,
    {
        let mut entries = self.entries.lock();
        if let Some(handle) = entries.get(scope) {
            if !handle.is_closed() {
                return downcast(handle.clone()).map(|coordinator| (coordinator, false));
            }
            debug!("替换已关闭的作用域: {}", scope);
        }
        let coordinator = create();
        entries.insert(scope.clone(), coordinator.clone());
        Some((coordinator, true))
    }

    pub fn remove(&self, scope: &Scope) -> Option<Arc<dyn ScopeHandle>> {
        self.entries.lock().remove(scope)
    }

    /// 仅当注册的仍是地址为 `handle` 的那个协调器时才移除
    pub fn remove_exact(&self, scope: &Scope, handle: usize) -> bool {
        let mut entries = self.entries.lock();
        let same = entries
            .get(scope)
            .is_some_and(|entry| Arc::as_ptr(entry) as *const () as usize == handle);
        if same {
            entries.remove(scope);
        }
        same
    }

    /// 移出全部句柄
    pub fn drain(&self) -> Vec<Arc<dyn ScopeHandle>> {
        self.entries.lock().drain().map(|(_, handle)| handle).collect()
    }

    pub fn contains(&self, scope: &Scope) -> bool {
        self.entries.lock().contains_key(scope)
    }

    pub fn scopes(&self) -> Vec<Scope> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// 某一类型的全部协调器
    pub fn handles_of<K: CollectionKind>(&self) -> Vec<Arc<SyncCoordinator<K>>> {
        let handles: Vec<Arc<dyn ScopeHandle>> = self.entries.lock().values().cloned().collect();
        handles.into_iter().filter_map(downcast).collect()
    }
}

fn downcast<K: CollectionKind>(handle: Arc<dyn ScopeHandle>) -> Option<Arc<SyncCoordinator<K>>> {
    handle.as_any().downcast::<SyncCoordinator<K>>().ok()
}
