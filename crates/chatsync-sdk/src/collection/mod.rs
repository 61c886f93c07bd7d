//! 有序集合
//!
//! - `OrderedCollectionStore`：按 ordering key 排序、按 id 去重的序列，每次操作产出索引级 diff
//! - `PaginationTracker`：分页状态机

pub mod pagination;
pub mod store;

use serde::{Deserialize, Serialize};

pub use pagination::{PaginationState, PaginationTracker};
pub use store::OrderedCollectionStore;

/// 单次操作对序列造成的变化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert { index: usize },
    Update { index: usize },
    /// from 是移动前的索引，to 是移动完成后的索引
    Move { from: usize, to: usize },
    Remove { index: usize },
}

impl ChangeKind {
    /// 变化完成后实体所在的索引（删除时为删除前的索引）
    pub fn index(&self) -> usize {
        match *self {
            ChangeKind::Insert { index } => index,
            ChangeKind::Update { index } => index,
            ChangeKind::Move { to, .. } => to,
            ChangeKind::Remove { index } => index,
        }
    }
}

/// 交给观察者的变更记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord<R> {
    pub kind: ChangeKind,
    pub reason: R,
}

impl<R> ChangeRecord<R> {
    pub fn new(kind: ChangeKind, reason: R) -> Self {
        Self { kind, reason }
    }
}
