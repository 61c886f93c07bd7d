use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};

/// 分页状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaginationState {
    /// 历史数据已全部拉取
    FullyPopulated,
    /// 还有更早的数据
    PartiallyPopulated,
    /// 分页请求进行中
    Fetching,
}

impl std::fmt::Display for PaginationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaginationState::FullyPopulated => write!(f, "fully_populated"),
            PaginationState::PartiallyPopulated => write!(f, "partially_populated"),
            PaginationState::Fetching => write!(f, "fetching"),
        }
    }
}

/// 分页状态机
///
/// ```text
/// PartiallyPopulated --request_fetch--> Fetching
/// Fetching --complete(n >= m)--> PartiallyPopulated
/// Fetching --complete(n < m)---> FullyPopulated
/// Fetching --abort-------------> PartiallyPopulated
/// FullyPopulated --reset-------> PartiallyPopulated
/// ```
#[derive(Debug, Clone)]
pub struct PaginationTracker {
    state: PaginationState,
}

impl PaginationTracker {
    pub fn new() -> Self {
        Self {
            state: PaginationState::PartiallyPopulated,
        }
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    /// 申请一次分页拉取
    ///
    /// - `Err(AlreadyFetching)`：已有请求在进行
    /// - `Ok(false)`：已全部拉取，无事可做
    /// - `Ok(true)`：已进入 Fetching，调用方应发起请求
    pub fn request_fetch(&mut self) -> Result<bool> {
        match self.state {
            PaginationState::Fetching => Err(SyncError::AlreadyFetching),
            PaginationState::FullyPopulated => Ok(false),
            PaginationState::PartiallyPopulated => {
                self.state = PaginationState::Fetching;
                Ok(true)
            }
        }
    }

    /// 分页请求完成：返回数量少于请求数量，或服务端明确表示没有更多时，视为已全部拉取
    pub fn complete(&mut self, returned: usize, requested: usize, has_more: bool) -> PaginationState {
        debug_assert_eq!(self.state, PaginationState::Fetching);
        self.state = if returned < requested || !has_more {
            PaginationState::FullyPopulated
        } else {
            PaginationState::PartiallyPopulated
        };
        debug!(
            "分页完成: returned={}, requested={}, has_more={}, state={}",
            returned, requested, has_more, self.state
        );
        self.state
    }

    /// 请求失败，回到可重试状态
    pub fn abort(&mut self) {
        if self.state == PaginationState::Fetching {
            self.state = PaginationState::PartiallyPopulated;
        }
    }

    /// 显式重置，唯一能离开 FullyPopulated 的方式
    pub fn reset(&mut self) {
        self.state = PaginationState::PartiallyPopulated;
    }
}

impl Default for PaginationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_mutual_exclusion() {
        let mut tracker = PaginationTracker::new();
        assert_eq!(tracker.request_fetch(), Ok(true));
        assert_eq!(tracker.state(), PaginationState::Fetching);
        assert_eq!(tracker.request_fetch(), Err(SyncError::AlreadyFetching));
    }

    #[test]
    fn test_short_page_terminates() {
        let mut tracker = PaginationTracker::new();
        tracker.request_fetch().unwrap();
        assert_eq!(tracker.complete(20, 20, true), PaginationState::PartiallyPopulated);

        tracker.request_fetch().unwrap();
        assert_eq!(tracker.complete(7, 20, true), PaginationState::FullyPopulated);
        assert_eq!(tracker.request_fetch(), Ok(false));
        assert_eq!(tracker.state(), PaginationState::FullyPopulated);
    }

    #[test]
    fn test_has_more_false_terminates_full_page() {
        let mut tracker = PaginationTracker::new();
        tracker.request_fetch().unwrap();
        assert_eq!(tracker.complete(20, 20, false), PaginationState::FullyPopulated);
    }

    #[test]
    fn test_abort_and_reset() {
        let mut tracker = PaginationTracker::new();
        tracker.request_fetch().unwrap();
        tracker.abort();
        assert_eq!(tracker.state(), PaginationState::PartiallyPopulated);

        tracker.request_fetch().unwrap();
        tracker.complete(0, 10, false);
        tracker.abort();
        assert_eq!(tracker.state(), PaginationState::FullyPopulated);
        tracker.reset();
        assert_eq!(tracker.request_fetch(), Ok(true));
    }
}
