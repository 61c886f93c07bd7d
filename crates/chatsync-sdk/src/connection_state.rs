//! 连接状态
//!
//! 实时通道的健康状态与分页状态组合成集合的双状态：
//! - `real_time`：实时事件是否新鲜
//! - `paged`：历史数据是否拉取完整
//!
//! 两者相互独立，连接降级不影响分页。

use serde::{Deserialize, Serialize};

use crate::collection::PaginationState;

/// 实时通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// 已连接，实时事件正常到达
    Connected,
    /// 降级：订阅未建立或通道中断，本地数据可能过期
    Degraded,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded => write!(f, "degraded"),
        }
    }
}

/// 集合的组合状态（轮询读取）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionState {
    pub real_time: ConnectionState,
    pub paged: PaginationState,
}

impl CollectionState {
    pub fn new() -> Self {
        Self {
            real_time: ConnectionState::Degraded,
            paged: PaginationState::PartiallyPopulated,
        }
    }

    /// 实时通道正常且历史已完整
    pub fn is_fully_synced(&self) -> bool {
        self.real_time == ConnectionState::Connected
            && self.paged == PaginationState::FullyPopulated
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        format!("real_time={}, paged={}", self.real_time, self.paged)
    }
}

impl Default for CollectionState {
    fn default() -> Self {
        Self::new()
    }
}
