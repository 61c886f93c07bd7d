//! 同步层配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// 已读游标合并写入的默认间隔（毫秒）
pub const DEFAULT_DEBOUNCE_INTERVAL_MS: u64 = 200;

/// 已读游标合并写入的默认间隔
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(DEFAULT_DEBOUNCE_INTERVAL_MS);

/// 默认分页大小
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// 同步层配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 合并写入间隔（毫秒），窗口从第一次 set 开始计算
    pub debounce_interval_ms: u64,
    /// fetch_more 未指定数量时使用的分页大小
    pub default_page_size: usize,
    /// 实时事件通道缓冲区大小
    pub feed_buffer: usize,
    /// 会话事件广播容量
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_interval_ms: DEFAULT_DEBOUNCE_INTERVAL_MS,
            default_page_size: DEFAULT_PAGE_SIZE,
            feed_buffer: 256,
            event_capacity: 100,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// 从 JSON 字符串解析配置，缺省字段使用默认值
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    /// 校验配置，任何为 0 的数值项都视为非法
    pub fn validate(&self) -> Result<()> {
        if self.debounce_interval_ms == 0 {
            return Err(SyncError::Config("debounce_interval_ms must be > 0".to_string()));
        }
        if self.default_page_size == 0 {
            return Err(SyncError::Config("default_page_size must be > 0".to_string()));
        }
        if self.feed_buffer == 0 {
            return Err(SyncError::Config("feed_buffer must be > 0".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::Config("event_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn debounce_interval(mut self, interval: Duration) -> Self {
        self.config.debounce_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn default_page_size(mut self, size: usize) -> Self {
        self.config.default_page_size = size;
        self
    }

    pub fn feed_buffer(mut self, size: usize) -> Self {
        self.config.feed_buffer = size;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
