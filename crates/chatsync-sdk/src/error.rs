use thiserror::Error;

/// 同步层错误
///
/// 需要 `Clone`：合并写入时同一个结果要分发给所有排队的回调。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// 已有分页请求在进行中
    #[error("Fetch already in progress")]
    AlreadyFetching,
    /// 历史数据已全部拉取
    #[error("Nothing to fetch: collection is fully populated")]
    NothingToFetch,
    /// 传输层错误（原样透传，不做重试）
    #[error("Transport error: {0}")]
    TransportFailure(String),
    /// 实时事件缺少必要字段
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
    /// 作用域已关闭
    #[error("Scope closed: {0}")]
    ScopeClosed(String),
    /// 所属会话已释放
    #[error("Session gone")]
    SessionGone,
    /// 正在关闭
    #[error("Shutting down")]
    ShuttingDown,
    /// 当前线程没有可用的 tokio 运行时
    #[error("No tokio runtime available")]
    NoRuntime,
    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl SyncError {
    /// 是否是调用方可以直接忽略的状态类错误（无需提示用户）
    pub fn is_pagination_state(&self) -> bool {
        matches!(self, SyncError::AlreadyFetching | SyncError::NothingToFetch)
    }

    /// 是否来自传输层
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::TransportFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
