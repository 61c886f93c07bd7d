//! SDK 版本信息

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 包名，用于日志标识
pub const SDK_NAME: &str = env!("CARGO_PKG_NAME");

/// 形如 `chatsync-sdk/0.1.0` 的标识字符串
pub fn user_agent() -> String {
    format!("{}/{}", SDK_NAME, SDK_VERSION)
}
