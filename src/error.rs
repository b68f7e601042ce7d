//! 统一错误类型
//!
//! 错误分类决定注册器的处理方式：瞬时不可用按弹性策略重试或终止调度，
//! 认证失败与其他后端错误只记录日志，键不存在触发重新注册。

use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// 服务发现统一错误类型
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    /// 瞬时不可用：超时或连接失败，下一次调度重试
    #[error("registry timeout: {0}")]
    Timeout(String),

    /// 致命不可用：弹性模式关闭时由瞬时失败升级而来，终止调度
    #[error("registry not available: {0}")]
    RegistryUnavailable(String),

    /// 键不存在：续期时表示实例节点已过期
    #[error("registry key not found: {0}")]
    KeyNotFound(String),

    /// 认证或授权失败
    #[error("registry authentication failed: {0}")]
    Auth(String),

    /// 其他后端错误
    #[error("registry backend error: {0}")]
    Backend(String),

    /// 配置错误
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DiscoveryError {
    /// 创建瞬时不可用错误
    pub fn timeout(reason: impl Into<String>) -> Self {
        DiscoveryError::Timeout(reason.into())
    }

    /// 创建键不存在错误
    pub fn key_not_found(key: impl Into<String>) -> Self {
        DiscoveryError::KeyNotFound(key.into())
    }

    /// 创建认证失败错误
    pub fn auth(reason: impl Into<String>) -> Self {
        DiscoveryError::Auth(reason.into())
    }

    /// 创建后端错误
    pub fn backend(reason: impl Into<String>) -> Self {
        DiscoveryError::Backend(reason.into())
    }

    /// 创建配置错误
    pub fn config(reason: impl Into<String>) -> Self {
        DiscoveryError::Config(reason.into())
    }

    /// 是否为瞬时失败（下一次调度可重试）
    pub fn is_transient(&self) -> bool {
        matches!(self, DiscoveryError::Timeout(_))
    }

    /// 是否为终止调度的致命失败
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiscoveryError::RegistryUnavailable(_))
    }
}
