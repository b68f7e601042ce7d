//! 注册后端能力集定义

use async_trait::async_trait;

use crate::error::Result;
use crate::schema::{InstanceKey, ServiceKey};
use crate::types::InstanceRecord;

/// 注册后端能力集
///
/// 所有注册后端（etcd、Consul）都实现这个 trait，注册器与发现端只
/// 通过这组能力访问后端。每个调用都是一次带超时上限的网络往返。
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// 写入实例节点并附带 TTL
    async fn register_instance(&self, key: &InstanceKey, ttl: u64) -> Result<()>;

    /// 写入实例节点下的一个标量字段
    async fn write_field(&self, key: &InstanceKey, field: &str, value: &str) -> Result<()>;

    /// 续期实例节点的 TTL，要求节点已存在
    ///
    /// 节点已过期时返回 [`DiscoveryError::KeyNotFound`]，注册器据此
    /// 在同一次心跳内重新注册。
    ///
    /// [`DiscoveryError::KeyNotFound`]: crate::error::DiscoveryError::KeyNotFound
    async fn refresh_ttl(&self, key: &InstanceKey, ttl: u64) -> Result<()>;

    /// 列出某服务某版本下的全部实例
    ///
    /// 无实例是合法的空结果，不是错误。
    async fn list_instances(&self, service: &ServiceKey, version: &str)
        -> Result<Vec<InstanceRecord>>;

    /// 删除实例子树（显式注销），对已不存在的键幂等
    async fn delete_instance_tree(&self, key: &InstanceKey) -> Result<()>;

    /// 列出某服务已发布的全部版本
    async fn list_versions(&self, service: &ServiceKey) -> Result<Vec<String>>;
}
