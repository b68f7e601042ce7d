//! 注册后端模块
//!
//! 支持 etcd 与 Consul 两种注册后端

pub mod consul;
pub mod etcd;
pub mod trait_def;

use std::sync::Arc;

pub use consul::ConsulRegistry;
pub use etcd::EtcdRegistry;
pub use trait_def::RegistryBackend;

use crate::config::Config;
use crate::error::Result;

/// 注册后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryType {
    Etcd,
    Consul,
}

impl RegistryType {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "consul" => RegistryType::Consul,
            _ => RegistryType::Etcd,
        }
    }
}

/// 根据配置创建注册后端实例
pub async fn create_registry(config: &Config) -> Result<Arc<dyn RegistryBackend>> {
    match RegistryType::from_str(&config.registry.registry_type) {
        RegistryType::Etcd => {
            let registry = EtcdRegistry::connect(&config.registry).await?;
            Ok(Arc::new(registry))
        }
        RegistryType::Consul => {
            let registry = ConsulRegistry::new(&config.registry)?;
            Ok(Arc::new(registry))
        }
    }
}
