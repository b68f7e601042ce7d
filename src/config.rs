//! 配置加载与服务描述符

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};
use crate::schema::{InstanceKey, ServiceKey};
use crate::types::ServiceType;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub base_url: String,
    pub container_url: Option<String>,
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub singleton: bool,
    /// 默认为 `{name}-{uuid}`，仅测试或固定部署需要覆盖
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_type")]
    pub registry_type: String, // etcd, consul
    pub endpoints: Vec<String>,
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// 单次后端调用的超时上限（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// 弹性模式：瞬时不可用只告警重试，而非终止调度
    #[serde(default = "default_resilience")]
    pub resilience: bool,
    #[serde(default = "default_start_retry_delay_ms")]
    pub start_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Consul：实例转入 critical 后多久被清除（秒）
    #[serde(default = "default_deregister_critical_after")]
    pub deregister_critical_after: u64,
}

fn default_registry_type() -> String {
    "etcd".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_ttl() -> u64 {
    30
}

fn default_ping_interval() -> u64 {
    20
}

fn default_request_timeout() -> u64 {
    10
}

fn default_resilience() -> bool {
    true
}

fn default_start_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    900_000
}

fn default_deregister_critical_after() -> u64 {
    60
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_type: default_registry_type(),
            endpoints: Vec::new(),
            ttl: default_ttl(),
            ping_interval: default_ping_interval(),
            request_timeout: default_request_timeout(),
            resilience: default_resilience(),
            start_retry_delay_ms: default_start_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            deregister_critical_after: default_deregister_critical_after(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DiscoveryError::config(format!("cannot read {}: {}", path, e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| DiscoveryError::config(format!("cannot parse {}: {}", path, e)))?;
        Ok(config)
    }
}

/// 不可变服务描述符
///
/// 注册时从合并后的配置构造一次，进程内最多注册一个服务。
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub environment: String,
    pub version: String,
    pub instance_id: String,
    pub service_type: ServiceType,
    pub protocol: String,
    pub address: String,
    pub port: u16,
    pub base_url: String,
    pub container_url: Option<String>,
    pub cluster_id: Option<String>,
    pub ttl: u64,
    pub ping_interval: u64,
    pub singleton: bool,
    pub start_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub deregister_critical_after: u64,
}

impl ServiceDescriptor {
    pub fn from_config(config: &Config, service_type: ServiceType) -> Result<Self> {
        let service = &config.service;
        let registry = &config.registry;

        let (protocol, address, port) = split_base_url(&service.base_url)?;
        let instance_id = match &service.instance_id {
            Some(id) => id.clone(),
            None => format!("{}-{}", service.name, uuid::Uuid::new_v4()),
        };

        for (label, value) in [
            ("service name", service.name.as_str()),
            ("environment", service.environment.as_str()),
            ("version", service.version.as_str()),
            ("instance id", instance_id.as_str()),
        ] {
            if value.is_empty() {
                return Err(DiscoveryError::config(format!("{} must not be empty", label)));
            }
            if value.contains('/') {
                return Err(DiscoveryError::config(format!(
                    "{} must not contain '/': {}",
                    label, value
                )));
            }
        }

        Ok(Self {
            name: service.name.clone(),
            environment: service.environment.clone(),
            version: service.version.clone(),
            instance_id,
            service_type,
            protocol,
            address,
            port,
            base_url: service.base_url.clone(),
            container_url: service.container_url.clone(),
            cluster_id: service.cluster_id.clone(),
            ttl: registry.ttl,
            ping_interval: registry.ping_interval,
            singleton: service.singleton,
            start_retry_delay_ms: registry.start_retry_delay_ms,
            max_retry_delay_ms: registry.max_retry_delay_ms,
            deregister_critical_after: registry.deregister_critical_after,
        })
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(&self.name, &self.environment)
    }

    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey::new(self.service_key(), &self.version, &self.instance_id)
    }
}

/// 把基地址拆成 (protocol, host, port)
pub(crate) fn split_base_url(base_url: &str) -> Result<(String, String, u16)> {
    let (protocol, rest) = base_url
        .split_once("://")
        .ok_or_else(|| DiscoveryError::config(format!("invalid base url: {}", base_url)))?;
    let authority = rest.split(['/', '?']).next().unwrap_or(rest);

    let (host, port_text) = if let Some(bracketed) = authority.strip_prefix('[') {
        // IPv6 字面量
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| DiscoveryError::config(format!("invalid base url: {}", base_url)))?;
        (host.to_string(), tail.strip_prefix(':').map(str::to_string))
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), Some(port.to_string())),
            None => (authority.to_string(), None),
        }
    };

    if host.is_empty() {
        return Err(DiscoveryError::config(format!("invalid base url: {}", base_url)));
    }

    let port = match port_text {
        Some(text) => text
            .parse::<u16>()
            .map_err(|_| DiscoveryError::config(format!("invalid port in base url: {}", base_url)))?,
        None if protocol.eq_ignore_ascii_case("https") => 443,
        None => 80,
    };

    Ok((protocol.to_string(), host, port))
}
