//! Consul 注册后端实现
//!
//! 实例的存活由 agent 的 TTL 健康检查承载，标量字段写入服务注册的
//! `Meta` 映射（agent 注册是 upsert），`url` 字段同时填充目录地址。
//! 目录里的服务名为 `{environment}-{name}`，版本以 `version=` 标签
//! 区分。实例转入 critical 后经 `deregister_critical_after` 被清除，
//! 等价于 etcd 下 lease 过期后节点消失。

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::trait_def::RegistryBackend;
use crate::config::{self, RegistryConfig};
use crate::error::{DiscoveryError, Result};
use crate::schema::{InstanceKey, ServiceKey, fields};
use crate::types::{InstanceRecord, STATUS_DISABLED};

const VERSION_TAG_PREFIX: &str = "version=";

/// Consul 注册后端
pub struct ConsulRegistry {
    client: reqwest::Client,
    base_url: String,
    deregister_critical_after: u64,
    /// 实例根路径 -> 当前注册载荷，write_field 在其上合并后重新上报
    registrations: Mutex<HashMap<String, AgentService>>,
}

#[allow(non_snake_case)]
#[derive(Debug, Clone, Serialize)]
struct AgentService {
    ID: String,
    Name: String,
    Tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    Address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    Port: Option<u16>,
    Meta: HashMap<String, String>,
    Check: AgentCheck,
}

#[allow(non_snake_case)]
#[derive(Debug, Clone, Serialize)]
struct AgentCheck {
    TTL: String,
    DeregisterCriticalServiceAfter: String,
}

#[allow(non_snake_case)]
#[derive(Debug, Deserialize)]
struct HealthEntry {
    Service: HealthService,
    #[serde(default)]
    Checks: Vec<HealthCheck>,
}

#[allow(non_snake_case)]
#[derive(Debug, Deserialize)]
struct HealthService {
    ID: String,
    #[serde(default)]
    Tags: Vec<String>,
    #[serde(default)]
    Meta: HashMap<String, String>,
}

#[allow(non_snake_case)]
#[derive(Debug, Deserialize)]
struct HealthCheck {
    Status: String,
}

impl ConsulRegistry {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let base_url = config
            .endpoints
            .first()
            .ok_or_else(|| DiscoveryError::config("no Consul endpoint configured"))?
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| DiscoveryError::config(format!("cannot build Consul client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            deregister_critical_after: config.deregister_critical_after,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// 目录里的服务名
    fn catalog_name(service: &ServiceKey) -> String {
        format!("{}-{}", service.environment, service.name)
    }

    async fn send(&self, operation: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                DiscoveryError::timeout(format!("{}: {}", operation, err))
            } else {
                DiscoveryError::backend(format!("{}: {}", operation, err))
            }
        })?;
        classify(operation, response).await
    }

    async fn put_registration(&self, payload: &AgentService) -> Result<()> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        self.send("register", self.client.put(&url).json(payload))
            .await?;
        Ok(())
    }

    async fn health_entries(&self, operation: &str, service: &ServiceKey) -> Result<Vec<HealthEntry>> {
        let url = format!(
            "{}/v1/health/service/{}",
            self.base_url,
            Self::catalog_name(service)
        );
        let response = self.send(operation, self.client.get(&url)).await?;
        response
            .json()
            .await
            .map_err(|e| DiscoveryError::backend(format!("{}: {}", operation, e)))
    }
}

#[async_trait]
impl RegistryBackend for ConsulRegistry {
    async fn register_instance(&self, key: &InstanceKey, ttl: u64) -> Result<()> {
        let payload = AgentService {
            ID: key.instance_id.clone(),
            Name: Self::catalog_name(&key.service),
            Tags: vec![format!("{}{}", VERSION_TAG_PREFIX, key.version)],
            Address: None,
            Port: None,
            Meta: HashMap::new(),
            Check: AgentCheck {
                TTL: format!("{}s", ttl),
                DeregisterCriticalServiceAfter: format!("{}s", self.deregister_critical_after),
            },
        };
        self.put_registration(&payload).await?;
        self.registrations.lock().await.insert(key.path(), payload);
        debug!(instance = %key, "Instance registered with Consul");
        Ok(())
    }

    async fn write_field(&self, key: &InstanceKey, field: &str, value: &str) -> Result<()> {
        let payload = {
            let mut registrations = self.registrations.lock().await;
            let payload = registrations
                .get_mut(&key.path())
                .ok_or_else(|| DiscoveryError::key_not_found(key.path()))?;
            payload.Meta.insert(field.to_string(), value.to_string());
            if field == fields::URL {
                if let Ok((_, host, port)) = config::split_base_url(value) {
                    payload.Address = Some(host);
                    payload.Port = Some(port);
                }
            }
            payload.clone()
        };
        self.put_registration(&payload).await
    }

    async fn refresh_ttl(&self, key: &InstanceKey, _ttl: u64) -> Result<()> {
        let url = format!(
            "{}/v1/agent/check/pass/service:{}",
            self.base_url, key.instance_id
        );
        match self.send("refresh", self.client.put(&url)).await {
            Ok(_) => Ok(()),
            Err(DiscoveryError::KeyNotFound(_)) => {
                Err(DiscoveryError::key_not_found(key.path()))
            }
            Err(err) => Err(err),
        }
    }

    async fn list_instances(
        &self,
        service: &ServiceKey,
        version: &str,
    ) -> Result<Vec<InstanceRecord>> {
        let entries = self.health_entries("list instances", service).await?;
        let version_tag = format!("{}{}", VERSION_TAG_PREFIX, version);
        let mut records = Vec::new();
        for entry in entries {
            if !entry.Service.Tags.iter().any(|tag| tag == &version_tag) {
                continue;
            }
            let mut record = InstanceRecord::new(&entry.Service.ID);
            for (field, value) in &entry.Service.Meta {
                record.set_field(field, value.clone());
            }
            // TTL 过期（critical）的实例等同于被停用
            if record.status.is_none()
                && entry.Checks.iter().any(|check| check.Status == "critical")
            {
                record.status = Some(STATUS_DISABLED.to_string());
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn delete_instance_tree(&self, key: &InstanceKey) -> Result<()> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            self.base_url, key.instance_id
        );
        let outcome = self.send("deregister", self.client.put(&url)).await;
        match outcome {
            Ok(_) | Err(DiscoveryError::KeyNotFound(_)) => {
                self.registrations.lock().await.remove(&key.path());
                debug!(instance = %key, "Instance deregistered from Consul");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn list_versions(&self, service: &ServiceKey) -> Result<Vec<String>> {
        let entries = self.health_entries("list versions", service).await?;
        let mut versions = BTreeSet::new();
        for entry in entries {
            for tag in &entry.Service.Tags {
                if let Some(version) = tag.strip_prefix(VERSION_TAG_PREFIX) {
                    versions.insert(version.to_string());
                }
            }
        }
        Ok(versions.into_iter().collect())
    }
}

/// 按响应状态码映射到统一错误分类
async fn classify(operation: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => DiscoveryError::key_not_found(operation),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DiscoveryError::auth(format!("{}: {} {}", operation, status, detail))
        }
        _ => DiscoveryError::backend(format!("{}: {} {}", operation, status, detail)),
    })
}
