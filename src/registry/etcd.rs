//! etcd 注册后端实现
//!
//! 实例节点的 TTL 通过 lease 承载：注册时授予 lease 并把实例根键和
//! 字段键都挂在同一 lease 上，续期是一次 keep-alive 往返，lease 过期
//! 后整个实例子树被 etcd 自动清除。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, DeleteOptions, GetOptions, PutOptions};
use tokio::sync::Mutex;
use tracing::debug;

use super::trait_def::RegistryBackend;
use crate::config::RegistryConfig;
use crate::error::{DiscoveryError, Result};
use crate::schema::{self, InstanceKey, ServiceKey};
use crate::types::InstanceRecord;

/// etcd 注册后端
pub struct EtcdRegistry {
    client: Client,
    /// 实例根路径 -> lease id
    leases: Mutex<HashMap<String, i64>>,
    timeout: Duration,
}

impl EtcdRegistry {
    /// 连接 etcd
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(DiscoveryError::config("no etcd endpoint configured"));
        }
        let timeout = Duration::from_secs(config.request_timeout);
        let connect = Client::connect(&config.endpoints, None);
        let client = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(client)) => client,
            Ok(Err(err)) => return Err(map_error("connect", err)),
            Err(_) => {
                return Err(DiscoveryError::timeout(format!(
                    "connect: no response within {:?}",
                    timeout
                )));
            }
        };
        Ok(Self {
            client,
            leases: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    /// 给每次后端往返加上超时上限
    async fn bounded<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, etcd_client::Error>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(map_error(operation, err)),
            Err(_) => Err(DiscoveryError::timeout(format!(
                "{}: no response within {:?}",
                operation, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl RegistryBackend for EtcdRegistry {
    async fn register_instance(&self, key: &InstanceKey, ttl: u64) -> Result<()> {
        let path = key.path();
        let mut client = self.client.clone();
        let lease = self
            .bounded("lease grant", client.lease_grant(ttl as i64, None))
            .await?;
        let lease_id = lease.id();
        let options = PutOptions::new().with_lease(lease_id);
        self.bounded(
            "register",
            client.put(path.as_str(), key.instance_id.as_str(), Some(options)),
        )
        .await?;
        self.leases.lock().await.insert(path, lease_id);
        Ok(())
    }

    async fn write_field(&self, key: &InstanceKey, field: &str, value: &str) -> Result<()> {
        let lease_id = self
            .leases
            .lock()
            .await
            .get(&key.path())
            .copied()
            .ok_or_else(|| DiscoveryError::key_not_found(key.path()))?;
        let path = key.field_path(field);
        let mut client = self.client.clone();
        let options = PutOptions::new().with_lease(lease_id);
        self.bounded("write field", client.put(path.as_str(), value, Some(options)))
            .await?;
        Ok(())
    }

    async fn refresh_ttl(&self, key: &InstanceKey, _ttl: u64) -> Result<()> {
        let path = key.path();
        let lease_id = self
            .leases
            .lock()
            .await
            .get(&path)
            .copied()
            .ok_or_else(|| DiscoveryError::key_not_found(path.clone()))?;
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = self
            .bounded("refresh", client.lease_keep_alive(lease_id))
            .await?;
        self.bounded("refresh", keeper.keep_alive()).await?;
        let response = self.bounded("refresh", stream.message()).await?;
        match response {
            // TTL 为 0 表示 lease 已在服务端过期
            Some(resp) if resp.ttl() > 0 => Ok(()),
            _ => {
                self.leases.lock().await.remove(&path);
                Err(DiscoveryError::key_not_found(path))
            }
        }
    }

    async fn list_instances(
        &self,
        service: &ServiceKey,
        version: &str,
    ) -> Result<Vec<InstanceRecord>> {
        let prefix = format!("{}/", schema::instances_path(service, version));
        let mut client = self.client.clone();
        let options = GetOptions::new().with_prefix();
        let response = self
            .bounded("list instances", client.get(prefix.as_str(), Some(options)))
            .await?;

        let mut records: BTreeMap<String, InstanceRecord> = BTreeMap::new();
        for kv in response.kvs() {
            let Ok(key) = kv.key_str() else { continue };
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let mut segments = rest.splitn(2, '/');
            let Some(instance_id) = segments.next().filter(|s| !s.is_empty()) else {
                continue;
            };
            let record = records
                .entry(instance_id.to_string())
                .or_insert_with(|| InstanceRecord::new(instance_id));
            if let Some(field) = segments.next() {
                if let Ok(value) = kv.value_str() {
                    record.set_field(schema::last_segment(field), value.to_string());
                }
            }
        }
        Ok(records.into_values().collect())
    }

    async fn delete_instance_tree(&self, key: &InstanceKey) -> Result<()> {
        let path = key.path();
        let mut client = self.client.clone();
        // 实例根键与字段子键分开删，避免波及共享前缀的相邻实例
        self.bounded("deregister", client.delete(path.as_str(), None))
            .await?;
        let options = DeleteOptions::new().with_prefix();
        self.bounded(
            "deregister",
            client.delete(format!("{}/", path), Some(options)),
        )
        .await?;
        let lease = self.leases.lock().await.remove(&path);
        if let Some(lease_id) = lease {
            if let Err(err) = self.bounded("lease revoke", client.lease_revoke(lease_id)).await {
                debug!(instance = %path, error = %err, "Lease revoke after deregister failed");
            }
        }
        Ok(())
    }

    async fn list_versions(&self, service: &ServiceKey) -> Result<Vec<String>> {
        let prefix = format!("{}/", service.path());
        let mut client = self.client.clone();
        let options = GetOptions::new().with_prefix().with_keys_only();
        let response = self
            .bounded("list versions", client.get(prefix.as_str(), Some(options)))
            .await?;

        let mut versions = BTreeSet::new();
        for kv in response.kvs() {
            let Ok(key) = kv.key_str() else { continue };
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some(version) = rest.split('/').next().filter(|s| !s.is_empty()) {
                    versions.insert(version.to_string());
                }
            }
        }
        Ok(versions.into_iter().collect())
    }
}

/// 把 etcd 客户端错误映射到统一错误分类
fn map_error(operation: &str, err: etcd_client::Error) -> DiscoveryError {
    match err {
        etcd_client::Error::GRpcStatus(status) => match status.code() {
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
                DiscoveryError::timeout(format!("{}: {}", operation, status))
            }
            tonic::Code::Unauthenticated | tonic::Code::PermissionDenied => {
                DiscoveryError::auth(format!("{}: {}", operation, status))
            }
            tonic::Code::NotFound => DiscoveryError::key_not_found(operation),
            _ => DiscoveryError::backend(format!("{}: {}", operation, status)),
        },
        etcd_client::Error::IoError(err) => {
            DiscoveryError::timeout(format!("{}: {}", operation, err))
        }
        etcd_client::Error::TransportError(err) => {
            DiscoveryError::timeout(format!("{}: {}", operation, err))
        }
        other => DiscoveryError::backend(format!("{}: {}", operation, other)),
    }
}
