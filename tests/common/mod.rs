#![allow(dead_code)]
//! 测试辅助：可编程的内存注册后端

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use flare_discovery::schema::{self, InstanceKey, ServiceKey};
use flare_discovery::{
    Config, DiscoveryError, InstanceRecord, RegistryBackend, Result, ServiceDescriptor,
    ServiceType,
};

/// 内存注册后端，失败可以按脚本预排
#[derive(Default)]
pub struct MockRegistry {
    inner: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    /// 实例根路径 -> 记录
    records: BTreeMap<String, InstanceRecord>,
    versions: Vec<String>,
    operations: Vec<String>,
    register_errors: VecDeque<DiscoveryError>,
    refresh_errors: VecDeque<DiscoveryError>,
    query_errors: VecDeque<DiscoveryError>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn operations(&self) -> Vec<String> {
        self.inner.lock().await.operations.clone()
    }

    pub async fn contains(&self, key: &InstanceKey) -> bool {
        self.inner.lock().await.records.contains_key(&key.path())
    }

    pub async fn insert_record(&self, key: &InstanceKey, record: InstanceRecord) {
        self.inner.lock().await.records.insert(key.path(), record);
    }

    pub async fn remove_record(&self, key: &InstanceKey) {
        self.inner.lock().await.records.remove(&key.path());
    }

    pub async fn set_versions(&self, versions: &[&str]) {
        self.inner.lock().await.versions = versions.iter().map(|v| v.to_string()).collect();
    }

    pub async fn push_register_error(&self, err: DiscoveryError) {
        self.inner.lock().await.register_errors.push_back(err);
    }

    pub async fn push_refresh_error(&self, err: DiscoveryError) {
        self.inner.lock().await.refresh_errors.push_back(err);
    }

    pub async fn push_query_error(&self, err: DiscoveryError) {
        self.inner.lock().await.query_errors.push_back(err);
    }
}

#[async_trait]
impl RegistryBackend for MockRegistry {
    async fn register_instance(&self, key: &InstanceKey, _ttl: u64) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.operations.push(format!("register {}", key.path()));
        if let Some(err) = state.register_errors.pop_front() {
            return Err(err);
        }
        state
            .records
            .insert(key.path(), InstanceRecord::new(&key.instance_id));
        Ok(())
    }

    async fn write_field(&self, key: &InstanceKey, field: &str, value: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.operations.push(format!("field {}={}", field, value));
        match state.records.get_mut(&key.path()) {
            Some(record) => {
                record.set_field(field, value.to_string());
                Ok(())
            }
            None => Err(DiscoveryError::key_not_found(key.path())),
        }
    }

    async fn refresh_ttl(&self, key: &InstanceKey, _ttl: u64) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.operations.push(format!("refresh {}", key.path()));
        if let Some(err) = state.refresh_errors.pop_front() {
            return Err(err);
        }
        if state.records.contains_key(&key.path()) {
            Ok(())
        } else {
            Err(DiscoveryError::key_not_found(key.path()))
        }
    }

    async fn list_instances(
        &self,
        service: &ServiceKey,
        version: &str,
    ) -> Result<Vec<InstanceRecord>> {
        let mut state = self.inner.lock().await;
        let prefix = format!("{}/", schema::instances_path(service, version));
        state.operations.push(format!("list {}", prefix));
        if let Some(err) = state.query_errors.pop_front() {
            return Err(err);
        }
        Ok(state
            .records
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn delete_instance_tree(&self, key: &InstanceKey) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.operations.push(format!("delete {}", key.path()));
        state.records.remove(&key.path());
        Ok(())
    }

    async fn list_versions(&self, service: &ServiceKey) -> Result<Vec<String>> {
        let mut state = self.inner.lock().await;
        state.operations.push(format!("versions {}", service.path()));
        if let Some(err) = state.query_errors.pop_front() {
            return Err(err);
        }
        Ok(state.versions.clone())
    }
}

/// 测试配置：固定实例 ID，便于断言路径
pub fn test_config(singleton: bool) -> Config {
    toml::from_str(&format!(
        r#"
        [service]
        name = "signaling"
        environment = "test"
        base_url = "http://10.0.0.1:8080"
        singleton = {singleton}
        instance_id = "node-1"

        [registry]
        endpoints = ["http://127.0.0.1:2379"]
        ping_interval = 1
        start_retry_delay_ms = 500
        "#
    ))
    .expect("test config parses")
}

pub fn descriptor(singleton: bool) -> ServiceDescriptor {
    ServiceDescriptor::from_config(&test_config(singleton), ServiceType::Rest)
        .expect("test descriptor builds")
}
