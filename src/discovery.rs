//! 发现端：版本解析、实例查询与轮询选择的组合

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::RegistryBackend;
use crate::schema::ServiceKey;
use crate::selector::RoundRobinSelector;
use crate::types::{AccessType, InstanceRecord};
use crate::version::VersionExpression;

/// 服务发现客户端
///
/// 默认所有服务共享同一个轮询游标；需要独立游标时用
/// [`DiscoveryClient::with_selector`] 注入。
pub struct DiscoveryClient {
    backend: Arc<dyn RegistryBackend>,
    selector: RoundRobinSelector,
}

impl DiscoveryClient {
    pub fn new(backend: Arc<dyn RegistryBackend>) -> Self {
        Self::with_selector(backend, RoundRobinSelector::new())
    }

    pub fn with_selector(backend: Arc<dyn RegistryBackend>, selector: RoundRobinSelector) -> Self {
        Self { backend, selector }
    }

    /// 解析版本表达式
    ///
    /// 精确版本与无法解析的表达式原样返回，不触发后端查询；范围
    /// 表达式对已发布版本求解。版本查询失败按空集处理（放开失败），
    /// 调用方随后在该版本下查不到实例即可。
    pub async fn resolve_version(&self, service: &ServiceKey, expression: &str) -> String {
        let parsed = VersionExpression::parse(expression);
        if !parsed.needs_lookup() {
            return parsed.resolve(&[]);
        }
        let published = match self.backend.list_versions(service).await {
            Ok(versions) => versions,
            Err(err) => {
                warn!(
                    service = %service,
                    error = %err,
                    "Version query failed, falling back to the requested expression"
                );
                Vec::new()
            }
        };
        let resolved = parsed.resolve(&published);
        debug!(service = %service, expression = %expression, resolved = %resolved, "Version resolved");
        resolved
    }

    /// 某服务已发布的全部版本
    pub async fn get_versions(&self, service: &ServiceKey) -> Result<Vec<String>> {
        self.backend.list_versions(service).await
    }

    /// 某服务某版本下的活跃实例
    pub async fn get_instances(
        &self,
        service: &ServiceKey,
        version: &str,
    ) -> Result<Vec<InstanceRecord>> {
        let instances = self.backend.list_instances(service, version).await?;
        Ok(instances
            .into_iter()
            .filter(|record| record.is_active())
            .collect())
    }

    /// 解析版本、列出活跃实例并轮询选出一个访问地址
    ///
    /// 没有可用实例时返回 `None`。
    pub async fn discover_url(
        &self,
        service: &ServiceKey,
        version_expression: &str,
        access: AccessType,
    ) -> Result<Option<String>> {
        let version = self.resolve_version(service, version_expression).await;
        let instances = self.get_instances(service, &version).await?;
        let urls: Vec<String> = instances
            .iter()
            .filter_map(|record| record.access_url(access).map(str::to_string))
            .collect();
        Ok(self.selector.pick(&urls).cloned())
    }
}
