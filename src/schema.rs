//! 注册表键结构
//!
//! 纯路径推导，无状态。同一 (name, environment, version, instance_id)
//! 元组总是推导出同一路径，不同元组的实例键互不冲突（标识字段在
//! 描述符构造时已拒绝包含 `/`）。

use std::fmt;

/// 实例节点下的标量字段名
pub mod fields {
    pub const TYPE: &str = "type";
    pub const URL: &str = "url";
    pub const CONTAINER_URL: &str = "containerUrl";
    pub const CLUSTER_ID: &str = "clusterId";
    pub const STATUS: &str = "status";
}

/// 服务 + 环境命名空间键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub environment: String,
    pub name: String,
}

impl ServiceKey {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            name: name.into(),
        }
    }

    /// 服务命名空间路径
    pub fn path(&self) -> String {
        format!("environments/{}/services/{}", self.environment, self.name)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// 单个实例子树的键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub service: ServiceKey,
    pub version: String,
    pub instance_id: String,
}

impl InstanceKey {
    pub fn new(
        service: ServiceKey,
        version: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            service,
            version: version.into(),
            instance_id: instance_id.into(),
        }
    }

    /// 实例子树根路径
    pub fn path(&self) -> String {
        format!(
            "{}/{}",
            instances_path(&self.service, &self.version),
            self.instance_id
        )
    }

    /// 实例子树内某个标量字段的路径
    pub fn field_path(&self, field: &str) -> String {
        format!("{}/{}", self.path(), field)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// 某服务某版本的实例列表路径
pub fn instances_path(service: &ServiceKey, version: &str) -> String {
    format!("{}/{}/instances", service.path(), version)
}

/// 提取路径的最后一段，用于识别后端返回的子节点代表哪个字段
pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
