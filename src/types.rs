//! 基础类型定义

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::schema::fields;

/// `status` 字段标记实例停用的取值
pub const STATUS_DISABLED: &str = "disabled";

/// 服务类型
///
/// 由调用方随描述符给出，替代原运行时按注解探测的做法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceType {
    Rest,
    Grpc,
    GraphQl,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Rest => "REST",
            ServiceType::Grpc => "GRPC",
            ServiceType::GraphQl => "GRAPHQL",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REST" => Ok(ServiceType::Rest),
            "GRPC" => Ok(ServiceType::Grpc),
            "GRAPHQL" => Ok(ServiceType::GraphQl),
            _ => Err(format!("Unknown service type: {}", s)),
        }
    }
}

/// 访问方式
///
/// `Gateway` 优先使用 containerUrl，缺失时回退到 url
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Direct,
    Gateway,
}

/// 注册表中一个实例节点的解码视图
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub service_type: Option<String>,
    pub url: Option<String>,
    pub container_url: Option<String>,
    pub cluster_id: Option<String>,
    pub status: Option<String>,
}

impl InstanceRecord {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    /// 按字段名写入一个标量字段，未知字段忽略
    pub fn set_field(&mut self, field: &str, value: String) {
        match field {
            fields::TYPE => self.service_type = Some(value),
            fields::URL => self.url = Some(value),
            fields::CONTAINER_URL => self.container_url = Some(value),
            fields::CLUSTER_ID => self.cluster_id = Some(value),
            fields::STATUS => self.status = Some(value),
            _ => {}
        }
    }

    /// 活跃实例：有可读 url 且未被标记停用
    pub fn is_active(&self) -> bool {
        self.url.is_some() && self.status.as_deref() != Some(STATUS_DISABLED)
    }

    /// 按访问方式取访问地址
    pub fn access_url(&self, access: AccessType) -> Option<&str> {
        match access {
            AccessType::Direct => self.url.as_deref(),
            AccessType::Gateway => self.container_url.as_deref().or(self.url.as_deref()),
        }
    }
}
