//! Flare Service Discovery
//!
//! Lets a service instance publish itself into a shared registry (etcd or
//! Consul), keep the registration alive through periodic TTL renewal, and
//! lets peers resolve version expressions and round-robin across live
//! instances.

pub mod config;
pub mod discovery;
pub mod error;
pub mod registrator;
pub mod registry;
pub mod schema;
pub mod selector;
pub mod types;
pub mod version;

// Re-exports
pub use config::{Config, RegistryConfig, ServiceConfig, ServiceDescriptor};
pub use discovery::DiscoveryClient;
pub use error::{DiscoveryError, Result};
pub use registrator::Registrator;
pub use registry::{ConsulRegistry, EtcdRegistry, RegistryBackend, RegistryType, create_registry};
pub use schema::{InstanceKey, ServiceKey, last_segment};
pub use selector::RoundRobinSelector;
pub use types::{AccessType, InstanceRecord, STATUS_DISABLED, ServiceType};
pub use version::VersionExpression;
