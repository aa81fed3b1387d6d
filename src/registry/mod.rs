//! 注册中心客户端模块
//!
//! 调和循环只依赖 `RegistryClient` trait；支持 Consul 和进程内注册中心两种后端

pub mod consul;
pub mod memory;

use crate::config::{RegistryConfig, RegistryType};
use crate::error::{AllocatorError, Result};
use crate::types::RegistryInstance;
use async_trait::async_trait;
use std::sync::Arc;

pub use consul::ConsulRegistry;
pub use memory::InMemoryRegistry;

/// 注册中心客户端 trait
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// 注册实例，`address` 为 host:port
    async fn register(&self, name: &str, id: &str, address: &str) -> Result<()>;

    /// 注销实例
    async fn deregister(&self, id: &str) -> Result<()>;

    /// 查询服务当前通过健康检查的实例
    async fn healthy_instances(&self, name: &str) -> Result<Vec<RegistryInstance>>;
}

/// 注册中心客户端（类型别名）
pub type SharedRegistry = Arc<dyn RegistryClient>;

/// 按配置创建注册中心客户端
pub fn create_registry(config: &RegistryConfig) -> Result<SharedRegistry> {
    match config.registry_type {
        RegistryType::Consul => Ok(Arc::new(ConsulRegistry::from_config(config)?)),
        RegistryType::Memory => Ok(Arc::new(InMemoryRegistry::new())),
    }
}

/// 拆分 host:port
pub(crate) fn split_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        AllocatorError::invalid_parameter(format!(
            "address {} must be host:port",
            address
        ))
    })?;
    let port = port.parse::<u16>().map_err(|_| {
        AllocatorError::invalid_parameter(format!(
            "address {} has an invalid port",
            address
        ))
    })?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(AllocatorError::invalid_parameter(format!(
            "address {} has an empty host",
            address
        )));
    }
    Ok((host.to_string(), port))
}

/// 拼接 host:port（IPv6 加方括号）
pub(crate) fn join_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
