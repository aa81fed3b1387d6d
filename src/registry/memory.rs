//! 进程内注册中心
//!
//! 单机部署和测试使用：实例保存在内存里，可以单独切换实例的健康状态，
//! 也可以模拟整个注册中心不可用。

use super::{RegistryClient, split_address};
use crate::error::{AllocatorError, Result};
use crate::types::RegistryInstance;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

#[derive(Debug, Clone)]
struct Registration {
    name: String,
    address: String,
    passing: bool,
}

/// 进程内注册中心
#[derive(Debug)]
pub struct InMemoryRegistry {
    // 按 ID 排序，查询结果顺序稳定
    instances: RwLock<BTreeMap<String, Registration>>,
    available: AtomicBool,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// 设置实例是否通过健康检查，实例不存在时返回 `NotRegistered`
    pub fn set_passing(&self, id: &str, passing: bool) -> Result<()> {
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let registration = instances
            .get_mut(id)
            .ok_or_else(|| AllocatorError::not_registered(id))?;
        registration.passing = passing;
        Ok(())
    }

    /// 模拟注册中心故障：不可用时所有调用返回 `RegistryUnavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(AllocatorError::registry_unavailable(
                "in-memory registry is switched off",
            ))
        }
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn register(&self, name: &str, id: &str, address: &str) -> Result<()> {
        self.ensure_available()?;
        split_address(address)?;

        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = instances.get(id) {
            if existing.name != name || existing.address != address {
                return Err(AllocatorError::already_registered(id));
            }
        }
        instances.insert(
            id.to_string(),
            Registration {
                name: name.to_string(),
                address: address.to_string(),
                passing: true,
            },
        );
        info!(service = %name, id = %id, address = %address, "Service registered in memory");
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<()> {
        self.ensure_available()?;
        let removed = self
            .instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
        match removed {
            Some(registration) => {
                info!(service = %registration.name, id = %id, "Service deregistered from memory");
                Ok(())
            }
            None => Err(AllocatorError::not_registered(id)),
        }
    }

    async fn healthy_instances(&self, name: &str) -> Result<Vec<RegistryInstance>> {
        self.ensure_available()?;
        let instances = self
            .instances
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(instances
            .iter()
            .filter(|(_, r)| r.name == name && r.passing)
            .map(|(id, r)| RegistryInstance::new(id.clone(), r.address.clone()))
            .collect())
    }
}
