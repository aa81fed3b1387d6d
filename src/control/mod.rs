//! 运维控制接口
//!
//! 三类修改：全量替换成员、调整分组、调整块长度。
//! 一个请求可以涉及多个服务：所有服务在同一临界区内校验并发布，
//! 任何一个服务校验失败，整个请求不修改任何状态。

use crate::error::{AllocatorError, Result};
use crate::metrics::AllocatorMetrics;
use crate::store::{ConfigStore, MemberSpec, ServiceConfig};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

/// 块长度修改范围
#[derive(Debug, Clone, PartialEq)]
pub enum BlockLengthScope {
    /// 全局：更新默认值并应用到所有服务
    All(i64),
    /// 按服务
    Services(BTreeMap<String, i64>),
}

/// 运维控制接口
pub struct ControlApi {
    store: Arc<ConfigStore>,
    strict_versioning: bool,
    metrics: Option<Arc<AllocatorMetrics>>,
}

impl ControlApi {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            strict_versioning: false,
            metrics: None,
        }
    }

    /// 严格模式：所有修改必须携带期望版本号
    pub fn with_strict_versioning(mut self, strict: bool) -> Self {
        self.strict_versioning = strict;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AllocatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 全量替换服务成员（单一隐式分组，块长度保持不变）
    pub fn replace_services(
        &self,
        services: &BTreeMap<String, Vec<MemberSpec>>,
        expected_version: Option<u64>,
    ) -> Result<HashMap<String, u64>> {
        self.check_versioning(services.len(), expected_version)?;

        let default_block_length = self.store.default_block_length();
        let versions = self.store.update_many(
            &names_of(services),
            expected_version,
            true,
            |name, current| {
                let specs = services
                    .get(name)
                    .ok_or_else(|| AllocatorError::not_found(name))?;
                let block_length =
                    current.map_or(default_block_length, |current| current.block_length);
                ServiceConfig::from_specs(name, specs, block_length)
            },
        )?;
        for (name, specs) in services {
            self.record(name, "replace", versions.get(name).copied(), specs.len());
        }
        Ok(versions)
    }

    /// 调整分组大小
    pub fn resize_groups(
        &self,
        services: &BTreeMap<String, Vec<usize>>,
        expected_version: Option<u64>,
    ) -> Result<HashMap<String, u64>> {
        self.check_versioning(services.len(), expected_version)?;

        let versions = self.store.update_many(
            &names_of(services),
            expected_version,
            false,
            |name, current| {
                let current = current.ok_or_else(|| AllocatorError::not_found(name))?;
                let sizes = services
                    .get(name)
                    .ok_or_else(|| AllocatorError::not_found(name))?;
                current.with_group_sizes(sizes.clone())
            },
        )?;
        for (name, sizes) in services {
            self.record(name, "resize_groups", versions.get(name).copied(), sizes.len());
        }
        Ok(versions)
    }

    /// 调整块长度
    pub fn set_block_length(
        &self,
        scope: &BlockLengthScope,
        expected_version: Option<u64>,
    ) -> Result<HashMap<String, u64>> {
        match scope {
            BlockLengthScope::All(block_length) => {
                if expected_version.is_some() {
                    return Err(AllocatorError::invalid_parameter(
                        "expected version is only accepted for a single-service request",
                    ));
                }
                if self.strict_versioning {
                    return Err(AllocatorError::invalid_parameter(
                        "strict versioning requires a per-service block length request",
                    ));
                }
                let versions = self.store.mutate_default_block_length(*block_length)?;
                info!(
                    block_length,
                    services = versions.len(),
                    "Default block length updated"
                );
                for (name, version) in &versions {
                    self.record(name, "set_block_length", Some(*version), 0);
                }
                Ok(versions)
            }
            BlockLengthScope::Services(services) => {
                self.check_versioning(services.len(), expected_version)?;

                let versions = self.store.update_many(
                    &names_of(services),
                    expected_version,
                    false,
                    |name, current| {
                        let current = current.ok_or_else(|| AllocatorError::not_found(name))?;
                        let block_length = services
                            .get(name)
                            .ok_or_else(|| AllocatorError::not_found(name))?;
                        current.with_block_length(*block_length)
                    },
                )?;
                for name in services.keys() {
                    self.record(name, "set_block_length", versions.get(name).copied(), 0);
                }
                Ok(versions)
            }
        }
    }

    fn check_versioning(&self, services: usize, expected_version: Option<u64>) -> Result<()> {
        if services == 0 {
            return Err(AllocatorError::invalid_parameter("request names no service"));
        }
        if expected_version.is_some() && services > 1 {
            return Err(AllocatorError::invalid_parameter(
                "expected version is only accepted for a single-service request",
            ));
        }
        if self.strict_versioning && expected_version.is_none() {
            return Err(AllocatorError::invalid_parameter(
                "strict versioning requires an expected version",
            ));
        }
        Ok(())
    }

    fn record(&self, name: &str, operation: &str, version: Option<u64>, items: usize) {
        info!(service = %name, operation, version, items, "Config mutated");
        if let Some(metrics) = &self.metrics {
            metrics.record_mutation(name, operation);
        }
    }
}

fn names_of<V>(services: &BTreeMap<String, V>) -> BTreeSet<String> {
    services.keys().cloned().collect()
}
