//! 分配引擎
//!
//! 一次分配只读取一个不可变快照，不做任何网络 I/O。

use crate::allocator::hashing::{bucket_of, group_for_bucket};
use crate::allocator::picker::{MemberPicker, SelectionStrategy};
use crate::error::{AllocatorError, Result};
use crate::metrics::AllocatorMetrics;
use crate::store::{ConfigStore, Member, ServiceConfig};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// 一次分配的结果
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub service: String,
    pub member: Member,
    /// 键哈希到的分组
    pub group: usize,
    /// 实际选中成员所在分组（所选分组无健康成员时会顺延）
    pub served_by_group: usize,
    pub bucket: u32,
    pub version: u64,
}

/// 分配引擎
pub struct AllocationEngine {
    store: Arc<ConfigStore>,
    picker: Arc<dyn MemberPicker>,
    metrics: Option<Arc<AllocatorMetrics>>,
}

impl AllocationEngine {
    pub fn new(store: Arc<ConfigStore>, strategy: SelectionStrategy) -> Self {
        Self::with_picker(store, strategy.build())
    }

    pub fn with_picker(store: Arc<ConfigStore>, picker: Arc<dyn MemberPicker>) -> Self {
        Self {
            store,
            picker,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AllocatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.picker.name()
    }

    /// 为 `key` 选择服务 `name` 的一个成员
    pub fn select(&self, name: &str, key: &str) -> Result<Selection> {
        let result = self.store.get(name).and_then(|config| self.select_in(&config, key));
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(selection) => metrics.record_selection(name, &selection.member.address),
                Err(e) => metrics.record_selection_failure(name, e.code()),
            }
        }
        result
    }

    /// 丢弃已回收服务的选择状态
    pub fn forget(&self, services: &[String]) {
        for service in services {
            self.picker.forget(service);
        }
    }

    /// 键哈希到的分组（诊断用，不考虑成员健康状态）
    pub fn select_group(&self, name: &str, key: &str) -> Result<usize> {
        let config = self.store.get(name)?;
        let bucket = bucket_of(key, config.block_length);
        group_for_bucket(bucket, config.block_length, &config.group_sizes)
            .ok_or_else(|| AllocatorError::no_available_member(name))
    }

    fn select_in(&self, config: &ServiceConfig, key: &str) -> Result<Selection> {
        if config.healthy_count() == 0 {
            return Err(AllocatorError::no_available_member(&config.name));
        }

        let bucket = bucket_of(key, config.block_length);
        let group = group_for_bucket(bucket, config.block_length, &config.group_sizes)
            .ok_or_else(|| AllocatorError::no_available_member(&config.name))?;

        // 所选分组没有健康成员时按顺序尝试后续分组，结果仍是确定的
        let group_count = config.group_count();
        for offset in 0..group_count {
            let candidate_group = (group + offset) % group_count;
            let candidates: Vec<&Member> = config
                .group_members(candidate_group)
                .iter()
                .filter(|m| m.is_healthy())
                .collect();
            if candidates.is_empty() {
                continue;
            }
            if offset > 0 {
                debug!(
                    service = %config.name,
                    group,
                    fallback = candidate_group,
                    "Group has no healthy member, falling through"
                );
            }
            let member = self
                .picker
                .pick(config, &candidates)
                .ok_or_else(|| AllocatorError::no_available_member(&config.name))?;
            return Ok(Selection {
                service: config.name.clone(),
                member: member.clone(),
                group,
                served_by_group: candidate_group,
                bucket,
                version: config.version,
            });
        }

        Err(AllocatorError::no_available_member(&config.name))
    }
}
