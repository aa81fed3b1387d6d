//! 注册中心成员合并
//!
//! 把注册中心观察到的健康实例合并进现有配置：
//! - 地址匹配的成员保留原有权重、分组和槽位
//! - 消失的成员先变成空洞，宽限期过后清除并同步缩小所在分组
//! - 新地址按地址排序后追加到最后一组，保证观察同一注册中心的副本得到相同结果

use crate::error::Result;
use crate::store::member::{Member, MemberHealth};
use crate::store::service_config::ServiceConfig;
use crate::types::RegistryInstance;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// 空洞处理策略
#[derive(Debug, Clone, Copy)]
pub struct HolePolicy {
    /// 空洞保留时长
    pub grace: Duration,
}

impl HolePolicy {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    fn expired(
        &self,
        since: chrono::DateTime<chrono::Utc>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        now.signed_duration_since(since)
            .to_std()
            .map(|elapsed| elapsed >= self.grace)
            .unwrap_or(false)
    }
}

impl Default for HolePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// 一次合并的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MembershipDiff {
    /// 合并后的配置版本
    pub version: u64,
    /// 新加入的地址
    pub added: Vec<String>,
    /// 本次变为空洞的地址
    pub holed: Vec<String>,
    /// 在宽限期内重新出现的地址
    pub restored: Vec<String>,
    /// 宽限期过后被清除的地址
    pub purged: Vec<String>,
    /// 地址不变但实例 ID 变化的地址
    pub updated_ids: Vec<String>,
    /// 观察结果为空但服务仍有健康成员，保留了原配置
    pub kept_prior: bool,
}

impl MembershipDiff {
    /// 成员集合没有任何变化
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.holed.is_empty()
            && self.restored.is_empty()
            && self.purged.is_empty()
            && self.updated_ids.is_empty()
    }
}

pub(crate) enum MergeOutcome {
    Unchanged,
    KeptPrior,
    Changed(ServiceConfig, MembershipDiff),
}

pub(crate) fn merge_membership(
    current: &ServiceConfig,
    observed: &[RegistryInstance],
    policy: &HolePolicy,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<MergeOutcome> {
    // 同一地址出现多次时保留第一个
    let mut observed_by_addr: BTreeMap<&str, &RegistryInstance> = BTreeMap::new();
    for instance in observed {
        observed_by_addr
            .entry(instance.address.as_str())
            .or_insert(instance);
    }

    if observed_by_addr.is_empty() && current.healthy_count() > 0 {
        return Ok(MergeOutcome::KeptPrior);
    }

    let mut members = current.members.clone();
    let mut sizes = current.group_sizes.clone();
    let mut diff = MembershipDiff::default();

    for member in members.iter_mut() {
        match observed_by_addr.remove(member.address.as_str()) {
            Some(instance) => {
                if member.is_hole() {
                    member.health = MemberHealth::Healthy;
                    diff.restored.push(member.address.clone());
                }
                if member.id != instance.id {
                    member.id = instance.id.clone();
                    diff.updated_ids.push(member.address.clone());
                }
            }
            None => {
                if member.is_healthy() {
                    member.health = MemberHealth::Hole { since: now };
                    diff.holed.push(member.address.clone());
                }
            }
        }
    }

    let mut index = members.len();
    while index > 0 {
        index -= 1;
        if let MemberHealth::Hole { since } = members[index].health {
            if policy.expired(since, now) {
                sizes[members[index].group] -= 1;
                diff.purged.push(members.remove(index).address);
            }
        }
    }
    diff.purged.reverse();

    if !observed_by_addr.is_empty() {
        if sizes.is_empty() {
            sizes.push(0);
        }
        let last = sizes.len() - 1;
        for (address, instance) in observed_by_addr {
            members.push(Member::new(instance.id.clone(), address));
            sizes[last] += 1;
            diff.added.push(address.to_string());
        }
    }

    if diff.is_empty() {
        return Ok(MergeOutcome::Unchanged);
    }

    let mut next = ServiceConfig {
        members,
        group_sizes: sizes,
        ..current.clone()
    };
    next.assign_groups();
    next.validate()?;
    Ok(MergeOutcome::Changed(next, diff))
}
