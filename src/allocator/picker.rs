//! 组内成员选择策略
//!
//! 候选集合只包含所选分组里的健康成员，权重在候选集合内隐式归一化。

use crate::store::{Member, ServiceConfig};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// 成员选择器
pub trait MemberPicker: Send + Sync {
    /// 从候选成员中选出一个；候选为空时返回 `None`
    fn pick<'a>(&self, config: &ServiceConfig, candidates: &[&'a Member]) -> Option<&'a Member>;

    /// 策略名称
    fn name(&self) -> &'static str;

    /// 服务被回收后丢弃为它保存的选择状态
    fn forget(&self, _service: &str) {}
}

/// 选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// 最小负载加权轮询
    #[default]
    WeightedRoundRobin,
    /// 加权随机
    WeightedRandom,
}

impl SelectionStrategy {
    /// 创建对应的选择器
    pub fn build(&self) -> Arc<dyn MemberPicker> {
        match self {
            SelectionStrategy::WeightedRoundRobin => Arc::new(WeightedRoundRobin::new()),
            SelectionStrategy::WeightedRandom => Arc::new(WeightedRandom),
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::WeightedRoundRobin => write!(f, "weighted_round_robin"),
            SelectionStrategy::WeightedRandom => write!(f, "weighted_random"),
        }
    }
}

/// 所有权重为 0 时退化为等权
fn all_zero(candidates: &[&Member]) -> bool {
    candidates.iter().all(|m| m.weight <= 0.0)
}

/// 加权随机选择
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRandom;

impl MemberPicker for WeightedRandom {
    fn pick<'a>(&self, _config: &ServiceConfig, candidates: &[&'a Member]) -> Option<&'a Member> {
        let mut rng = rand::thread_rng();
        if all_zero(candidates) {
            return candidates.choose(&mut rng).copied();
        }
        match WeightedIndex::new(candidates.iter().map(|m| m.weight)) {
            Ok(dist) => candidates.get(dist.sample(&mut rng)).copied(),
            Err(_) => candidates.choose(&mut rng).copied(),
        }
    }

    fn name(&self) -> &'static str {
        "weighted_random"
    }
}

/// 一个服务的负载表，只对生成它的配置版本有效
#[derive(Debug, Default)]
struct LoadTable {
    version: u64,
    loads: HashMap<String, f64>,
}

/// 最小负载加权轮询
///
/// 每个成员被选中后负载增加 `1 / weight`，每次选择负载最小者（并列时按成员顺序）。
/// 权重 0.8 / 0.2 的两个成员分别增加 1.25 / 5，长期比例为 4:1。
/// 配置版本变化后负载清零，负载只反映当前成员集合下的分配。
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    tables: Mutex<HashMap<String, LoadTable>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemberPicker for WeightedRoundRobin {
    fn pick<'a>(&self, config: &ServiceConfig, candidates: &[&'a Member]) -> Option<&'a Member> {
        if candidates.is_empty() {
            return None;
        }
        let uniform = all_zero(candidates);

        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let table = tables.entry(config.name.clone()).or_default();
        if table.version != config.version {
            table.version = config.version;
            table.loads.clear();
        }

        let mut chosen: Option<(&'a Member, f64)> = None;
        for &member in candidates {
            if !uniform && member.weight <= 0.0 {
                continue;
            }
            let load = table.loads.get(&member.address).copied().unwrap_or(0.0);
            // 严格小于：并列时保留靠前的成员
            if chosen.is_none_or(|(_, best)| load < best) {
                chosen = Some((member, load));
            }
        }

        let (member, load) = chosen?;
        let weight = if uniform { 1.0 } else { member.weight };
        table.loads.insert(member.address.clone(), load + 1.0 / weight);
        Some(member)
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }

    fn forget(&self, service: &str) {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(service);
    }
}
