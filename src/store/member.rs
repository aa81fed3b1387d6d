//! 成员定义

use serde::{Deserialize, Serialize};

/// 成员健康状态
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MemberHealth {
    /// 注册中心可见且通过健康检查
    Healthy,
    /// 已从注册中心消失，但在宽限期内保留槽位
    Hole {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        since: chrono::DateTime<chrono::Utc>,
    },
}

/// 服务成员（一个可寻址的后端实例）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// 实例 ID
    pub id: String,
    /// 地址（host:port，服务内唯一）
    pub address: String,
    /// 组内相对流量权重
    pub weight: f64,
    /// 健康状态
    pub health: MemberHealth,
    /// 所属分组下标（由分组大小推导）
    pub group: usize,
}

impl Member {
    /// 创建健康成员，默认权重 1
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            weight: 1.0,
            health: MemberHealth::Healthy,
            group: 0,
        }
    }

    /// 设置权重
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.health == MemberHealth::Healthy
    }

    pub fn is_hole(&self) -> bool {
        matches!(self.health, MemberHealth::Hole { .. })
    }
}

/// 运维侧声明的成员（Control API 全量替换时使用）
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSpec {
    pub address: String,
    pub weight: f64,
}

impl MemberSpec {
    pub fn new(address: impl Into<String>, weight: f64) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }
}
