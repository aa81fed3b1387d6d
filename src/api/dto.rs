//! HTTP 请求 / 响应结构

use crate::allocator::Selection;
use crate::error::{AllocatorError, Result};
use crate::store::MemberSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// `/updateConfigMap` 中的单个成员
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberEntry {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "Weight")]
    pub weight: f64,
}

impl MemberEntry {
    /// 校验地址并转换为成员声明
    pub fn to_spec(&self, service: &str) -> Result<MemberSpec> {
        self.ip.parse::<SocketAddr>().map_err(|_| {
            AllocatorError::invalid_parameter(format!(
                "IP {:?} of service {} is not a valid host:port",
                self.ip, service
            ))
        })?;
        Ok(MemberSpec::new(self.ip.clone(), self.weight))
    }
}

/// `/updateConfigMap` 请求体：服务 → 成员列表
pub type UpdateConfigRequest = BTreeMap<String, Vec<MemberEntry>>;

/// `/modify-group` 请求体：服务 → 分组大小
pub type ModifyGroupRequest = BTreeMap<String, Vec<usize>>;

/// `/modify-block-len` 请求体：裸整数（全局）或服务 → 块长度
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ModifyBlockLengthRequest {
    All(i64),
    Services(BTreeMap<String, i64>),
}

/// 修改类接口的查询参数
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionQuery {
    /// 期望的当前版本（乐观并发）
    pub version: Option<u64>,
}

/// 修改类接口的响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub versions: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SvcInfoQuery {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectQuery {
    pub service: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectResponse {
    pub service: String,
    pub id: String,
    pub address: String,
    pub weight: f64,
    pub group: usize,
    pub served_by_group: usize,
    pub bucket: u32,
    pub version: u64,
}

impl From<Selection> for SelectResponse {
    fn from(selection: Selection) -> Self {
        Self {
            service: selection.service,
            id: selection.member.id,
            address: selection.member.address,
            weight: selection.member.weight,
            group: selection.group,
            served_by_group: selection.served_by_group,
            bucket: selection.bucket,
            version: selection.version,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub id: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub name: String,
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeregisterRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub services: usize,
    pub strategy: &'static str,
}
