//! 服务配置定义
//!
//! 一个服务的有序成员列表、分组划分和哈希块长度。
//! 分组是成员列表的连续划分：第 i 组占据 `[sum(sizes[..i]), sum(sizes[..=i]))`。

use crate::error::{AllocatorError, Result};
use crate::store::member::{Member, MemberSpec};
use serde::Serialize;
use std::collections::HashSet;
use std::ops::Range;

/// 服务配置快照（发布后不可变）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceConfig {
    /// 服务名（全局唯一键）
    pub name: String,
    /// 按分组顺序排列的成员
    pub members: Vec<Member>,
    /// 各分组大小，之和等于成员数
    pub group_sizes: Vec<usize>,
    /// 哈希块长度（> 0）
    pub block_length: u32,
    /// 配置版本，每次成功修改加一
    pub version: u64,
}

impl ServiceConfig {
    /// 创建并校验服务配置（版本由 ConfigStore 分配）
    pub fn new(
        name: impl Into<String>,
        members: Vec<Member>,
        group_sizes: Vec<usize>,
        block_length: u32,
    ) -> Result<Self> {
        let mut config = Self {
            name: name.into(),
            members,
            group_sizes,
            block_length,
            version: 0,
        };
        config.validate()?;
        config.assign_groups();
        Ok(config)
    }

    /// 单一隐式分组（全量替换和首次注册时使用）
    pub fn single_group(
        name: impl Into<String>,
        members: Vec<Member>,
        block_length: u32,
    ) -> Result<Self> {
        let sizes = vec![members.len()];
        Self::new(name, members, sizes, block_length)
    }

    /// 由运维声明的成员列表构建
    pub fn from_specs(
        name: impl Into<String>,
        specs: &[MemberSpec],
        block_length: u32,
    ) -> Result<Self> {
        let members = specs
            .iter()
            .map(|spec| {
                Member::new(spec.address.clone(), spec.address.clone()).with_weight(spec.weight)
            })
            .collect();
        Self::single_group(name, members, block_length)
    }

    /// 校验不变量
    pub fn validate(&self) -> Result<()> {
        if self.block_length == 0 {
            return Err(AllocatorError::invalid_parameter(
                "block length must be greater than 0",
            ));
        }

        let total: usize = self.group_sizes.iter().sum();
        if total != self.members.len() {
            return Err(AllocatorError::invalid_partition(
                &self.name,
                &self.group_sizes,
                self.members.len(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.members.len());
        for member in &self.members {
            if member.address.is_empty() {
                return Err(AllocatorError::invalid_parameter("member address is empty"));
            }
            if !seen.insert(member.address.as_str()) {
                return Err(AllocatorError::invalid_parameter(format!(
                    "duplicate member address {} in service {}",
                    member.address, self.name
                )));
            }
            if !member.weight.is_finite() || member.weight < 0.0 {
                return Err(AllocatorError::invalid_parameter(format!(
                    "weight of {} must be a finite non-negative number, got {}",
                    member.address, member.weight
                )));
            }
        }
        Ok(())
    }

    /// 按分组大小重新推导每个成员的分组下标
    pub(crate) fn assign_groups(&mut self) {
        let mut index = 0;
        for (group, size) in self.group_sizes.iter().enumerate() {
            for member in &mut self.members[index..index + size] {
                member.group = group;
            }
            index += size;
        }
    }

    /// 以新的分组大小派生配置
    pub fn with_group_sizes(&self, sizes: Vec<usize>) -> Result<Self> {
        let total: usize = sizes.iter().sum();
        if total != self.members.len() {
            return Err(AllocatorError::invalid_partition(
                &self.name,
                &sizes,
                self.members.len(),
            ));
        }
        let mut next = self.clone();
        next.group_sizes = sizes;
        next.assign_groups();
        Ok(next)
    }

    /// 以新的块长度派生配置
    pub fn with_block_length(&self, block_length: i64) -> Result<Self> {
        let mut next = self.clone();
        next.block_length = validate_block_length(block_length)?;
        Ok(next)
    }

    /// 第 `group` 组在成员列表中的下标范围
    pub fn group_range(&self, group: usize) -> Range<usize> {
        let start: usize = self.group_sizes[..group].iter().sum();
        start..start + self.group_sizes[group]
    }

    /// 第 `group` 组的所有成员（包括空洞）
    pub fn group_members(&self, group: usize) -> &[Member] {
        &self.members[self.group_range(group)]
    }

    pub fn group_count(&self) -> usize {
        self.group_sizes.len()
    }

    pub fn member(&self, address: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.address == address)
    }

    pub fn healthy_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_healthy())
    }

    pub fn healthy_count(&self) -> usize {
        self.healthy_members().count()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// 校验块长度：必须在 `1..=u32::MAX` 之间
pub fn validate_block_length(block_length: i64) -> Result<u32> {
    if block_length <= 0 {
        return Err(AllocatorError::invalid_parameter(format!(
            "block length must be greater than 0, got {}",
            block_length
        )));
    }
    u32::try_from(block_length).map_err(|_| {
        AllocatorError::invalid_parameter(format!("block length {} is too large", block_length))
    })
}
