//! 分配引擎模块
//!
//! 键 → 块 → 分组 → 组内健康成员，组内按配置的策略加权选择

pub mod engine;
pub mod hashing;
pub mod picker;

pub use engine::{AllocationEngine, Selection};
pub use hashing::{bucket_of, group_for_bucket, group_for_key};
pub use picker::{MemberPicker, SelectionStrategy, WeightedRandom, WeightedRoundRobin};
