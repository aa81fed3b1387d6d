//! 服务配置存储模块
//!
//! 保存每个服务的成员、分组和块长度，写入串行化、读取走不可变快照

pub mod config_store;
pub mod member;
pub mod membership;
pub mod service_config;

pub use config_store::{ConfigStore, DEFAULT_BLOCK_LENGTH, WatchGuard};
pub use member::{Member, MemberHealth, MemberSpec};
pub use membership::{HolePolicy, MembershipDiff};
pub use service_config::{ServiceConfig, validate_block_length};
