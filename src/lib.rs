//! Flare Allocator Library
//!
//! Weighted traffic allocation for named backend services: keys are hashed into
//! blocks, blocks map onto contiguous member groups, and a weighted picker chooses
//! a healthy member inside the group. Membership is kept in sync with a service
//! registry, and operators reshape groups and weights through an HTTP control API.

pub mod allocator;
pub mod api;
pub mod config;
pub mod control;
pub mod error;
pub mod metrics;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-exports
pub use allocator::{AllocationEngine, MemberPicker, Selection, SelectionStrategy};
pub use config::{AllocatorConfig, Config, LogConfig, ReconcileConfig, RegistryConfig, ServerConfig};
pub use control::{BlockLengthScope, ControlApi};
pub use error::{AllocatorError, ErrorCode, LocalizedError, Result};
pub use metrics::AllocatorMetrics;
pub use reconcile::Reconciler;
pub use registry::{ConsulRegistry, InMemoryRegistry, RegistryClient, SharedRegistry};
pub use store::{ConfigStore, Member, MemberHealth, MemberSpec, MembershipDiff, ServiceConfig};
pub use types::RegistryInstance;

// 运行时框架 re-exports
pub use runtime::ServiceRuntime;
pub use runtime::task::{SpawnTask, Task};
