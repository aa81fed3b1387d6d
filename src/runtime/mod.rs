//! 服务运行时
//!
//! 统一管理后台任务（HTTP 服务、调和循环、回收任务）的生命周期：
//!
//! 1. **任务抽象**：通过 `Task` trait 接入不同类型的任务
//! 2. **并发管理**：使用 `JoinSet` 管理所有后台任务
//! 3. **优雅停机**：收到关闭信号后通知每个任务，并在超时时间内等待其退出

pub mod config;
pub mod runtime;
pub mod task;

pub use config::RuntimeConfig;
pub use runtime::ServiceRuntime;
pub use task::{SpawnTask, Task, TaskResult};
