//! 服务运行时实现

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::runtime::config::RuntimeConfig;
use crate::runtime::task::{SpawnTask, Task, TaskResult};
use anyhow::Result;

/// 服务运行时
///
/// # 使用示例
/// ```rust,no_run
/// use flare_allocator::runtime::ServiceRuntime;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let runtime = ServiceRuntime::new("flare-allocator")
///     .add_spawn_with_shutdown("gc", |shutdown_rx| async move {
///         let _ = shutdown_rx.await;
///         Ok(())
///     });
///
/// runtime.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct ServiceRuntime {
    service_name: String,
    tasks: Vec<Box<dyn Task>>,
    config: RuntimeConfig,
}

impl ServiceRuntime {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            tasks: Vec::new(),
            config: RuntimeConfig::default(),
        }
    }

    /// 设置运行时配置
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// 添加任务
    pub fn add_task(mut self, task: Box<dyn Task>) -> Self {
        info!(task_name = %task.name(), "Adding task to runtime");
        self.tasks.push(task);
        self
    }

    /// 添加 spawn 任务（闭包接收 shutdown_rx，返回 Future）
    pub fn add_spawn_with_shutdown<F, Fut>(self, name: impl Into<String>, future_fn: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.add_task(Box::new(SpawnTask::with_shutdown(name, future_fn)))
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// 运行直到收到 Ctrl+C
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            info!("Shutdown signal received (Ctrl+C)");
        })
        .await
    }

    /// 运行直到 `signal` 完成，然后优雅关闭所有任务
    pub async fn run_until<S>(mut self, signal: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        info!(
            service_name = %self.service_name,
            task_count = self.tasks.len(),
            "Starting service runtime"
        );

        let tasks = std::mem::take(&mut self.tasks);
        let (mut join_set, task_shutdowns) = Self::start_tasks(tasks);

        signal.await;

        // 发送关闭信号给所有任务（已退出的任务接收端已丢弃，忽略发送失败）
        for tx in task_shutdowns {
            let _ = tx.send(());
        }

        Self::wait_for_tasks_shutdown(&self.config, &mut join_set).await;

        info!(service_name = %self.service_name, "Service runtime stopped");
        Ok(())
    }

    fn start_tasks(tasks: Vec<Box<dyn Task>>) -> (JoinSet<TaskResult>, Vec<oneshot::Sender<()>>) {
        let mut join_set = JoinSet::new();
        let mut task_shutdowns = Vec::new();

        for task in tasks {
            let task_name = task.name().to_string();
            let (task_shutdown_tx, task_shutdown_rx) = oneshot::channel();
            task_shutdowns.push(task_shutdown_tx);

            let task_future = task.run(task_shutdown_rx);

            join_set.spawn(async move {
                let result = task_future.await;
                match &result {
                    Ok(_) => {
                        info!(task_name = %task_name, "Task completed");
                    }
                    Err(e) => {
                        error!(task_name = %task_name, error = %e, "Task failed");
                    }
                }
                result
            });
        }

        (join_set, task_shutdowns)
    }

    /// 等待所有任务关闭
    async fn wait_for_tasks_shutdown(config: &RuntimeConfig, join_set: &mut JoinSet<TaskResult>) {
        let drained = tokio::time::timeout(config.shutdown_timeout, async {
            while let Some(result) = join_set.join_next().await {
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        warn!("Task completed with error: {}", e);
                    }
                    Err(e) => {
                        warn!("Task join error: {}", e);
                    }
                }
            }
        })
        .await;

        match drained {
            Ok(_) => {
                info!("All tasks completed");
            }
            Err(_) => {
                warn!("Tasks shutdown timeout, forcing exit");
                join_set.abort_all();
            }
        }
    }
}
