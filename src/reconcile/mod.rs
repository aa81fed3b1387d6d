//! 注册中心调和循环
//!
//! 每个服务一个调和器：定时拉取注册中心的健康实例，合并进配置存储。
//! 注册中心故障时跳过本次（配置保持不变）并按指数退避延后下一次，从不升级为致命错误。

use crate::error::{ErrorCode, Result};
use crate::metrics::{AllocatorMetrics, ReconcileOutcome};
use crate::registry::SharedRegistry;
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use crate::runtime::{Task, TaskResult};
use crate::store::{ConfigStore, HolePolicy, MembershipDiff};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// 单个服务的调和器
pub struct Reconciler {
    service: String,
    store: Arc<ConfigStore>,
    registry: SharedRegistry,
    policy: HolePolicy,
    interval: Duration,
    backoff: ExponentialBackoffPolicy,
    metrics: Option<Arc<AllocatorMetrics>>,
    consecutive_failures: usize,
}

impl Reconciler {
    pub fn new(
        service: impl Into<String>,
        store: Arc<ConfigStore>,
        registry: SharedRegistry,
        interval: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            store,
            registry,
            policy: HolePolicy::default(),
            interval,
            backoff: ExponentialBackoffPolicy::unbounded(
                Duration::from_millis(500),
                Duration::from_secs(30),
            ),
            metrics: None,
            consecutive_failures: 0,
        }
    }

    pub fn with_policy(mut self, policy: HolePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AllocatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 连续失败次数（注册中心不可用）
    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures
    }

    /// 执行一次调和
    ///
    /// 注册中心不可用时返回 `RegistryUnavailable`，配置不变
    pub async fn tick(&mut self) -> Result<MembershipDiff> {
        let observed = match self.registry.healthy_instances(&self.service).await {
            Ok(observed) => observed,
            Err(e) => {
                if e.is_retryable() {
                    self.consecutive_failures += 1;
                    self.record(ReconcileOutcome::Skipped);
                } else {
                    self.record(ReconcileOutcome::Failed);
                }
                return Err(e);
            }
        };
        self.consecutive_failures = 0;

        match self
            .store
            .apply_membership(&self.service, &observed, &self.policy, chrono::Utc::now())
        {
            Ok(diff) => {
                let outcome = if diff.kept_prior {
                    ReconcileOutcome::KeptPrior
                } else if diff.is_empty() {
                    ReconcileOutcome::Unchanged
                } else {
                    ReconcileOutcome::Applied
                };
                self.record(outcome);
                Ok(diff)
            }
            Err(e) => {
                self.record(ReconcileOutcome::Failed);
                Err(e)
            }
        }
    }

    /// 下一次调和前的等待时间
    pub fn next_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            self.interval
        } else {
            self.backoff
                .backoff_duration(self.consecutive_failures - 1)
                .max(self.interval)
        }
    }

    /// 运行调和循环直到收到关闭信号：立即执行第一次，之后按间隔执行
    pub async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        // 循环运行期间服务不会被回收
        let _guard = self.store.watch(&self.service)?;
        info!(
            service = %self.service,
            interval_ms = self.interval.as_millis() as u64,
            grace_ms = self.policy.grace.as_millis() as u64,
            "Reconciliation loop started"
        );

        loop {
            match self.tick().await {
                Ok(diff) if !diff.is_empty() => {
                    debug!(
                        service = %self.service,
                        version = diff.version,
                        "Reconcile tick applied"
                    );
                }
                Ok(_) => {}
                Err(e) if e.is(ErrorCode::RegistryUnavailable) => {
                    warn!(
                        service = %self.service,
                        failures = self.consecutive_failures,
                        retry_in_ms = self.next_delay().as_millis() as u64,
                        error = %e,
                        "Registry unavailable, skipping reconcile tick"
                    );
                }
                Err(e) => {
                    error!(service = %self.service, error = %e, "Reconcile tick failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.next_delay()) => {}
                _ = &mut shutdown_rx => {
                    info!(service = %self.service, "Reconciliation loop stopped");
                    return Ok(());
                }
            }
        }
    }

    fn record(&self, outcome: ReconcileOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_reconcile(&self.service, outcome);
        }
    }
}

impl Task for Reconciler {
    fn name(&self) -> &str {
        &self.service
    }

    fn run(
        self: Box<Self>,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send>> {
        Box::pin(async move {
            let result: TaskResult = (*self).run(shutdown_rx).await.map_err(|e| e.into());
            result
        })
    }
}
