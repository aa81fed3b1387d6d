//! 指标收集模块
//!
//! 所有指标注册在进程内独立的 prometheus `Registry` 上，由 `/metrics` 以文本格式导出：
//! - `allocator_selections_total{service,address}` 成功分配次数
//! - `allocator_selection_failures_total{service,code}` 分配失败次数
//! - `allocator_reconcile_ticks_total{service,outcome}` 调和循环执行次数
//! - `allocator_config_mutations_total{service,operation}` 配置修改次数

use crate::error::{ErrorCode, Result};
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};

/// 调和结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 成员有变化并已发布新版本
    Applied,
    /// 观察结果与当前配置一致
    Unchanged,
    /// 观察结果为空，保留原配置
    KeptPrior,
    /// 注册中心不可用，跳过本次
    Skipped,
    /// 其他错误
    Failed,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Unchanged => "unchanged",
            ReconcileOutcome::KeptPrior => "kept_prior",
            ReconcileOutcome::Skipped => "skipped",
            ReconcileOutcome::Failed => "failed",
        }
    }
}

/// 分配器指标
pub struct AllocatorMetrics {
    registry: Registry,
    selections: IntCounterVec,
    selection_failures: IntCounterVec,
    reconcile_ticks: IntCounterVec,
    config_mutations: IntCounterVec,
}

impl AllocatorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let selections = IntCounterVec::new(
            Opts::new("allocator_selections_total", "Total number of successful selections"),
            &["service", "address"],
        )?;
        let selection_failures = IntCounterVec::new(
            Opts::new(
                "allocator_selection_failures_total",
                "Total number of failed selections by error code",
            ),
            &["service", "code"],
        )?;
        let reconcile_ticks = IntCounterVec::new(
            Opts::new(
                "allocator_reconcile_ticks_total",
                "Total number of reconciliation ticks by outcome",
            ),
            &["service", "outcome"],
        )?;
        let config_mutations = IntCounterVec::new(
            Opts::new(
                "allocator_config_mutations_total",
                "Total number of control API mutations by operation",
            ),
            &["service", "operation"],
        )?;

        registry.register(Box::new(selections.clone()))?;
        registry.register(Box::new(selection_failures.clone()))?;
        registry.register(Box::new(reconcile_ticks.clone()))?;
        registry.register(Box::new(config_mutations.clone()))?;

        Ok(Self {
            registry,
            selections,
            selection_failures,
            reconcile_ticks,
            config_mutations,
        })
    }

    pub fn record_selection(&self, service: &str, address: &str) {
        self.selections.with_label_values(&[service, address]).inc();
    }

    pub fn record_selection_failure(&self, service: &str, code: Option<ErrorCode>) {
        let code = code.map(|c| c.as_str()).unwrap_or("SYSTEM");
        self.selection_failures
            .with_label_values(&[service, code])
            .inc();
    }

    pub fn record_reconcile(&self, service: &str, outcome: ReconcileOutcome) {
        self.reconcile_ticks
            .with_label_values(&[service, outcome.as_str()])
            .inc();
    }

    pub fn record_mutation(&self, service: &str, operation: &str) {
        self.config_mutations
            .with_label_values(&[service, operation])
            .inc();
    }

    /// 成功分配计数（测试和诊断用）
    pub fn selection_count(&self, service: &str, address: &str) -> u64 {
        self.selections.with_label_values(&[service, address]).get()
    }

    /// 以 Prometheus 文本格式导出
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}
