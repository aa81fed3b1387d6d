use super::RetryPolicy;
use crate::error::AllocatorError;
use std::time::Duration;

/// 指数退避重试策略
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// 不限次数（调和循环使用，注册中心故障从不升级为致命错误）
    pub fn unbounded(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(usize::MAX, base_delay, max_delay)
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn should_retry(&self, attempt: usize, error: &AllocatorError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }

        // 只对可重试的错误进行重试
        error.is_retryable()
    }

    fn backoff_duration(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(10);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}
