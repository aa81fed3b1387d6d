//! 重试策略模块

pub mod exponential;

pub use exponential::ExponentialBackoffPolicy;

use crate::error::{AllocatorError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// 重试策略 trait
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: usize, error: &AllocatorError) -> bool;
    fn backoff_duration(&self, attempt: usize) -> Duration;
}

/// 按策略重试异步操作，返回最后一次的结果
pub async fn retry_with<P, F, Fut, T>(policy: &P, operation: &str, mut op: F) -> Result<T>
where
    P: RetryPolicy + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.backoff_duration(attempt);
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
