//! 日志初始化
//!
//! `RUST_LOG` 优先于配置文件中的 `log.level`。

use crate::config::{LogConfig, LogFormat};
use crate::error::{AllocatorError, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(&config.level),
    }
    .map_err(|e| AllocatorError::configuration(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let initialized = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
    };
    initialized.map_err(|e| AllocatorError::system(format!("tracing already initialized: {}", e)))
}
