use crate::allocator::SelectionStrategy;
use crate::error::{AllocatorError, Result};
use crate::store::{DEFAULT_BLOCK_LENGTH, HolePolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 配置文件路径的环境变量
pub const CONFIG_ENV: &str = "ALLOCATOR_CONFIG";
/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "allocator.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    10001
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryType {
    #[default]
    Consul,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub registry_type: RegistryType,
    #[serde(default = "default_registry_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
    /// 注册实例时附带的 HTTP 健康检查
    pub check: Option<HealthCheckConfig>,
}

fn default_registry_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:8500".to_string()]
}

fn default_registry_timeout() -> u64 {
    5
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_type: RegistryType::default(),
            endpoints: default_registry_endpoints(),
            timeout_secs: default_registry_timeout(),
            check: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_check_path")]
    pub path: String,
    #[serde(default = "default_check_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_check_secs")]
    pub timeout_secs: u64,
    /// 检查持续失败多久后由注册中心自动注销
    #[serde(default = "default_deregister_after")]
    pub deregister_after_secs: u64,
}

fn default_check_path() -> String {
    "/health".to_string()
}

fn default_check_secs() -> u64 {
    5
}

fn default_deregister_after() -> u64 {
    30
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_check_path(),
            interval_secs: default_check_secs(),
            timeout_secs: default_check_secs(),
            deregister_after_secs: default_deregister_after(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllocatorConfig {
    #[serde(default = "default_block_length")]
    pub default_block_length: u32,
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// 为 true 时所有修改请求必须携带期望版本号
    #[serde(default)]
    pub strict_versioning: bool,
}

fn default_block_length() -> u32 {
    DEFAULT_BLOCK_LENGTH
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_block_length: default_block_length(),
            strategy: SelectionStrategy::default(),
            strict_versioning: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// 需要与注册中心保持同步的服务
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// 回收空服务的间隔
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_grace_period() -> u64 {
    30
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_gc_interval() -> u64 {
    60
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            interval_secs: default_interval(),
            grace_period_secs: default_grace_period(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            gc_interval_secs: default_gc_interval(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn hole_policy(&self) -> HolePolicy {
        HolePolicy::new(Duration::from_secs(self.grace_period_secs))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AllocatorError::configuration(format!("failed to read {}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 配置文件路径：命令行第一个参数 > `ALLOCATOR_CONFIG` > `allocator.toml`
    pub fn resolve_path(arg: Option<String>) -> String {
        arg.or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.allocator.default_block_length == 0 {
            return Err(AllocatorError::configuration(
                "allocator.default_block_length must be greater than 0",
            ));
        }
        if self.reconcile.interval_secs == 0 {
            return Err(AllocatorError::configuration(
                "reconcile.interval_secs must be greater than 0",
            ));
        }
        if self.reconcile.gc_interval_secs == 0 {
            return Err(AllocatorError::configuration(
                "reconcile.gc_interval_secs must be greater than 0",
            ));
        }
        if self.reconcile.backoff_base_ms == 0
            || self.reconcile.backoff_max_ms < self.reconcile.backoff_base_ms
        {
            return Err(AllocatorError::configuration(
                "reconcile backoff must satisfy 0 < backoff_base_ms <= backoff_max_ms",
            ));
        }
        if self.registry.registry_type == RegistryType::Consul && self.registry.endpoints.is_empty()
        {
            return Err(AllocatorError::configuration(
                "registry.endpoints must not be empty for consul",
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.address, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config = Config::from_toml("[server]\naddress = \"127.0.0.1\"\n").unwrap();
        assert_eq!(config.server.port, 10001);
        assert_eq!(config.registry.registry_type, RegistryType::Consul);
        assert_eq!(config.allocator.default_block_length, DEFAULT_BLOCK_LENGTH);
        assert_eq!(config.allocator.strategy, SelectionStrategy::WeightedRoundRobin);
        assert!(!config.allocator.strict_versioning);
        assert_eq!(config.reconcile.interval_secs, 5);
        assert_eq!(config.reconcile.grace_period_secs, 30);
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.bind_address(), "127.0.0.1:10001");
    }

    #[test]
    fn full_file_parses() {
        let content = r#"
            [server]
            address = "0.0.0.0"
            port = 9000

            [registry]
            registry_type = "memory"

            [registry.check]
            path = "/healthz"

            [allocator]
            default_block_length = 4
            strategy = "weighted_random"
            strict_versioning = true

            [reconcile]
            services = ["helloServer"]
            interval_secs = 1

            [log]
            format = "json"
            level = "debug"
        "#;
        let config = Config::from_toml(content).unwrap();
        assert_eq!(config.registry.registry_type, RegistryType::Memory);
        assert_eq!(config.registry.check.as_ref().unwrap().path, "/healthz");
        assert_eq!(config.registry.check.as_ref().unwrap().deregister_after_secs, 30);
        assert_eq!(config.allocator.strategy, SelectionStrategy::WeightedRandom);
        assert_eq!(config.reconcile.services, vec!["helloServer".to_string()]);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn zero_block_length_is_rejected() {
        let content = "[server]\naddress = \"0.0.0.0\"\n[allocator]\ndefault_block_length = 0\n";
        let err = Config::from_toml(content).unwrap_err();
        assert!(err.is(crate::error::ErrorCode::ConfigurationError));
    }

    #[test]
    fn unknown_strategy_is_a_configuration_error() {
        let content = "[server]\naddress = \"0.0.0.0\"\n[allocator]\nstrategy = \"fastest\"\n";
        let err = Config::from_toml(content).unwrap_err();
        assert!(err.is(crate::error::ErrorCode::ConfigurationError));
    }
}
