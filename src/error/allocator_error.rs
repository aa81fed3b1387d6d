//! 分配器统一错误类型

use super::code::ErrorCode;
use super::localized::LocalizedError;
use std::collections::HashMap;
use thiserror::Error;

/// 分配器统一错误类型
#[derive(Error, Debug, Clone)]
pub enum AllocatorError {
    /// 带错误代码的业务错误（会以结构化错误体返回给调用方）
    #[error("错误 [{code}] {reason}", code = .code.as_str())]
    Localized {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
        params: Option<HashMap<String, String>>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// 系统错误（内部错误，不暴露细节）
    #[error("系统错误: {0}")]
    System(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl AllocatorError {
    /// 创建带错误代码的业务错误
    pub fn localized(code: ErrorCode, reason: impl Into<String>) -> Self {
        AllocatorError::Localized {
            code,
            reason: reason.into(),
            details: None,
            params: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建带参数的业务错误
    fn with_params(code: ErrorCode, reason: impl Into<String>, params: &[(&str, String)]) -> Self {
        let params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        AllocatorError::Localized {
            code,
            reason: reason.into(),
            details: None,
            params: Some(params),
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        AllocatorError::System(msg.into())
    }

    // ============================================================
    // 便捷方法：配置相关错误
    // ============================================================

    /// 分组大小之和与成员数不一致
    pub fn invalid_partition(service: &str, sizes: &[usize], members: usize) -> Self {
        Self::with_params(
            ErrorCode::InvalidPartition,
            format!(
                "group sizes {:?} sum to {}, service has {} members",
                sizes,
                sizes.iter().sum::<usize>(),
                members
            ),
            &[("service", service.to_string()), ("members", members.to_string())],
        )
    }

    /// 参数不合法
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::InvalidParameter, reason)
    }

    /// 服务不存在
    pub fn not_found(service: &str) -> Self {
        Self::with_params(
            ErrorCode::NotFound,
            format!("service {} not found", service),
            &[("service", service.to_string())],
        )
    }

    /// 乐观并发版本冲突
    pub fn version_conflict(service: &str, expected: u64, actual: u64) -> Self {
        Self::with_params(
            ErrorCode::VersionConflict,
            format!(
                "service {} is at version {}, caller expected {}",
                service, actual, expected
            ),
            &[
                ("service", service.to_string()),
                ("expected", expected.to_string()),
                ("actual", actual.to_string()),
            ],
        )
    }

    // ============================================================
    // 便捷方法：分配相关错误
    // ============================================================

    /// 没有可用（健康）的成员
    pub fn no_available_member(service: &str) -> Self {
        Self::with_params(
            ErrorCode::NoAvailableMember,
            format!("service {} has no healthy member", service),
            &[("service", service.to_string())],
        )
    }

    // ============================================================
    // 便捷方法：注册中心相关错误
    // ============================================================

    /// 注册中心暂不可用（可重试）
    pub fn registry_unavailable(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::RegistryUnavailable, reason)
    }

    /// 实例 ID 已注册
    pub fn already_registered(id: &str) -> Self {
        Self::with_params(
            ErrorCode::AlreadyRegistered,
            format!("instance {} is already registered", id),
            &[("id", id.to_string())],
        )
    }

    /// 实例 ID 未注册
    pub fn not_registered(id: &str) -> Self {
        Self::with_params(
            ErrorCode::NotRegistered,
            format!("instance {} is not registered", id),
            &[("id", id.to_string())],
        )
    }

    // ============================================================
    // 便捷方法：系统 / 序列化错误
    // ============================================================

    /// 配置文件错误
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConfigurationError, reason)
    }

    /// 请求体 / 响应体反序列化失败
    pub fn deserialization(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::DeserializationError, reason)
    }

    // ============================================================
    // 信息获取方法
    // ============================================================

    /// 获取错误代码
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AllocatorError::Localized { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 是否为指定错误代码
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }

    /// 附加错误详情
    #[must_use]
    pub fn with_details(self, extra: impl Into<String>) -> Self {
        match self {
            AllocatorError::Localized {
                code,
                reason,
                params,
                timestamp,
                ..
            } => AllocatorError::Localized {
                code,
                reason,
                details: Some(extra.into()),
                params,
                timestamp,
            },
            other => other,
        }
    }

    /// 转换为结构化错误
    pub fn to_localized(self) -> LocalizedError {
        match self {
            AllocatorError::Localized {
                code,
                reason,
                details,
                params,
                timestamp,
            } => LocalizedError {
                code,
                reason,
                details,
                params,
                timestamp,
            },
            AllocatorError::System(msg) => LocalizedError::new(ErrorCode::InternalError, msg),
            AllocatorError::Io(msg) => LocalizedError::new(ErrorCode::InternalError, msg),
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().map(|code| code.is_retryable()).unwrap_or(false)
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AllocatorError>;
