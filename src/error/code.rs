//! 错误代码定义

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 配置相关错误
/// - 2000-2999: 分配相关错误
/// - 3000-3999: 注册中心相关错误
/// - 6000-6999: 系统相关错误
/// - 8000-8999: 序列化相关错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 配置相关错误 (1000-1999)
    // ============================================================
    InvalidPartition = 1000,
    InvalidParameter = 1001,
    VersionConflict = 1002,
    NotFound = 1003,

    // ============================================================
    // 分配相关错误 (2000-2999)
    // ============================================================
    NoAvailableMember = 2000,

    // ============================================================
    // 注册中心相关错误 (3000-3999)
    // ============================================================
    RegistryUnavailable = 3000,
    AlreadyRegistered = 3001,
    NotRegistered = 3002,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    InternalError = 6000,
    ConfigurationError = 6001,

    // ============================================================
    // 序列化相关错误 (8000-8999)
    // ============================================================
    DeserializationError = 8000,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPartition => "INVALID_PARTITION",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::VersionConflict => "VERSION_CONFLICT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NoAvailableMember => "NO_AVAILABLE_MEMBER",
            ErrorCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            ErrorCode::AlreadyRegistered => "ALREADY_REGISTERED",
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::RegistryUnavailable)
    }

    /// 对应的 HTTP 状态码
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidPartition
            | ErrorCode::InvalidParameter
            | ErrorCode::DeserializationError => StatusCode::BAD_REQUEST,
            ErrorCode::VersionConflict | ErrorCode::AlreadyRegistered => StatusCode::CONFLICT,
            ErrorCode::NotFound | ErrorCode::NotRegistered => StatusCode::NOT_FOUND,
            ErrorCode::NoAvailableMember | ErrorCode::RegistryUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::InternalError | ErrorCode::ConfigurationError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
