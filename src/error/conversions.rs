//! 错误类型转换实现

use super::{AllocatorError, ErrorCode};
use axum::Json;
use axum::response::{IntoResponse, Response};
use std::io;

impl From<io::Error> for AllocatorError {
    fn from(err: io::Error) -> Self {
        AllocatorError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AllocatorError {
    fn from(err: serde_json::Error) -> Self {
        AllocatorError::deserialization(format!("JSON 解析错误: {}", err))
    }
}

impl From<toml::de::Error> for AllocatorError {
    fn from(err: toml::de::Error) -> Self {
        AllocatorError::configuration(format!("TOML 解析错误: {}", err))
    }
}

impl From<prometheus::Error> for AllocatorError {
    fn from(err: prometheus::Error) -> Self {
        AllocatorError::system(format!("metrics error: {}", err))
    }
}

impl From<reqwest::Error> for AllocatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AllocatorError::deserialization(format!("registry response: {}", err))
        } else {
            // 连接失败、超时、5xx 等都视为注册中心暂不可用
            AllocatorError::registry_unavailable(err.to_string())
        }
    }
}

impl IntoResponse for AllocatorError {
    fn into_response(self) -> Response {
        let body = self.to_localized();
        let status = body.code.http_status();
        if body.code == ErrorCode::InternalError {
            tracing::error!(reason = %body.reason, "Request failed with internal error");
        }
        (status, Json(body)).into_response()
    }
}
