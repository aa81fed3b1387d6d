//! Flare Allocator 错误处理模块
//!
//! 提供统一的错误类型、错误代码分类和 HTTP 错误体转换

pub mod allocator_error;
pub mod code;
pub mod conversions;
pub mod localized;

pub use allocator_error::{AllocatorError, Result};
pub use code::ErrorCode;
pub use localized::LocalizedError;
