//! 错误代码定义
//!
//! 错误代码按类别分组，每个类别占用1000个代码范围：
//! - 1000-1999: 配置相关错误
//! - 2000-2999: 资源相关错误
//! - 3000-3999: 服务注册相关错误
//! - 4000-4999: 调用相关错误
//! - 5000-5999: 部署相关错误
//! - 6000-6999: 生命周期相关错误

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    ConfigurationError = 1000,
    ResourceError = 2000,
    Conflict = 3000,
    NotFound = 3001,
    InterceptorError = 4000,
    DiscoveryFailed = 5000,
    InvalidState = 6000,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::ConfigurationError),
            2000 => Some(ErrorCode::ResourceError),
            3000 => Some(ErrorCode::Conflict),
            3001 => Some(ErrorCode::NotFound),
            4000 => Some(ErrorCode::InterceptorError),
            5000 => Some(ErrorCode::DiscoveryFailed),
            6000 => Some(ErrorCode::InvalidState),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::ResourceError => "RESOURCE_ERROR",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InterceptorError => "INTERCEPTOR_ERROR",
            ErrorCode::DiscoveryFailed => "DISCOVERY_FAILED",
            ErrorCode::InvalidState => "INVALID_STATE",
        }
    }

    /// 是否为服务器级致命错误（启动失败，服务器不会进入 RUNNING）
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCode::ConfigurationError | ErrorCode::ResourceError)
    }
}
