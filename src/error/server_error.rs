//! gRPC 宿主统一错误类型

use super::code::ErrorCode;
use std::net::SocketAddr;
use thiserror::Error;
use tonic::Status;

/// 宿主错误类型
///
/// `Configuration` / `Resource` 对服务器启动是致命的；
/// `Conflict` / `NotFound` / `Discovery` 只影响单个服务；
/// `Interceptor` 只影响单次调用。
#[derive(Error, Debug)]
pub enum ServerError {
    /// 配置项格式错误或超出范围
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 套接字绑定等资源错误
    #[error("failed to bind {addr}: {source}")]
    Resource {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// 服务名已被注册
    #[error("service '{0}' is already registered")]
    Conflict(String),

    /// 服务名不存在
    #[error("service '{0}' is not registered")]
    NotFound(String),

    /// 拦截器中止了调用
    #[error("interceptor aborted call: {0}")]
    Interceptor(Status),

    /// 单个服务的发现失败
    #[error("discovery of service '{service}' failed: {reason}")]
    Discovery { service: String, reason: String },

    /// 在当前生命周期状态下不允许的操作
    #[error("invalid state: {0}")]
    Lifecycle(String),
}

impl ServerError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        ServerError::Configuration(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        ServerError::Lifecycle(msg.into())
    }

    pub fn discovery(service: impl Into<String>, reason: impl Into<String>) -> Self {
        ServerError::Discovery {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::Configuration(_) => ErrorCode::ConfigurationError,
            ServerError::Resource { .. } => ErrorCode::ResourceError,
            ServerError::Conflict(_) => ErrorCode::Conflict,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::Interceptor(_) => ErrorCode::InterceptorError,
            ServerError::Discovery { .. } => ErrorCode::DiscoveryFailed,
            ServerError::Lifecycle(_) => ErrorCode::InvalidState,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.code().is_fatal()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;
