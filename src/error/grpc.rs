//! gRPC 错误处理
//!
//! 提供 `ServerError` 到 `tonic::Status` 的转换

use super::{ErrorCode, ServerError};
use tonic::{Code, Status};

impl From<ServerError> for Status {
    fn from(err: ServerError) -> Self {
        let code = err.code();
        match err {
            // 拦截器给出的状态码和消息原样返回，只补充 error-code
            ServerError::Interceptor(mut status) => {
                if !status.metadata().contains_key("error-code") {
                    if let Ok(value) = code.as_str().parse() {
                        status.metadata_mut().insert("error-code", value);
                    }
                }
                status
            }
            other => status_with_code(map_error_code_to_grpc(code), other.to_string(), code),
        }
    }
}

/// 创建带 `error-code` 元数据的 `Status`
pub fn status_with_code(grpc_code: Code, message: impl Into<String>, code: ErrorCode) -> Status {
    let mut status = Status::new(grpc_code, message);
    if let Ok(value) = code.as_str().parse() {
        status.metadata_mut().insert("error-code", value);
    }
    status
}

/// 将错误代码映射到 gRPC 状态码
fn map_error_code_to_grpc(code: ErrorCode) -> Code {
    match code {
        ErrorCode::ConfigurationError => Code::InvalidArgument,
        // 未注册的服务对调用方表现为"服务不可用"
        ErrorCode::ResourceError | ErrorCode::NotFound => Code::Unavailable,
        ErrorCode::Conflict => Code::AlreadyExists,
        ErrorCode::InterceptorError => Code::Aborted,
        ErrorCode::DiscoveryFailed => Code::Internal,
        ErrorCode::InvalidState => Code::FailedPrecondition,
    }
}
