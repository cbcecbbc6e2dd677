//! 错误处理模块
//!
//! 统一的错误类型、错误代码以及到 gRPC `Status` 的转换

pub mod code;
pub mod grpc;
pub mod server_error;

pub use code::ErrorCode;
pub use grpc::status_with_code;
pub use server_error::{Result, ServerError};
