use std::time::Instant;

use async_trait::async_trait;
use tonic::Status;
use tracing::{info, warn};

use super::{Next, ServerInterceptor};
use crate::call::{CallResponse, ServerCall};

/// 日志拦截器
///
/// 记录每次调用的方法、结果和耗时。耗时统计到处理器返回响应为止，
/// 流式响应的后续消息不计入。
pub struct LoggingInterceptor;

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerInterceptor for LoggingInterceptor {
    async fn intercept(&self, call: ServerCall, next: Next) -> Result<CallResponse, Status> {
        let start = Instant::now();
        let method = call.path();
        info!(method = %method, "gRPC request");

        let result = next.run(call).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(method = %method, elapsed_ms, "gRPC request handled"),
            Err(status) => warn!(
                method = %method,
                code = ?status.code(),
                message = %status.message(),
                elapsed_ms,
                "gRPC request failed"
            ),
        }
        result
    }
}
