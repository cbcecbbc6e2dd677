use async_trait::async_trait;
use tonic::Status;
use tracing::{Instrument, info_span};

use super::{Next, ServerInterceptor, extract_trace_info};
use crate::call::{CallResponse, ServerCall};

/// 追踪拦截器
///
/// 读取 `x-trace-id` / `x-request-id` 元数据，缺少 `x-request-id` 时生成一个，
/// 并在 span 内执行内层调用。
pub struct TracingInterceptor;

impl TracingInterceptor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerInterceptor for TracingInterceptor {
    async fn intercept(&self, mut call: ServerCall, next: Next) -> Result<CallResponse, Status> {
        let (trace_id, request_id) = match extract_trace_info(call.metadata()) {
            Some(info) if !info.request_id.is_empty() => (info.trace_id, info.request_id),
            other => {
                let request_id = uuid::Uuid::new_v4().to_string();
                if let Ok(value) = request_id.parse() {
                    call.metadata_mut().insert("x-request-id", value);
                }
                (other.map(|info| info.trace_id).unwrap_or_default(), request_id)
            }
        };

        let span = info_span!(
            "grpc_call",
            service = %call.service(),
            method = %call.method(),
            trace_id = %trace_id,
            request_id = %request_id,
        );
        next.run(call).instrument(span).await
    }
}
