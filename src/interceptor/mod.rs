//! gRPC 拦截器模块
//!
//! 拦截器包裹在服务处理器外层，可以：
//! - 在转发前检查或改写入站消息
//! - 在内层返回后检查或改写出站消息和响应元数据
//! - 不调用下一层，直接拒绝调用
//! - 包装消息流，逐条观察每一条消息
//!
//! 提供优先级排序的拦截器链组合，以及日志、追踪等内置拦截器

pub mod chain;
pub mod logging;
pub mod tracing;

pub use chain::{ComposedHandler, compose};
pub use logging::LoggingInterceptor;
pub use self::tracing::TracingInterceptor;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tonic::Status;
use tonic::metadata::MetadataMap;

use crate::call::{CallResponse, HandlerRef, ServerCall};

/// 服务端拦截器
#[async_trait]
pub trait ServerInterceptor: Send + Sync + 'static {
    /// 处理一次调用
    ///
    /// 调用 `next.run(call)` 把调用交给内层；返回 `Err` 即中止本次调用。
    async fn intercept(&self, call: ServerCall, next: Next) -> Result<CallResponse, Status>;
}

/// 拦截器链中的下一层
#[derive(Clone)]
pub struct Next {
    inner: HandlerRef,
    // 内层返回错误时置位，用来区分拦截器自己的拒绝和透传的错误
    failed: Arc<AtomicBool>,
}

impl Next {
    pub(crate) fn new(inner: HandlerRef, failed: Arc<AtomicBool>) -> Self {
        Self { inner, failed }
    }

    pub async fn run(self, call: ServerCall) -> Result<CallResponse, Status> {
        let result = self.inner.call(call).await;
        if result.is_err() {
            self.failed.store(true, Ordering::Release);
        }
        result
    }
}

/// 带优先级的拦截器描述
///
/// 优先级数值越小越靠外层：最先看到调用，最后看到响应。
#[derive(Clone)]
pub struct InterceptorDescriptor {
    pub priority: i32,
    pub name: String,
    pub interceptor: Arc<dyn ServerInterceptor>,
}

impl InterceptorDescriptor {
    pub fn new(
        priority: i32,
        name: impl Into<String>,
        interceptor: impl ServerInterceptor,
    ) -> Self {
        Self {
            priority,
            name: name.into(),
            interceptor: Arc::new(interceptor),
        }
    }

    pub fn from_arc(
        priority: i32,
        name: impl Into<String>,
        interceptor: Arc<dyn ServerInterceptor>,
    ) -> Self {
        Self {
            priority,
            name: name.into(),
            interceptor,
        }
    }
}

impl std::fmt::Debug for InterceptorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorDescriptor")
            .field("priority", &self.priority)
            .field("name", &self.name)
            .finish()
    }
}

/// 由闭包实现的拦截器
pub struct InterceptorFn<F> {
    f: F,
}

/// 把异步闭包包装成 `ServerInterceptor`
pub fn interceptor_fn<F, Fut>(f: F) -> InterceptorFn<F>
where
    F: Fn(ServerCall, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallResponse, Status>> + Send + 'static,
{
    InterceptorFn { f }
}

#[async_trait]
impl<F, Fut> ServerInterceptor for InterceptorFn<F>
where
    F: Fn(ServerCall, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallResponse, Status>> + Send + 'static,
{
    async fn intercept(&self, call: ServerCall, next: Next) -> Result<CallResponse, Status> {
        (self.f)(call, next).await
    }
}

/// 追踪信息
#[derive(Debug, Clone)]
pub struct TraceInfo {
    pub trace_id: String,
    pub request_id: String,
}

/// 从调用元数据提取追踪信息
pub fn extract_trace_info(metadata: &MetadataMap) -> Option<TraceInfo> {
    let trace_id = crate::utils::extract_trace_id(metadata).unwrap_or_default();
    let request_id = crate::utils::extract_request_id(metadata).unwrap_or_default();

    if trace_id.is_empty() && request_id.is_empty() {
        return None;
    }

    Some(TraceInfo {
        trace_id,
        request_id,
    })
}
