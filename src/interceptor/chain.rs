//! 拦截器链组合
//!
//! 按优先级升序（相同优先级保持发现顺序）从右向左折叠，
//! 优先级数值最小的拦截器位于最外层。组合结果只取决于原始处理器和拦截器列表。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tonic::Status;
use tracing::debug;

use super::{InterceptorDescriptor, Next, ServerInterceptor};
use crate::call::{CallResponse, HandlerRef, ServerCall, ServiceHandler};
use crate::error::ServerError;

/// 组合后的处理器
#[derive(Clone)]
pub struct ComposedHandler {
    inner: HandlerRef,
    interceptors: Arc<[String]>,
}

impl ComposedHandler {
    /// 由外到内的拦截器名称
    pub fn interceptor_names(&self) -> &[String] {
        &self.interceptors
    }

    /// 是否为同一个组合实例
    pub fn ptr_eq(&self, other: &ComposedHandler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[async_trait]
impl ServiceHandler for ComposedHandler {
    async fn call(&self, call: ServerCall) -> Result<CallResponse, Status> {
        self.inner.call(call).await
    }
}

impl std::fmt::Debug for ComposedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedHandler")
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

/// 链中的一层：拦截器加上它的内层
struct Intercepted {
    name: String,
    interceptor: Arc<dyn ServerInterceptor>,
    next: HandlerRef,
}

#[async_trait]
impl ServiceHandler for Intercepted {
    async fn call(&self, call: ServerCall) -> Result<CallResponse, Status> {
        let inner_failed = Arc::new(AtomicBool::new(false));
        let next = Next::new(self.next.clone(), inner_failed.clone());
        match self.interceptor.intercept(call, next).await {
            // 内层的错误原样透传，只有拦截器自己产生的错误才归为拦截器错误
            Err(status) if !inner_failed.load(Ordering::Acquire) => {
                debug!(
                    interceptor = %self.name,
                    code = ?status.code(),
                    message = %status.message(),
                    "Interceptor aborted call"
                );
                Err(ServerError::Interceptor(status).into())
            }
            other => other,
        }
    }
}

/// 把拦截器组合到原始处理器外层
pub fn compose(raw: HandlerRef, descriptors: &[InterceptorDescriptor]) -> ComposedHandler {
    let mut ordered: Vec<&InterceptorDescriptor> = descriptors.iter().collect();
    // sort_by_key 是稳定排序，同优先级保持发现顺序
    ordered.sort_by_key(|d| d.priority);

    let inner = ordered.iter().rev().fold(raw, |next, descriptor| {
        Arc::new(Intercepted {
            name: descriptor.name.clone(),
            interceptor: descriptor.interceptor.clone(),
            next,
        }) as HandlerRef
    });

    ComposedHandler {
        inner,
        interceptors: ordered.iter().map(|d| d.name.clone()).collect(),
    }
}
