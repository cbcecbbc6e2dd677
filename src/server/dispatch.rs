//! 请求分发
//!
//! 所有进入传输层的 gRPC 请求都落到 `Dispatcher`：
//! 按路径中的服务名查询一次注册表，再把调用交给组合后的处理器。
//! 分发期间记录进行中的调用数，停机时用来等待排空或强制取消。

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tonic::server::{Grpc, StreamingService};
use tower::Service;
use tracing::{debug, warn};

use super::codec::RawCodec;
use crate::call::{MessageStream, ServerCall, ServiceHandler};
use crate::interceptor::ComposedHandler;
use crate::registry::HandlerRegistry;
use crate::utils::split_grpc_path;

const SHUTDOWN_MESSAGE: &str = "server is shutting down";

/// 进行中调用的计数与强制取消
#[derive(Clone, Default)]
pub struct CallTracker {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    force: CancellationToken,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个调用，guard 释放时计数减一
    pub fn enter(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: self.in_flight.clone(),
            idle: self.idle.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 取消全部进行中的调用，客户端收到 CANCELLED
    pub fn cancel_all(&self) {
        self.force.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.force.is_cancelled()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.force.clone()
    }

    /// 等到没有进行中的调用
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // 先注册再检查计数，避免错过最后一次通知
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CallTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallTracker")
            .field("in_flight", &self.in_flight())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// 一个进行中调用的登记
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// 注册表驱动的请求分发器
///
/// 作为 HTTP/2 路由的 fallback 服务挂载，因此不需要预先知道任何服务名。
#[derive(Clone)]
pub struct Dispatcher {
    registry: HandlerRegistry,
    calls: CallTracker,
    max_decoding_message_size: Option<usize>,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, calls: CallTracker) -> Self {
        Self {
            registry,
            calls,
            max_decoding_message_size: None,
        }
    }

    /// 单条入站消息的大小上限
    pub fn max_decoding_message_size(mut self, limit: Option<usize>) -> Self {
        self.max_decoding_message_size = limit;
        self
    }

    async fn dispatch(
        self,
        request: http::Request<axum::body::Body>,
    ) -> http::Response<tonic::body::Body> {
        let path = request.uri().path().to_string();
        let Some((service, method)) = split_grpc_path(&path) else {
            warn!(path = %path, "Malformed gRPC method path");
            return Status::unimplemented(format!("malformed method path '{path}'")).into_http();
        };

        if self.calls.is_cancelled() {
            return Status::unavailable(SHUTDOWN_MESSAGE).into_http();
        }

        let handler = match self.registry.lookup(service) {
            Ok(handler) => handler,
            Err(err) => {
                debug!(service = %service, method = %method, "No handler for call");
                return Status::from(err).into_http();
            }
        };

        debug!(service = %service, method = %method, "Dispatching call");
        let call = DispatchedCall {
            service: service.to_string(),
            method: method.to_string(),
            handler,
            guard: Some(self.calls.enter()),
            calls: self.calls.clone(),
        };

        let mut grpc =
            Grpc::new(RawCodec).apply_max_message_size_config(self.max_decoding_message_size, None);
        grpc.streaming(call, request).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("calls", &self.calls)
            .field("max_decoding_message_size", &self.max_decoding_message_size)
            .finish()
    }
}

impl Service<http::Request<axum::body::Body>> for Dispatcher {
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<axum::body::Body>) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { Ok(dispatcher.dispatch(request).await) })
    }
}

/// 已找到处理器的单次调用
struct DispatchedCall {
    service: String,
    method: String,
    handler: ComposedHandler,
    guard: Option<InFlightGuard>,
    calls: CallTracker,
}

impl StreamingService<Bytes> for DispatchedCall {
    type Response = Bytes;
    type ResponseStream = MessageStream;
    type Future = BoxFuture<'static, Result<tonic::Response<MessageStream>, Status>>;

    fn call(&mut self, request: tonic::Request<tonic::Streaming<Bytes>>) -> Self::Future {
        let guard = self.guard.take().unwrap_or_else(|| self.calls.enter());
        let cancel = self.calls.cancellation();
        let handler = self.handler.clone();
        let service = std::mem::take(&mut self.service);
        let method = std::mem::take(&mut self.method);

        Box::pin(async move {
            let (metadata, _extensions, messages) = request.into_parts();
            let call = ServerCall::new(service, method, metadata, Box::pin(messages));

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Status::cancelled(SHUTDOWN_MESSAGE)),
                response = handler.call(call) => response?,
            };

            let (metadata, messages) = response.into_parts();
            // guard 跟随响应流，流结束或被丢弃时调用才算完成
            let messages = stream::unfold(Some((messages, guard, cancel)), |state| async move {
                let (mut messages, guard, cancel) = state?;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        Some((Err(Status::cancelled(SHUTDOWN_MESSAGE)), None))
                    }
                    item = messages.next() => {
                        item.map(|item| (item, Some((messages, guard, cancel))))
                    }
                }
            });

            let mut response = tonic::Response::new(Box::pin(messages) as MessageStream);
            *response.metadata_mut() = metadata;
            Ok(response)
        })
    }
}
