//! 调用抽象
//!
//! 传输层已经完成 gRPC 帧解码，这里的消息都是未解释的字节；
//! 处理器和拦截器按需用自己的编解码器（例如 prost）解释它们。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use tonic::Status;
use tonic::metadata::MetadataMap;

/// 单次调用内的有序消息流
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Bytes, Status>> + Send + 'static>>;

/// 服务端收到的一次调用
pub struct ServerCall {
    service: String,
    method: String,
    metadata: MetadataMap,
    messages: MessageStream,
}

impl ServerCall {
    pub fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        metadata: MetadataMap,
        messages: MessageStream,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            metadata,
            messages,
        }
    }

    /// 创建只携带一条请求消息的调用
    pub fn unary(service: impl Into<String>, method: impl Into<String>, message: Bytes) -> Self {
        Self::new(
            service,
            method,
            MetadataMap::new(),
            Box::pin(stream::once(async move { Ok::<_, Status>(message) })),
        )
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// `/package.Service/Method` 形式的完整路径
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// 逐条变换入站消息，保持顺序且不做缓冲
    pub fn map_messages<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(Bytes) -> Result<Bytes, Status> + Send + 'static,
    {
        self.messages = Box::pin(self.messages.map(move |item| item.and_then(&mut f)));
        self
    }

    /// 替换整个入站消息流
    pub fn with_messages(mut self, messages: MessageStream) -> Self {
        self.messages = messages;
        self
    }

    pub fn into_messages(self) -> MessageStream {
        self.messages
    }

    /// 读取唯一的一条请求消息（一元调用）
    pub async fn into_single_message(self) -> Result<Bytes, Status> {
        let mut messages = self.messages;
        match messages.next().await {
            Some(message) => message,
            None => Err(Status::invalid_argument("missing request message")),
        }
    }
}

impl std::fmt::Debug for ServerCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCall")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// 处理器返回的响应：响应头元数据和出站消息流
pub struct CallResponse {
    metadata: MetadataMap,
    messages: MessageStream,
}

impl CallResponse {
    pub fn new(messages: MessageStream) -> Self {
        Self {
            metadata: MetadataMap::new(),
            messages,
        }
    }

    /// 只包含一条响应消息
    pub fn unary(message: Bytes) -> Self {
        Self::new(Box::pin(stream::once(async move { Ok::<_, Status>(message) })))
    }

    pub fn from_messages(messages: Vec<Bytes>) -> Self {
        Self::new(Box::pin(stream::iter(messages.into_iter().map(Ok::<Bytes, Status>))))
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// 逐条变换出站消息
    pub fn map_messages<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(Bytes) -> Result<Bytes, Status> + Send + 'static,
    {
        self.messages = Box::pin(self.messages.map(move |item| item.and_then(&mut f)));
        self
    }

    pub fn with_messages(mut self, messages: MessageStream) -> Self {
        self.messages = messages;
        self
    }

    pub fn into_parts(self) -> (MetadataMap, MessageStream) {
        (self.metadata, self.messages)
    }

    /// 收集全部出站消息，测试和一元调用常用
    pub async fn collect(self) -> Result<Vec<Bytes>, Status> {
        self.messages
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }
}

impl std::fmt::Debug for CallResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallResponse")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// 服务处理器
///
/// 一个服务的所有方法都由同一个处理器实现，按 `ServerCall::method` 分发。
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    async fn call(&self, call: ServerCall) -> Result<CallResponse, Status>;
}

/// 共享的处理器引用
pub type HandlerRef = Arc<dyn ServiceHandler>;

/// 由闭包实现的处理器
pub struct HandlerFn<F> {
    f: F,
}

/// 把异步闭包包装成 `ServiceHandler`
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(ServerCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallResponse, Status>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> ServiceHandler for HandlerFn<F>
where
    F: Fn(ServerCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallResponse, Status>> + Send + 'static,
{
    async fn call(&self, call: ServerCall) -> Result<CallResponse, Status> {
        (self.f)(call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn map_messages_preserves_order() {
        let call = ServerCall::new(
            "test.Echo",
            "Stream",
            MetadataMap::new(),
            Box::pin(stream::iter(
                ["a", "b", "c"].into_iter().map(|s| Ok::<_, Status>(Bytes::from(s))),
            )),
        )
        .map_messages(|m| Ok(Bytes::from([&b"<"[..], &m[..]].concat())));

        let messages: Vec<_> = call.into_messages().collect().await;
        let messages: Vec<Bytes> = messages.into_iter().map(|m| m.unwrap()).collect();
        assert_eq!(messages, vec!["<a", "<b", "<c"]);
    }

    #[tokio::test]
    async fn single_message_requires_a_message() {
        let call = ServerCall::new(
            "test.Echo",
            "Say",
            MetadataMap::new(),
            Box::pin(stream::empty::<Result<Bytes, Status>>()),
        );
        let err = call.into_single_message().await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn handler_fn_echoes() {
        let handler = handler_fn(|call: ServerCall| async move {
            let message = call.into_single_message().await?;
            Ok::<_, Status>(CallResponse::unary(message))
        });
        let response = handler
            .call(ServerCall::unary("test.Echo", "Say", Bytes::from_static(b"hi")))
            .await
            .unwrap();
        assert_eq!(response.collect().await.unwrap(), vec![Bytes::from_static(b"hi")]);
    }

    #[test]
    fn path_is_grpc_style() {
        let call = ServerCall::unary("helloworld.Greeter", "SayHello", Bytes::new());
        assert_eq!(call.path(), "/helloworld.Greeter/SayHello");
    }
}
