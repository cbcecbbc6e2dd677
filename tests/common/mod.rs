#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flare_grpc_host::{
    CallResponse, GrpcServerRuntime, HandlerRef, RawCodec, ServerCall, ServerOptions, handler_fn,
};
use http::uri::PathAndQuery;
use prost::Message;
use tonic::Status;
use tonic::transport::Channel;

#[derive(Clone, PartialEq, prost::Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HelloReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SleepRequest {
    #[prost(uint64, tag = "1")]
    pub millis: u64,
}

pub type Client = tonic::client::Grpc<Channel>;

pub fn local_options() -> ServerOptions {
    ServerOptions::new("127.0.0.1", 0)
}

pub async fn started(options: ServerOptions) -> GrpcServerRuntime {
    flare_grpc_host::init_tracing("flare_grpc_host=debug");
    let runtime = GrpcServerRuntime::build(&options, None).await.unwrap();
    runtime.start().await.unwrap();
    runtime.wait_until_ready().await.unwrap();
    runtime
}

pub async fn connect(addr: SocketAddr) -> Client {
    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    tonic::client::Grpc::new(channel)
}

/// 以 prost 消息发起一元调用
pub async fn unary<Req, Resp>(client: &mut Client, path: &str, request: Req) -> Result<Resp, Status>
where
    Req: Message,
    Resp: Message + Default,
{
    client
        .ready()
        .await
        .map_err(|e| Status::unavailable(e.to_string()))?;
    let path: PathAndQuery = path.parse().unwrap();
    let response = client
        .unary(
            tonic::Request::new(Bytes::from(request.encode_to_vec())),
            path,
            RawCodec,
        )
        .await?;
    Resp::decode(response.into_inner()).map_err(|e| Status::internal(e.to_string()))
}

/// 回复 "Hello {name}" 的 Greeter
pub fn greeter(observed: Arc<std::sync::Mutex<Vec<String>>>) -> HandlerRef {
    Arc::new(handler_fn(move |call: ServerCall| {
        let observed = observed.clone();
        async move {
            let request = HelloRequest::decode(call.into_single_message().await?)
                .map_err(|e| Status::invalid_argument(e.to_string()))?;
            observed.lock().unwrap().push(request.name.clone());
            let reply = HelloReply {
                message: format!("Hello {}", request.name),
            };
            Ok::<_, Status>(CallResponse::unary(Bytes::from(reply.encode_to_vec())))
        }
    }))
}

/// 按请求休眠指定毫秒后返回空消息
pub fn sleeper() -> HandlerRef {
    Arc::new(handler_fn(|call: ServerCall| async move {
        let request = SleepRequest::decode(call.into_single_message().await?)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        tokio::time::sleep(Duration::from_millis(request.millis)).await;
        Ok::<_, Status>(CallResponse::unary(Bytes::new()))
    }))
}

/// 轮询直到进行中的调用数达到 `expected`
pub async fn wait_for_in_flight(runtime: &GrpcServerRuntime, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while runtime.in_flight_calls() < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
