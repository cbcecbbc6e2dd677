mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use common::{HelloReply, HelloRequest, connect, greeter, local_options, started, unary};
use flare_grpc_host::{
    CallResponse, DeploymentUnit, InterceptorDescriptor, LoggingInterceptor, Next, RawCodec,
    ServerCall, ServiceDescriptor, TracingInterceptor, handler_fn, interceptor_fn,
};
use futures::StreamExt;
use prost::Message;
use tonic::{Code, Status};

const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";

fn bang_prefix() -> InterceptorDescriptor {
    InterceptorDescriptor::new(
        10,
        "bang-prefix",
        interceptor_fn(|call: ServerCall, next: Next| async move {
            let call = call.map_messages(|message| {
                let mut request = HelloRequest::decode(message)
                    .map_err(|e| Status::invalid_argument(e.to_string()))?;
                request.name = format!("!!{}", request.name);
                Ok(Bytes::from(request.encode_to_vec()))
            });
            next.run(call).await
        }),
    )
}

#[tokio::test]
async fn greeter_sees_the_interceptor_rewrite() {
    let runtime = started(local_options()).await;
    let observed = Arc::new(Mutex::new(Vec::new()));

    let report = runtime
        .binder()
        .with_global_interceptor(InterceptorDescriptor::new(0, "logging", LoggingInterceptor::new()))
        .bind(
            DeploymentUnit::new("greeter.war")
                .with_interceptor(bang_prefix())
                .with_service(ServiceDescriptor::new("helloworld.Greeter", greeter(observed.clone()))),
        )
        .unwrap();
    assert!(report.is_complete());

    let mut client = connect(runtime.local_addr()).await;
    let reply: HelloReply = unary(
        &mut client,
        SAY_HELLO,
        HelloRequest {
            name: "World".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(*observed.lock().unwrap(), vec!["!!World".to_string()]);
    assert_eq!(reply.message, "Hello !!World");

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_service_is_unavailable_with_an_error_code() {
    let runtime = started(local_options()).await;
    let mut client = connect(runtime.local_addr()).await;

    let status = unary::<_, HelloReply>(
        &mut client,
        "/missing.Service/Call",
        HelloRequest::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(
        status.metadata().get("error-code").and_then(|v| v.to_str().ok()),
        Some("NOT_FOUND")
    );

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_discovery_leaves_the_sibling_reachable() {
    let runtime = started(local_options()).await;
    let observed = Arc::new(Mutex::new(Vec::new()));

    let report = runtime
        .binder()
        .bind(
            DeploymentUnit::new("partial.war")
                .with_service(ServiceDescriptor::failed("broken.Service", "no such class"))
                .with_service(ServiceDescriptor::new("helloworld.Greeter", greeter(observed))),
        )
        .unwrap();
    assert_eq!(report.registered(), vec!["helloworld.Greeter"]);

    let mut client = connect(runtime.local_addr()).await;
    let reply: HelloReply = unary(
        &mut client,
        SAY_HELLO,
        HelloRequest {
            name: "there".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(reply.message, "Hello there");

    let status = unary::<_, HelloReply>(&mut client, "/broken.Service/Call", HelloRequest::default())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn interceptor_rejection_reaches_the_client() {
    let runtime = started(local_options()).await;
    let deny = interceptor_fn(|call: ServerCall, next: Next| async move {
        if call.metadata().get("authorization").is_none() {
            return Err(Status::unauthenticated("missing credentials"));
        }
        next.run(call).await
    });
    runtime
        .binder()
        .bind(
            DeploymentUnit::new("secured.war")
                .with_interceptor(InterceptorDescriptor::new(1, "auth", deny))
                .with_service(ServiceDescriptor::new(
                    "helloworld.Greeter",
                    greeter(Arc::default()),
                )),
        )
        .unwrap();

    let mut client = connect(runtime.local_addr()).await;
    let status = unary::<_, HelloReply>(&mut client, SAY_HELLO, HelloRequest::default())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "missing credentials");
    assert_eq!(
        status.metadata().get("error-code").and_then(|v| v.to_str().ok()),
        Some("INTERCEPTOR_ERROR")
    );

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn streaming_messages_keep_their_order_through_the_chain() {
    let runtime = started(local_options()).await;
    let tag = interceptor_fn(|call: ServerCall, next: Next| async move {
        let call = call.map_messages(|m| Ok(Bytes::from([&b"in:"[..], &m[..]].concat())));
        let response = next.run(call).await?;
        Ok::<_, Status>(response.map_messages(|m| Ok(Bytes::from([&m[..], &b":out"[..]].concat()))))
    });
    let echo = handler_fn(|call: ServerCall| async move {
        Ok::<_, Status>(CallResponse::new(call.into_messages()))
    });
    runtime
        .binder()
        .with_global_interceptor(InterceptorDescriptor::new(0, "tracing", TracingInterceptor::new()))
        .bind(
            DeploymentUnit::new("stream.war")
                .with_interceptor(InterceptorDescriptor::new(5, "tag", tag))
                .with_service(ServiceDescriptor::new("test.Stream", Arc::new(echo))),
        )
        .unwrap();

    let mut client = connect(runtime.local_addr()).await;
    client.ready().await.unwrap();
    let outbound = futures::stream::iter((0..100).map(|i| Bytes::from(i.to_string())));
    let response = client
        .streaming(
            tonic::Request::new(outbound),
            "/test.Stream/Echo".parse().unwrap(),
            RawCodec,
        )
        .await
        .unwrap();

    let received: Vec<Bytes> = response
        .into_inner()
        .map(|m| m.unwrap())
        .collect()
        .await;
    let expected: Vec<Bytes> = (0..100)
        .map(|i| Bytes::from(format!("in:{i}:out")))
        .collect();
    assert_eq!(received, expected);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn transport_settings_are_readable_after_start() {
    let mut options = local_options();
    options.keep_alive_time = Some(30);
    options.max_concurrent_calls_per_connection = Some(64);
    options.max_inbound_message_size = Some(1024);
    options.session_timeout = Some(60);
    let runtime = started(options).await;

    let settings = runtime.settings();
    assert_eq!(settings.http2_keepalive_interval, Some(Duration::from_secs(30)));
    assert_eq!(settings.max_concurrent_streams, Some(64));
    assert_eq!(settings.max_decoding_message_size, Some(1024));
    assert_eq!(settings.initial_connection_window_size, None);
    assert_eq!(settings.http2_keepalive_timeout, None);
    assert_eq!(settings.ignored, vec!["session-timeout"]);

    runtime
        .binder()
        .bind(
            DeploymentUnit::new("greeter.war").with_service(ServiceDescriptor::new(
                "helloworld.Greeter",
                greeter(Arc::default()),
            )),
        )
        .unwrap();
    let mut client = connect(runtime.local_addr()).await;

    // 超过入站消息上限的请求被传输层拒绝
    let status = unary::<_, HelloReply>(
        &mut client,
        SAY_HELLO,
        HelloRequest {
            name: "x".repeat(4096),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::OutOfRange);

    let reply: HelloReply = unary(
        &mut client,
        SAY_HELLO,
        HelloRequest {
            name: "small".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(reply.message, "Hello small");

    runtime.shutdown().await.unwrap();
}
