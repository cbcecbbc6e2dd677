//! Flare gRPC Host Library
//!
//! Hosts one long-lived gRPC server whose set of services changes at runtime:
//! deployment units are bound and unbound while the server keeps accepting
//! connections, and every incoming call is dispatched through a shared,
//! concurrently mutated handler registry.

pub mod call;
pub mod config;
pub mod deployment;
pub mod error;
pub mod interceptor;
pub mod registry;
pub mod server;
pub mod utils;

// 服务器生命周期
pub mod runtime;

// Re-exports
pub use call::{CallResponse, HandlerRef, MessageStream, ServerCall, ServiceHandler, handler_fn};
pub use config::{ServerConfiguration, ServerOptions};
pub use deployment::{
    BindReport, DeploymentBinder, DeploymentUnit, ServiceDescriptor, ServiceDiscovery,
    ServiceOutcome, UnitState,
};
pub use error::{ErrorCode, Result, ServerError};
pub use interceptor::{
    ComposedHandler, InterceptorDescriptor, LoggingInterceptor, Next, ServerInterceptor,
    TracingInterceptor, compose, interceptor_fn,
};
pub use registry::HandlerRegistry;
pub use server::{
    Listener, PemTlsContextProvider, RawCodec, TlsContext, TlsContextProvider, TransportBuilder,
    TransportSettings,
};
pub use utils::init_tracing;

pub use runtime::{GrpcServerRuntime, ServerState};
