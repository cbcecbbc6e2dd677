//! 服务器生命周期管理
//!
//! 一个 `GrpcServerRuntime` 对应一个长期运行的 gRPC 服务器：
//! 构建一次、启动一次，停机时先停止接受新连接，在超时内排空进行中的调用，
//! 超时后强制取消剩余调用并释放传输资源。
//!
//! 服务集合不在启动时固定，部署单元通过 `binder()` 在运行期间加载、卸载。
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use flare_grpc_host::config::ServerOptions;
//! use flare_grpc_host::deployment::{DeploymentUnit, ServiceDescriptor};
//! use flare_grpc_host::runtime::GrpcServerRuntime;
//!
//! let runtime = GrpcServerRuntime::build(&ServerOptions::new("0.0.0.0", 9555), None).await?;
//! runtime.start().await?;
//!
//! runtime.binder().bind(
//!     DeploymentUnit::new("greeter.war")
//!         .with_service(ServiceDescriptor::new("helloworld.Greeter", greeter)),
//! )?;
//!
//! runtime.shutdown().await?;
//! ```

mod lifecycle;
mod state;

pub use lifecycle::GrpcServerRuntime;
pub use state::ServerState;
