//! gRPC 传输层
//!
//! 把解析后的 `ServerConfiguration` 映射到 tonic 的 HTTP/2 服务器构建器，
//! 绑定监听套接字，并以注册表驱动的 fallback 服务提供请求分发。
//!
//! 只设置已定义的选项，其余保持 tonic 默认值；
//! tonic 没有对应项的选项会被记录为“已忽略”并打印警告。

pub mod codec;
pub mod dispatch;
pub mod tls;

pub use codec::RawCodec;
pub use dispatch::{CallTracker, Dispatcher, InFlightGuard};
pub use tls::{PemTlsContextProvider, TlsContext, TlsContextProvider};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::Routes;
use tonic::transport::Server;
use tracing::{debug, info, warn};

use crate::config::ServerConfiguration;
use crate::error::{Result, ServerError};

/// 实际作用到传输层的设置，供启动后回读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub host: String,
    pub port: u16,
    pub initial_connection_window_size: Option<u32>,
    pub initial_stream_window_size: Option<u32>,
    pub http2_keepalive_interval: Option<Duration>,
    pub http2_keepalive_timeout: Option<Duration>,
    pub max_concurrent_streams: Option<u32>,
    pub max_connection_age: Option<Duration>,
    pub max_header_list_size: Option<u32>,
    pub max_decoding_message_size: Option<usize>,
    pub tls_context: Option<String>,
    /// 已定义但传输层不支持的选项
    pub ignored: Vec<&'static str>,
}

impl TransportSettings {
    pub fn from_configuration(config: &ServerConfiguration) -> Self {
        let mut ignored = Vec::new();
        let mut ignore = |name: &'static str, defined: bool| {
            if defined {
                ignored.push(name);
            }
        };
        ignore("handshake-timeout", config.handshake_timeout.is_some());
        ignore(
            "max-connection-age-grace",
            config.max_connection_age_grace.is_some(),
        );
        ignore("max-connection-idle", config.max_connection_idle.is_some());
        ignore(
            "permit-keep-alive-time",
            config.permit_keep_alive_time.is_some(),
        );
        ignore(
            "permit-keep-alive-without-calls",
            config.permit_keep_alive_without_calls,
        );
        ignore("protocol-provider", config.protocol_provider.is_some());
        ignore("session-cache-size", config.session_cache_size.is_some());
        ignore("session-timeout", config.session_timeout.is_some());
        ignore("start-tls", config.start_tls);

        Self {
            host: config.host.clone(),
            port: config.port,
            initial_connection_window_size: config.flow_control_window,
            initial_stream_window_size: config.initial_flow_control_window,
            http2_keepalive_interval: config.keep_alive_time,
            http2_keepalive_timeout: config.keep_alive_timeout,
            max_concurrent_streams: config.max_concurrent_calls_per_connection,
            max_connection_age: config.max_connection_age,
            max_header_list_size: config.max_inbound_metadata_size,
            max_decoding_message_size: config.max_inbound_message_size.map(|v| v as usize),
            tls_context: config.tls_context_reference.clone(),
            ignored,
        }
    }

    /// 构建 tonic 服务器，只设置已定义的选项
    pub fn server_builder(&self, tls: Option<&TlsContext>) -> Result<Server> {
        let mut server = Server::builder();

        if let Some(size) = self.initial_connection_window_size {
            server = server.initial_connection_window_size(size);
        }
        if let Some(size) = self.initial_stream_window_size {
            server = server.initial_stream_window_size(size);
        }
        if let Some(interval) = self.http2_keepalive_interval {
            server = server.http2_keepalive_interval(Some(interval));
        }
        if let Some(timeout) = self.http2_keepalive_timeout {
            server = server.http2_keepalive_timeout(timeout.into());
        }
        if let Some(max) = self.max_concurrent_streams {
            server = server.max_concurrent_streams(max);
        }
        if let Some(age) = self.max_connection_age {
            server = server.max_connection_age(age);
        }
        if let Some(size) = self.max_header_list_size {
            server = server.http2_max_header_list_size(size);
        }
        if let Some(tls) = tls {
            server = server.tls_config(tls.server_config()).map_err(|e| {
                ServerError::configuration(format!("TLS context '{}': {e}", tls.name()))
            })?;
        }

        Ok(server)
    }
}

/// 传输层构建器
pub struct TransportBuilder {
    config: ServerConfiguration,
    tls_provider: Option<Arc<dyn TlsContextProvider>>,
}

impl TransportBuilder {
    pub fn new(config: ServerConfiguration) -> Self {
        Self {
            config,
            tls_provider: None,
        }
    }

    pub fn with_tls_provider(mut self, provider: Arc<dyn TlsContextProvider>) -> Self {
        self.tls_provider = Some(provider);
        self
    }

    pub fn settings(&self) -> TransportSettings {
        TransportSettings::from_configuration(&self.config)
    }

    /// 解析 TLS、构建服务器并绑定监听地址
    ///
    /// 地址无法解析或 TLS 上下文不可用时返回 `Configuration`，
    /// 端口被占用等绑定失败返回 `Resource`。
    pub async fn build(self) -> Result<Listener> {
        let settings = self.settings();
        for option in &settings.ignored {
            warn!(option = %option, "Transport option is not supported, ignored");
        }

        let tls = match &settings.tls_context {
            Some(name) => {
                let provider = self.tls_provider.as_ref().ok_or_else(|| {
                    ServerError::configuration(format!(
                        "tls-context-reference '{name}' is set but no TLS context provider is configured"
                    ))
                })?;
                Some(provider.resolve(name)?)
            }
            None => None,
        };
        let server = settings.server_builder(tls.as_ref())?;

        let addr = resolve_address(&settings.host, settings.port).await?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Resource { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Resource { addr, source })?;

        info!(
            address = %local_addr,
            tls = tls.is_some(),
            "Transport bound"
        );

        Ok(Listener {
            listener,
            local_addr,
            settings,
            tls: tls.map(|t| t.name().to_string()),
            server,
        })
    }
}

async fn resolve_address(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        ServerError::configuration(format!("cannot resolve host '{host}': {e}"))
    })?;
    addrs
        .next()
        .ok_or_else(|| ServerError::configuration(format!("host '{host}' has no addresses")))
}

/// 已绑定但尚未开始服务的传输
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    settings: TransportSettings,
    tls: Option<String>,
    server: Server,
}

impl Listener {
    /// 实际绑定的地址（端口为 0 时由系统分配）
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn tls_context(&self) -> Option<&str> {
        self.tls.as_deref()
    }

    /// 开始服务，直到 `signal` 完成后优雅退出
    ///
    /// `signal` 完成后不再接受新连接，已有连接上的调用继续进行。
    pub async fn serve<F>(self, dispatcher: Dispatcher, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Listener {
            listener,
            local_addr,
            mut server,
            ..
        } = self;

        let routes = Routes::from(axum::Router::new().fallback_service(dispatcher));
        debug!(address = %local_addr, "Serving");
        server
            .add_routes(routes)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .map_err(|e| ServerError::lifecycle(format!("transport on {local_addr} failed: {e}")))
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("settings", &self.settings)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}
