use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::state::ServerState;
use crate::config::{ServerConfiguration, ServerOptions};
use crate::deployment::DeploymentBinder;
use crate::error::{Result, ServerError};
use crate::interceptor::InterceptorDescriptor;
use crate::registry::HandlerRegistry;
use crate::server::{
    CallTracker, Dispatcher, Listener, TlsContextProvider, TransportBuilder, TransportSettings,
};

/// 强制取消后等待传输关闭的时间，超时则直接中止服务任务
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);
/// 就绪检查的总等待时间
const READY_TIMEOUT: Duration = Duration::from_secs(10);
const READY_RETRY_INTERVAL: Duration = Duration::from_millis(20);

struct Serving {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

#[derive(Default)]
struct Transport {
    listener: Option<Listener>,
    serving: Option<Serving>,
}

/// gRPC 服务器运行时
pub struct GrpcServerRuntime {
    configuration: ServerConfiguration,
    settings: TransportSettings,
    local_addr: SocketAddr,
    registry: HandlerRegistry,
    calls: CallTracker,
    state: watch::Sender<ServerState>,
    binder: DeploymentBinder,
    // 同时串行化 start / shutdown
    transport: Mutex<Transport>,
}

impl GrpcServerRuntime {
    /// 解析配置并绑定监听地址，服务器处于 `Created`，尚不接受连接
    pub async fn build(
        options: &ServerOptions,
        tls_provider: Option<Arc<dyn TlsContextProvider>>,
    ) -> Result<Self> {
        let configuration = ServerConfiguration::resolve(options)?;

        let mut builder = TransportBuilder::new(configuration.clone());
        if let Some(provider) = tls_provider {
            builder = builder.with_tls_provider(provider);
        }
        let listener = builder.build().await?;

        let registry = HandlerRegistry::new();
        let (state, state_rx) = watch::channel(ServerState::Created);
        let binder = DeploymentBinder::new(registry.clone(), state_rx);

        Ok(Self {
            settings: listener.settings().clone(),
            local_addr: listener.local_addr(),
            configuration,
            registry,
            calls: CallTracker::new(),
            state,
            binder,
            transport: Mutex::new(Transport {
                listener: Some(listener),
                serving: None,
            }),
        })
    }

    /// 添加作用于所有部署单元的全局拦截器
    pub fn with_global_interceptor(mut self, descriptor: InterceptorDescriptor) -> Self {
        self.binder = self.binder.clone().with_global_interceptor(descriptor);
        self
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn configuration(&self) -> &ServerConfiguration {
        &self.configuration
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// 共享注册表和服务器状态的部署绑定器
    pub fn binder(&self) -> DeploymentBinder {
        self.binder.clone()
    }

    /// 已分发但尚未结束的调用数
    pub fn in_flight_calls(&self) -> usize {
        self.calls.in_flight()
    }

    fn transition(&self, next: ServerState) {
        let previous = self.state.send_replace(next);
        if !previous.can_transition_to(next) {
            warn!(from = %previous, to = %next, "Unexpected server state transition");
        }
        info!(from = %previous, to = %next, "Server state changed");
    }

    /// 开始接受连接：`Created -> Starting -> Running`
    pub async fn start(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        let state = self.state();
        if state != ServerState::Created {
            return Err(ServerError::lifecycle(format!(
                "server can only be started once, current state is {state}"
            )));
        }
        let listener = transport
            .listener
            .take()
            .ok_or_else(|| ServerError::lifecycle("listener is no longer available"))?;

        self.transition(ServerState::Starting);
        let dispatcher = Dispatcher::new(self.registry.clone(), self.calls.clone())
            .max_decoding_message_size(self.settings.max_decoding_message_size);
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(listener.serve(dispatcher, async move {
            let _ = stop_rx.await;
        }));
        transport.serving = Some(Serving { stop, task });
        self.transition(ServerState::Running);

        info!(address = %self.local_addr, "✅ gRPC server started");
        Ok(())
    }

    /// 等到服务器处于 `Running` 且监听地址可以建立 TCP 连接
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.wait_until_ready_within(READY_TIMEOUT).await
    }

    async fn wait_until_ready_within(&self, limit: Duration) -> Result<()> {
        // 未启动时内核仍会完成握手，所以先看状态
        let state = self.state();
        if state != ServerState::Running {
            return Err(ServerError::lifecycle(format!(
                "server is {state}, not accepting calls"
            )));
        }

        let address = self.local_addr;
        let mut attempts = 0u32;
        let ready = timeout(limit, async {
            loop {
                attempts += 1;
                match TcpStream::connect(address).await {
                    Ok(_) => return,
                    Err(e) => {
                        debug!(%address, attempts, error = %e, "Server not accepting connections yet");
                        sleep(READY_RETRY_INTERVAL).await;
                    }
                }
            }
        })
        .await;

        match ready {
            Ok(()) => {
                debug!(%address, attempts, "Server is ready");
                Ok(())
            }
            Err(_) => Err(ServerError::lifecycle(format!(
                "server at {address} not ready after {limit:?} ({attempts} attempts)"
            ))),
        }
    }

    /// 使用配置的 `shutdown-timeout` 停机
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(self.configuration.shutdown_timeout)
            .await
    }

    /// 停机：停止接受新连接，最多等待 `drain` 让进行中的调用结束，
    /// 之后强制取消剩余调用。重复调用直接返回。
    pub async fn shutdown_with_timeout(&self, drain: Duration) -> Result<()> {
        let mut transport = self.transport.lock().await;
        if self.state() == ServerState::Stopped {
            debug!("Shutdown requested on a stopped server");
            return Ok(());
        }

        self.transition(ServerState::Stopping);
        let result = match transport.serving.take() {
            Some(serving) => self.drain(serving, drain).await,
            None => {
                // 从未启动，只需释放套接字
                transport.listener.take();
                Ok(())
            }
        };

        self.calls.cancel_all();
        // 先发布 Stopped 再清空：之后完成注册的 bind 会在最终检查时回滚
        self.transition(ServerState::Stopped);
        self.registry.clear();
        info!(address = %self.local_addr, "gRPC server stopped");
        result
    }

    async fn drain(&self, serving: Serving, drain: Duration) -> Result<()> {
        let Serving { stop, mut task } = serving;
        let _ = stop.send(());
        info!(
            in_flight = self.calls.in_flight(),
            timeout = ?drain,
            "Stopped accepting connections, draining in-flight calls"
        );

        let drained = timeout(drain, async {
            self.calls.wait_idle().await;
            (&mut task).await
        })
        .await;

        let joined = match drained {
            Ok(joined) => {
                info!("All in-flight calls completed");
                joined
            }
            Err(_) => {
                warn!(
                    in_flight = self.calls.in_flight(),
                    "⚠️ Drain timeout elapsed, cancelling in-flight calls"
                );
                self.calls.cancel_all();
                match timeout(FORCE_CLOSE_GRACE, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!("Transport did not close after cancellation, aborting");
                        task.abort();
                        return Ok(());
                    }
                }
            }
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(ServerError::lifecycle(format!("transport task failed: {e}"))),
        }
    }

    /// 启动后等待 Ctrl+C，然后停机
    pub async fn run_until_signal(&self) -> Result<()> {
        self.start().await?;
        info!(address = %self.local_addr, "Press Ctrl+C to stop");

        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received (Ctrl+C)"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        self.shutdown().await
    }
}

impl Drop for GrpcServerRuntime {
    fn drop(&mut self) {
        if let Some(serving) = self.transport.get_mut().serving.take() {
            serving.task.abort();
        }
    }
}

impl std::fmt::Debug for GrpcServerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcServerRuntime")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .field("registry", &self.registry)
            .field("in_flight", &self.in_flight_calls())
            .finish_non_exhaustive()
    }
}
