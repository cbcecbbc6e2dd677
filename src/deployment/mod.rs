//! 部署单元绑定
//!
//! 部署单元是可以独立加载、卸载的一组服务和拦截器。
//! 单元启动时 `bind` 为每个服务组合拦截器链并注册到注册表，
//! 单元停止时 `unbind` 注销该单元注册过的全部服务名。
//!
//! 单个服务的发现或注册失败不影响同一单元的其他服务；
//! 只有预期至少一个服务、却一个都没注册成功时，单元启动才算失败。

mod unit;

pub use unit::{DeploymentUnit, ServiceDescriptor, ServiceDiscovery};

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Result, ServerError};
use crate::interceptor::{InterceptorDescriptor, compose};
use crate::registry::HandlerRegistry;
use crate::runtime::ServerState;

/// 部署单元状态
///
/// `Unbound -> Binding -> Bound -> Unbinding -> Unbound`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Unbound,
    Binding,
    Bound,
    Unbinding,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitState::Unbound => "UNBOUND",
            UnitState::Binding => "BINDING",
            UnitState::Bound => "BOUND",
            UnitState::Unbinding => "UNBINDING",
        })
    }
}

/// 单个服务的绑定结果
#[derive(Debug)]
pub enum ServiceOutcome {
    Registered,
    Failed(ServerError),
}

/// 一次 `bind` 的逐服务报告
#[derive(Debug)]
pub struct BindReport {
    pub unit_id: String,
    pub outcomes: Vec<(String, ServiceOutcome)>,
}

impl BindReport {
    /// 注册成功的服务名
    pub fn registered(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ServiceOutcome::Registered))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// 失败的服务及原因
    pub fn failed(&self) -> Vec<(&str, &ServerError)> {
        self.outcomes
            .iter()
            .filter_map(|(name, o)| match o {
                ServiceOutcome::Failed(e) => Some((name.as_str(), e)),
                ServiceOutcome::Registered => None,
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed().is_empty()
    }
}

struct UnitRecord {
    state: UnitState,
    registered: Vec<String>,
    aborted: bool,
}

/// 部署单元绑定器
///
/// 可克隆，克隆体共享注册表、服务器状态和单元表。
#[derive(Clone)]
pub struct DeploymentBinder {
    registry: HandlerRegistry,
    server_state: watch::Receiver<ServerState>,
    global_interceptors: Arc<[InterceptorDescriptor]>,
    units: Arc<DashMap<String, UnitRecord>>,
}

impl DeploymentBinder {
    pub fn new(registry: HandlerRegistry, server_state: watch::Receiver<ServerState>) -> Self {
        Self {
            registry,
            server_state,
            global_interceptors: Arc::from(Vec::new()),
            units: Arc::new(DashMap::new()),
        }
    }

    /// 添加全局拦截器，作用于之后绑定的每个服务
    pub fn with_global_interceptor(mut self, descriptor: InterceptorDescriptor) -> Self {
        let mut interceptors = self.global_interceptors.to_vec();
        interceptors.push(descriptor);
        self.global_interceptors = Arc::from(interceptors);
        self
    }

    pub fn global_interceptors(&self) -> &[InterceptorDescriptor] {
        &self.global_interceptors
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// 部署单元当前状态，未知单元为 `Unbound`
    pub fn unit_state(&self, unit_id: &str) -> UnitState {
        self.units
            .get(unit_id)
            .map(|record| record.state)
            .unwrap_or(UnitState::Unbound)
    }

    /// 绑定部署单元
    ///
    /// 拦截器链 = 全局拦截器 + 单元拦截器，按优先级排序；
    /// 同优先级时全局拦截器在前。
    pub fn bind(&self, unit: DeploymentUnit) -> Result<BindReport> {
        self.bind_with(unit, |_| {})
    }

    /// `on_registered` 在每个服务注册成功后调用
    fn bind_with(
        &self,
        unit: DeploymentUnit,
        mut on_registered: impl FnMut(&str),
    ) -> Result<BindReport> {
        let DeploymentUnit {
            id,
            services,
            interceptors,
        } = unit;

        match self.units.entry(id.clone()) {
            Entry::Occupied(entry) => {
                return Err(ServerError::lifecycle(format!(
                    "deployment unit '{id}' is already {}",
                    entry.get().state
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(UnitRecord {
                    state: UnitState::Binding,
                    registered: Vec::new(),
                    aborted: false,
                });
            }
        }
        info!(unit = %id, services = services.len(), "Binding deployment unit");

        let chain: Vec<InterceptorDescriptor> = self
            .global_interceptors
            .iter()
            .chain(interceptors.iter())
            .cloned()
            .collect();

        let expected = services.len();
        let mut registered = Vec::new();
        let mut outcomes = Vec::with_capacity(expected);

        for service in services {
            if let Some(reason) = self.abort_reason(&id) {
                return Err(self.roll_back(&id, &registered, reason));
            }

            let name = service.name;
            let outcome = match service.handler {
                Err(reason) => {
                    warn!(unit = %id, service = %name, reason = %reason, "Service discovery failed");
                    ServiceOutcome::Failed(ServerError::discovery(name.clone(), reason))
                }
                Ok(handler) => match self.registry.register(name.clone(), compose(handler, &chain)) {
                    Ok(()) => {
                        registered.push(name.clone());
                        on_registered(&name);
                        ServiceOutcome::Registered
                    }
                    Err(e) => {
                        warn!(unit = %id, service = %name, error = %e, "Service registration failed");
                        ServiceOutcome::Failed(e)
                    }
                },
            };
            outcomes.push((name, outcome));
        }

        if expected > 0 && registered.is_empty() {
            self.units.remove(&id);
            warn!(unit = %id, expected, "Deployment unit registered no services");
            return Err(ServerError::lifecycle(format!(
                "deployment unit '{id}' registered none of its {expected} services"
            )));
        }

        // 检查与状态切换在同一把分片锁下完成，和 `abort` 线性化
        let abort = match self.units.get_mut(&id) {
            Some(mut record) if !record.aborted && self.server_accepts_registrations() => {
                record.state = UnitState::Bound;
                record.registered = registered.clone();
                None
            }
            Some(record) if record.aborted => Some("deployment unit aborted".to_string()),
            _ => Some(format!("server is {}", self.server_state())),
        };
        if let Some(reason) = abort {
            return Err(self.roll_back(&id, &registered, reason));
        }

        let report = BindReport {
            unit_id: id,
            outcomes,
        };
        info!(
            unit = %report.unit_id,
            registered = ?report.registered(),
            failed = report.outcomes.len() - report.registered().len(),
            "Deployment unit bound"
        );
        Ok(report)
    }

    /// 通过发现协作者获取部署单元后绑定
    pub async fn bind_discovered(
        &self,
        discovery: &dyn ServiceDiscovery,
        unit_id: &str,
    ) -> Result<BindReport> {
        let unit = discovery.discover(unit_id).await?;
        self.bind(unit)
    }

    /// 解绑部署单元，返回实际注销的服务名
    ///
    /// 无论服务器处于什么状态都会执行。单元仍在 `Binding` 时标记为中止，
    /// 由正在进行的 `bind` 回滚并返回空列表。
    pub fn unbind(&self, unit_id: &str) -> Result<Vec<String>> {
        let names = match self.units.get_mut(unit_id) {
            None => {
                return Err(ServerError::lifecycle(format!(
                    "deployment unit '{unit_id}' is not bound"
                )));
            }
            Some(mut record) => match record.state {
                UnitState::Binding => {
                    record.aborted = true;
                    info!(unit = %unit_id, "Deployment unit stopped while binding, aborting");
                    return Ok(Vec::new());
                }
                UnitState::Bound => {
                    record.state = UnitState::Unbinding;
                    std::mem::take(&mut record.registered)
                }
                state => {
                    return Err(ServerError::lifecycle(format!(
                        "deployment unit '{unit_id}' is already {state}"
                    )));
                }
            },
        };

        let mut unregistered = Vec::with_capacity(names.len());
        for name in names {
            // 服务器停止时注册表已清空，NotFound 只记录不中断
            if self.registry.unregister(&name).is_ok() {
                unregistered.push(name);
            }
        }
        self.units.remove(unit_id);

        info!(unit = %unit_id, services = ?unregistered, "Deployment unit unbound");
        Ok(unregistered)
    }

    /// 中止正在绑定的单元，单元不在 `Binding` 时返回 `false`
    pub fn abort(&self, unit_id: &str) -> bool {
        match self.units.get_mut(unit_id) {
            Some(mut record) if record.state == UnitState::Binding => {
                record.aborted = true;
                true
            }
            _ => false,
        }
    }

    fn server_state(&self) -> ServerState {
        *self.server_state.borrow()
    }

    fn server_accepts_registrations(&self) -> bool {
        self.server_state().accepts_registrations()
    }

    fn abort_reason(&self, unit_id: &str) -> Option<String> {
        if !self.server_accepts_registrations() {
            return Some(format!("server is {}", self.server_state()));
        }
        match self.units.get(unit_id) {
            Some(record) if record.aborted => Some("deployment unit aborted".to_string()),
            _ => None,
        }
    }

    fn roll_back(&self, unit_id: &str, registered: &[String], reason: String) -> ServerError {
        warn!(unit = %unit_id, reason = %reason, rolled_back = ?registered, "Binding aborted, rolling back");
        for name in registered {
            let _ = self.registry.unregister(name);
        }
        self.units.remove(unit_id);
        ServerError::lifecycle(format!("binding of deployment unit '{unit_id}' aborted: {reason}"))
    }
}

impl fmt::Debug for DeploymentBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units: Vec<(String, UnitState)> = self
            .units
            .iter()
            .map(|e| (e.key().clone(), e.value().state))
            .collect();
        f.debug_struct("DeploymentBinder")
            .field("registry", &self.registry)
            .field("global_interceptors", &self.global_interceptors)
            .field("units", &units)
            .finish()
    }
}
