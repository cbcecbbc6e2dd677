//! 服务处理器注册表
//!
//! 服务名到组合处理器的并发映射。每个入站请求查询一次，
//! 每次部署单元加载或卸载时修改。
//!
//! 重复注册同名服务会被拒绝（`Conflict`），已注册的处理器保持不变；
//! 部署单元只能注销自己注册成功的服务名。

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::interceptor::ComposedHandler;

/// 处理器注册表
///
/// 基于分片的 `DashMap`：不同服务名的注册/注销互不阻塞，
/// 同一服务名上的操作线性化。查询只持有分片读锁并克隆 `Arc`。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, ComposedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同名服务已存在时返回 `Conflict`
    pub fn register(&self, name: impl Into<String>, handler: ComposedHandler) -> Result<()> {
        let name = name.into();
        match self.handlers.entry(name) {
            Entry::Occupied(entry) => {
                warn!(service = %entry.key(), "Service already registered, rejecting");
                Err(ServerError::Conflict(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                info!(
                    service = %entry.key(),
                    interceptors = ?handler.interceptor_names(),
                    "Service registered"
                );
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// 注销处理器，返回被移除的处理器
    ///
    /// 已经分发到该处理器的调用持有自己的引用，不受影响。
    pub fn unregister(&self, name: &str) -> Result<ComposedHandler> {
        match self.handlers.remove(name) {
            Some((name, handler)) => {
                info!(service = %name, "Service unregistered");
                Ok(handler)
            }
            None => {
                warn!(service = %name, "Unregister of unknown service ignored");
                Err(ServerError::NotFound(name.to_string()))
            }
        }
    }

    /// 查询处理器（请求分发热路径）
    pub fn lookup(&self, name: &str) -> Result<ComposedHandler> {
        match self.handlers.get(name) {
            Some(entry) => Ok(entry.value().clone()),
            None => {
                debug!(service = %name, "Lookup of unknown service");
                Err(ServerError::NotFound(name.to_string()))
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 已注册的服务名（排序后）
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// 移除全部处理器，服务器停止时调用
    pub fn clear(&self) {
        self.handlers.clear();
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("services", &self.service_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallResponse, ServerCall, ServiceHandler, handler_fn};
    use crate::interceptor::compose;
    use bytes::Bytes;
    use rand::Rng;
    use tonic::Status;

    /// 返回自身名称的处理器
    fn named(name: &str) -> ComposedHandler {
        let name = Bytes::from(name.to_string());
        compose(
            Arc::new(handler_fn(move |_call: ServerCall| {
                let name = name.clone();
                async move { Ok::<_, Status>(CallResponse::unary(name)) }
            })),
            &[],
        )
    }

    #[test]
    fn register_then_lookup_returns_the_same_handler() {
        let registry = HandlerRegistry::new();
        let handler = named("a.A");
        registry.register("a.A", handler.clone()).unwrap();

        let found = registry.lookup("a.A").unwrap();
        assert!(found.ptr_eq(&handler));
        assert_eq!(registry.service_names(), vec!["a.A".to_string()]);
    }

    #[test]
    fn unregister_then_lookup_is_not_found() {
        let registry = HandlerRegistry::new();
        registry.register("a.A", named("a.A")).unwrap();
        registry.unregister("a.A").unwrap();

        assert!(matches!(registry.lookup("a.A"), Err(ServerError::NotFound(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_twice_is_not_found_without_side_effects() {
        let registry = HandlerRegistry::new();
        registry.register("a.A", named("a.A")).unwrap();
        registry.register("b.B", named("b.B")).unwrap();
        registry.unregister("a.A").unwrap();

        assert!(matches!(registry.unregister("a.A"), Err(ServerError::NotFound(_))));
        assert_eq!(registry.service_names(), vec!["b.B".to_string()]);
    }

    #[test]
    fn duplicate_registration_is_rejected_and_keeps_the_original() {
        let registry = HandlerRegistry::new();
        let original = named("a.A");
        registry.register("a.A", original.clone()).unwrap();

        let err = registry.register("a.A", named("other")).unwrap_err();
        assert!(matches!(err, ServerError::Conflict(ref n) if n == "a.A"));
        assert!(registry.lookup("a.A").unwrap().ptr_eq(&original));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_never_exposes_a_foreign_handler() {
        const UNITS: usize = 8;
        const SERVICES_PER_UNIT: usize = 25;

        let registry = HandlerRegistry::new();
        let mut writers = Vec::new();
        for unit in 0..UNITS {
            let registry = registry.clone();
            writers.push(tokio::spawn(async move {
                for service in 0..SERVICES_PER_UNIT {
                    let name = format!("unit{unit}.Service{service}");
                    registry.register(name.clone(), named(&name)).unwrap();
                    let pause = rand::thread_rng().gen_bool(0.5);
                    let reinstall = rand::thread_rng().gen_bool(0.3);
                    if pause {
                        tokio::task::yield_now().await;
                    }
                    if reinstall {
                        registry.unregister(&name).unwrap();
                        registry.register(name.clone(), named(&name)).unwrap();
                    }
                }
            }));
        }

        let mut readers = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            readers.push(tokio::spawn(async move {
                let mut observed = 0usize;
                for _ in 0..2_000 {
                    let unit = rand::thread_rng().gen_range(0..UNITS);
                    let service = rand::thread_rng().gen_range(0..SERVICES_PER_UNIT);
                    let name = format!("unit{unit}.Service{service}");
                    if let Ok(handler) = registry.lookup(&name) {
                        let reply = handler
                            .call(ServerCall::unary(name.clone(), "Who", Bytes::new()))
                            .await
                            .unwrap()
                            .collect()
                            .await
                            .unwrap();
                        assert_eq!(reply, vec![Bytes::from(name)]);
                        observed += 1;
                    }
                    tokio::task::yield_now().await;
                }
                observed
            }));
        }

        for writer in writers {
            writer.await.unwrap();
        }
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(registry.len(), UNITS * SERVICES_PER_UNIT);
    }
}
