//! 部署单元描述与发现协作者

use async_trait::async_trait;

use crate::call::HandlerRef;
use crate::error::Result;
use crate::interceptor::InterceptorDescriptor;

/// 发现到的一个服务：处理器，或者发现失败的原因
#[derive(Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub handler: std::result::Result<HandlerRef, String>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, handler: HandlerRef) -> Self {
        Self {
            name: name.into(),
            handler: Ok(handler),
        }
    }

    /// 发现阶段就失败的服务
    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: Err(reason.into()),
        }
    }
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("ServiceDescriptor");
        s.field("name", &self.name);
        match &self.handler {
            Ok(_) => s.field("handler", &"<handler>"),
            Err(reason) => s.field("failure", reason),
        };
        s.finish()
    }
}

/// 部署单元：服务列表加上单元自己贡献的拦截器
#[derive(Debug, Clone)]
pub struct DeploymentUnit {
    pub id: String,
    pub services: Vec<ServiceDescriptor>,
    pub interceptors: Vec<InterceptorDescriptor>,
}

impl DeploymentUnit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            services: Vec::new(),
            interceptors: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
        self
    }

    /// 按发现顺序追加拦截器
    pub fn with_interceptor(mut self, interceptor: InterceptorDescriptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}

/// 服务发现协作者
///
/// 负责在部署单元内定位服务实现和拦截器，绑定器只消费它的结果。
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn discover(&self, unit_id: &str) -> Result<DeploymentUnit>;
}
