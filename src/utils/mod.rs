//! 工具函数模块

use std::sync::Once;

use tonic::metadata::MetadataMap;

fn metadata_str(metadata: &MetadataMap, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// 提取追踪ID
pub fn extract_trace_id(metadata: &MetadataMap) -> Option<String> {
    metadata_str(metadata, "x-trace-id")
}

/// 提取请求ID
pub fn extract_request_id(metadata: &MetadataMap) -> Option<String> {
    metadata_str(metadata, "x-request-id")
}

/// 把 `/package.Service/Method` 拆分成服务名和方法名
pub fn split_grpc_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('/')?;
    let (service, method) = rest.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}

static TRACING_INIT: Once = Once::new();

/// 初始化 tracing 订阅器
///
/// 优先使用 `RUST_LOG`，否则使用 `default_directive`。重复调用无副作用。
pub fn init_tracing(default_directive: &str) {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
