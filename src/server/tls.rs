//! TLS 上下文
//!
//! 配置里只出现 TLS 上下文的名称，证书材料由 `TlsContextProvider` 提供。

use std::collections::HashMap;
use std::path::PathBuf;

use tonic::transport::{Identity, ServerTlsConfig};
use tracing::debug;

use crate::error::{Result, ServerError};

/// 已解析的 TLS 上下文
#[derive(Clone)]
pub struct TlsContext {
    name: String,
    config: ServerTlsConfig,
}

impl TlsContext {
    pub fn new(name: impl Into<String>, config: ServerTlsConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// 由 PEM 编码的证书链和私钥创建
    pub fn from_pem(
        name: impl Into<String>,
        cert: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
    ) -> Self {
        let identity = Identity::from_pem(cert, key);
        Self::new(name, ServerTlsConfig::new().identity(identity))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_config(&self) -> ServerTlsConfig {
        self.config.clone()
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// 按名称提供 TLS 上下文
pub trait TlsContextProvider: Send + Sync {
    fn resolve(&self, name: &str) -> Result<TlsContext>;
}

/// 从 PEM 文件加载 TLS 上下文
#[derive(Debug, Clone, Default)]
pub struct PemTlsContextProvider {
    contexts: HashMap<String, (PathBuf, PathBuf)>,
}

impl PemTlsContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(
        mut self,
        name: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.contexts
            .insert(name.into(), (cert_path.into(), key_path.into()));
        self
    }
}

impl TlsContextProvider for PemTlsContextProvider {
    fn resolve(&self, name: &str) -> Result<TlsContext> {
        let (cert_path, key_path) = self.contexts.get(name).ok_or_else(|| {
            ServerError::configuration(format!("unknown TLS context '{name}'"))
        })?;

        let read = |path: &PathBuf| {
            std::fs::read(path).map_err(|e| {
                ServerError::configuration(format!(
                    "TLS context '{name}': cannot read {}: {e}",
                    path.display()
                ))
            })
        };
        let cert = read(cert_path)?;
        let key = read(key_path)?;

        debug!(tls_context = %name, cert = %cert_path.display(), "TLS context loaded");
        Ok(TlsContext::from_pem(name, cert, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_context_is_a_configuration_error() {
        let provider = PemTlsContextProvider::new();
        let err = provider.resolve("missing").unwrap_err();
        assert!(matches!(err, ServerError::Configuration(_)));
    }

    #[test]
    fn unreadable_pem_files_are_configuration_errors() {
        let provider = PemTlsContextProvider::new().with_context(
            "server",
            "/nonexistent/server.crt",
            "/nonexistent/server.key",
        );
        let err = provider.resolve("server").unwrap_err();
        assert!(matches!(err, ServerError::Configuration(ref m) if m.contains("server.crt")));
    }
}
