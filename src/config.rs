//! 服务器配置
//!
//! `ServerOptions` 是外部配置源给出的原始配置项，每一项要么已定义要么未定义；
//! `ServerConfiguration` 是校验后的不可变配置，未定义的可选项保持 `None`，
//! 表示"使用传输层默认值"，绝不会被替换成 0。

use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: i64 = 9555;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: i64 = 3;

/// HTTP/2 流控窗口上限 (2^31-1)
pub const MAX_FLOW_CONTROL_WINDOW: u32 = 2_147_483_647;

/// 秒为单位的配置项上限（一年），更大的值会让传输层的计时器溢出
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// 可识别的配置项名称
pub const OPTION_NAMES: &[&str] = &[
    "host",
    "port",
    "flow-control-window",
    "handshake-timeout",
    "initial-flow-control-window",
    "keep-alive-time",
    "keep-alive-timeout",
    "max-concurrent-calls-per-connection",
    "max-connection-age",
    "max-connection-age-grace",
    "max-connection-idle",
    "max-inbound-message-size",
    "max-inbound-metadata-size",
    "permit-keep-alive-time",
    "permit-keep-alive-without-calls",
    "protocol-provider",
    "session-cache-size",
    "session-timeout",
    "shutdown-timeout",
    "start-tls",
    "tls-context-reference",
];

/// 原始配置项
///
/// 数值项使用有符号类型承载，以便在解析阶段报告负值。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServerOptions {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: i64,
    #[serde(default)]
    pub flow_control_window: Option<i64>,
    #[serde(default)]
    pub handshake_timeout: Option<i64>,
    #[serde(default)]
    pub initial_flow_control_window: Option<i64>,
    #[serde(default)]
    pub keep_alive_time: Option<i64>,
    #[serde(default)]
    pub keep_alive_timeout: Option<i64>,
    #[serde(default)]
    pub max_concurrent_calls_per_connection: Option<i64>,
    #[serde(default)]
    pub max_connection_age: Option<i64>,
    #[serde(default)]
    pub max_connection_age_grace: Option<i64>,
    #[serde(default)]
    pub max_connection_idle: Option<i64>,
    #[serde(default)]
    pub max_inbound_message_size: Option<i64>,
    #[serde(default)]
    pub max_inbound_metadata_size: Option<i64>,
    #[serde(default)]
    pub permit_keep_alive_time: Option<i64>,
    #[serde(default)]
    pub permit_keep_alive_without_calls: bool,
    #[serde(default)]
    pub protocol_provider: Option<String>,
    #[serde(default)]
    pub session_cache_size: Option<i64>,
    #[serde(default)]
    pub session_timeout: Option<i64>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: i64,
    #[serde(default)]
    pub start_tls: bool,
    #[serde(default)]
    pub tls_context_reference: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> i64 {
    DEFAULT_PORT
}

fn default_shutdown_timeout() -> i64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            flow_control_window: None,
            handshake_timeout: None,
            initial_flow_control_window: None,
            keep_alive_time: None,
            keep_alive_timeout: None,
            max_concurrent_calls_per_connection: None,
            max_connection_age: None,
            max_connection_age_grace: None,
            max_connection_idle: None,
            max_inbound_message_size: None,
            max_inbound_metadata_size: None,
            permit_keep_alive_time: None,
            permit_keep_alive_without_calls: false,
            protocol_provider: None,
            session_cache_size: None,
            session_timeout: None,
            shutdown_timeout: default_shutdown_timeout(),
            start_tls: false,
            tls_context_reference: None,
        }
    }
}

impl ServerOptions {
    /// 创建指定地址的配置，其余项使用默认值
    pub fn new(host: impl Into<String>, port: i64) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 配置项是否已定义
    ///
    /// 带默认值的必填项始终视为已定义；未识别的名称返回 `false`。
    pub fn is_defined(&self, name: &str) -> bool {
        match name {
            "host" | "port" | "permit-keep-alive-without-calls" | "shutdown-timeout"
            | "start-tls" => true,
            "flow-control-window" => self.flow_control_window.is_some(),
            "handshake-timeout" => self.handshake_timeout.is_some(),
            "initial-flow-control-window" => self.initial_flow_control_window.is_some(),
            "keep-alive-time" => self.keep_alive_time.is_some(),
            "keep-alive-timeout" => self.keep_alive_timeout.is_some(),
            "max-concurrent-calls-per-connection" => {
                self.max_concurrent_calls_per_connection.is_some()
            }
            "max-connection-age" => self.max_connection_age.is_some(),
            "max-connection-age-grace" => self.max_connection_age_grace.is_some(),
            "max-connection-idle" => self.max_connection_idle.is_some(),
            "max-inbound-message-size" => self.max_inbound_message_size.is_some(),
            "max-inbound-metadata-size" => self.max_inbound_metadata_size.is_some(),
            "permit-keep-alive-time" => self.permit_keep_alive_time.is_some(),
            "protocol-provider" => self.protocol_provider.is_some(),
            "session-cache-size" => self.session_cache_size.is_some(),
            "session-timeout" => self.session_timeout.is_some(),
            "tls-context-reference" => self.tls_context_reference.is_some(),
            _ => false,
        }
    }
}

/// 校验后的服务器配置
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfiguration {
    pub host: String,
    pub port: u16,
    pub flow_control_window: Option<u32>,
    pub handshake_timeout: Option<Duration>,
    pub initial_flow_control_window: Option<u32>,
    pub keep_alive_time: Option<Duration>,
    pub keep_alive_timeout: Option<Duration>,
    pub max_concurrent_calls_per_connection: Option<u32>,
    pub max_connection_age: Option<Duration>,
    pub max_connection_age_grace: Option<Duration>,
    pub max_connection_idle: Option<Duration>,
    pub max_inbound_message_size: Option<u32>,
    pub max_inbound_metadata_size: Option<u32>,
    pub permit_keep_alive_time: Option<Duration>,
    pub permit_keep_alive_without_calls: bool,
    pub protocol_provider: Option<String>,
    pub session_cache_size: Option<u64>,
    pub session_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub start_tls: bool,
    pub tls_context_reference: Option<String>,
}

impl ServerConfiguration {
    /// 校验并转换原始配置项
    pub fn resolve(options: &ServerOptions) -> Result<Self> {
        let host = options.host.trim();
        if host.is_empty() {
            return Err(ServerError::configuration("option 'host' must not be empty"));
        }
        let port = u16::try_from(options.port).map_err(|_| {
            ServerError::configuration(format!(
                "option 'port' must be within 0..=65535, got {}",
                options.port
            ))
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
            flow_control_window: to_window("flow-control-window", options.flow_control_window)?,
            handshake_timeout: to_seconds("handshake-timeout", options.handshake_timeout)?,
            initial_flow_control_window: to_window(
                "initial-flow-control-window",
                options.initial_flow_control_window,
            )?,
            keep_alive_time: to_seconds("keep-alive-time", options.keep_alive_time)?,
            keep_alive_timeout: to_seconds("keep-alive-timeout", options.keep_alive_timeout)?,
            max_concurrent_calls_per_connection: to_u32(
                "max-concurrent-calls-per-connection",
                options.max_concurrent_calls_per_connection,
            )?,
            max_connection_age: to_seconds("max-connection-age", options.max_connection_age)?,
            max_connection_age_grace: to_seconds(
                "max-connection-age-grace",
                options.max_connection_age_grace,
            )?,
            max_connection_idle: to_seconds("max-connection-idle", options.max_connection_idle)?,
            max_inbound_message_size: to_u32(
                "max-inbound-message-size",
                options.max_inbound_message_size,
            )?,
            max_inbound_metadata_size: to_u32(
                "max-inbound-metadata-size",
                options.max_inbound_metadata_size,
            )?,
            permit_keep_alive_time: to_seconds(
                "permit-keep-alive-time",
                options.permit_keep_alive_time,
            )?,
            permit_keep_alive_without_calls: options.permit_keep_alive_without_calls,
            protocol_provider: non_blank("protocol-provider", &options.protocol_provider)?,
            session_cache_size: to_u64("session-cache-size", options.session_cache_size)?,
            session_timeout: to_seconds("session-timeout", options.session_timeout)?,
            shutdown_timeout: to_seconds("shutdown-timeout", Some(options.shutdown_timeout))?
                .unwrap_or_default(),
            start_tls: options.start_tls,
            tls_context_reference: non_blank(
                "tls-context-reference",
                &options.tls_context_reference,
            )?,
        })
    }
}

fn to_u64(name: &str, value: Option<i64>) -> Result<Option<u64>> {
    value
        .map(|v| {
            u64::try_from(v).map_err(|_| {
                ServerError::configuration(format!("option '{name}' must be non-negative, got {v}"))
            })
        })
        .transpose()
}

fn to_u32(name: &str, value: Option<i64>) -> Result<Option<u32>> {
    value
        .map(|v| {
            u32::try_from(v).map_err(|_| {
                ServerError::configuration(format!(
                    "option '{name}' must be within 0..={}, got {v}",
                    u32::MAX
                ))
            })
        })
        .transpose()
}

fn to_window(name: &str, value: Option<i64>) -> Result<Option<u32>> {
    match to_u32(name, value)? {
        Some(v) if v > MAX_FLOW_CONTROL_WINDOW => Err(ServerError::configuration(format!(
            "option '{name}' must be within 0..={MAX_FLOW_CONTROL_WINDOW}, got {v}"
        ))),
        other => Ok(other),
    }
}

fn to_seconds(name: &str, value: Option<i64>) -> Result<Option<Duration>> {
    match to_u64(name, value)? {
        Some(v) if v > MAX_DURATION_SECS => Err(ServerError::configuration(format!(
            "option '{name}' must be within 0..={MAX_DURATION_SECS} seconds, got {v}"
        ))),
        other => Ok(other.map(Duration::from_secs)),
    }
}

fn non_blank(name: &str, value: &Option<String>) -> Result<Option<String>> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ServerError::configuration(format!(
            "option '{name}' must not be blank when defined"
        ))),
        Some(v) => Ok(Some(v.trim().to_string())),
        None => Ok(None),
    }
}
