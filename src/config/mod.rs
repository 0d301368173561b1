// 配置管理模块 - 使用模块化设计

mod builder;
mod proxy;
mod validator;

pub use builder::TunnelOptionsBuilder;
pub use proxy::{
    primary_env_var, ProxyConfig, ProxyConfigResolver, ProxySource, DEFAULT_PROXY_HOST,
    DEFAULT_PROXY_PASSWORD, DEFAULT_PROXY_PORT, DEFAULT_PROXY_URL, DEFAULT_PROXY_USERNAME,
};
pub use validator::ConfigValidator;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CONNECT_TUNNEL_";

/// 连接代理超时（毫秒）- 可通过环境变量 CONNECT_TUNNEL_CONNECT_TIMEOUT_MS 覆盖
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
/// 单次调用总超时（毫秒）- 可通过环境变量 CONNECT_TUNNEL_REQUEST_TIMEOUT_MS 覆盖
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
/// 响应头（含 CONNECT 响应）最大大小
pub const MAX_HEADER_SIZE: usize = 64 * 1024;
/// 响应体最大大小 - 可通过环境变量 CONNECT_TUNNEL_MAX_RESPONSE_SIZE 覆盖
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .and_then(|v| v.trim().parse().ok())
}

/// 隧道调用参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelOptions {
    /// 连接代理的超时（毫秒）
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// 整个调用的超时（毫秒）
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// 响应头最大字节数
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    /// 响应体最大字节数
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
    /// TLS 参数
    #[serde(default)]
    pub tls: TlsOptions,
}

fn default_connect_timeout_ms() -> u64 {
    CONNECT_TIMEOUT_MS
}

fn default_request_timeout_ms() -> u64 {
    REQUEST_TIMEOUT_MS
}

fn default_max_header_size() -> usize {
    MAX_HEADER_SIZE
}

fn default_max_response_size() -> usize {
    MAX_RESPONSE_SIZE
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            max_header_size: MAX_HEADER_SIZE,
            max_response_size: MAX_RESPONSE_SIZE,
            tls: TlsOptions::default(),
        }
    }
}

impl TunnelOptions {
    /// 创建 Builder
    pub fn builder() -> TunnelOptionsBuilder {
        TunnelOptionsBuilder::new()
    }

    /// 应用 CONNECT_TUNNEL_* 环境变量覆盖
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ms) = env_override("CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_override("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = ms;
        }
        if let Some(size) = env_override("MAX_RESPONSE_SIZE") {
            self.max_response_size = size;
        }
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// 验证配置
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_tunnel_options(self)
    }
}

/// TLS 参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// 额外信任的 CA 证书路径（PEM）；未设置时使用系统证书
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// 是否跳过证书验证（仅用于测试）
    #[serde(default)]
    pub skip_verify: bool,
}

/// 配置文件中的代理段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySection {
    /// 显式代理 URL，优先级高于环境变量
    #[serde(default)]
    pub url: Option<String>,
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub tunnel: TunnelOptions,
}

impl AppConfig {
    /// 从 TOML 字符串解析配置
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Failed to parse configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path))?;
        Self::from_toml(&content)
    }

    /// 验证配置
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_app_config(self)
    }

    /// 代理解析器：配置文件中的 URL 排在环境变量之前
    pub fn proxy_resolver(&self) -> ProxyConfigResolver {
        ProxyConfigResolver::from_env().with_explicit("config proxy.url", self.proxy.url.clone())
    }
}
