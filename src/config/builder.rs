use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use super::{validator::ConfigValidator, TunnelOptions};

/// TunnelOptions Builder
#[derive(Debug, Default)]
pub struct TunnelOptionsBuilder {
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    max_header_size: Option<usize>,
    max_response_size: Option<usize>,
    ca_cert_path: Option<PathBuf>,
    skip_verify: bool,
}

impl TunnelOptionsBuilder {
    /// 创建新的 Builder
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置连接代理超时
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// 设置单次调用总超时
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// 设置响应头大小限制
    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = Some(size);
        self
    }

    /// 设置响应体大小限制
    pub fn max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = Some(size);
        self
    }

    /// 设置额外信任的 CA 证书
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// 设置是否跳过证书验证（仅用于测试）
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.skip_verify = skip;
        self
    }

    /// 构建配置
    pub fn build(self) -> Result<TunnelOptions> {
        let mut options = TunnelOptions::default();

        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(timeout) = self.request_timeout {
            options.request_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(size) = self.max_header_size {
            options.max_header_size = size;
        }
        if let Some(size) = self.max_response_size {
            options.max_response_size = size;
        }
        options.tls.ca_cert_path = self.ca_cert_path;
        options.tls.skip_verify = self.skip_verify;

        ConfigValidator::validate_tunnel_options(&options)
            .context("Tunnel options validation failed")?;

        Ok(options)
    }
}
