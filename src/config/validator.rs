use anyhow::{bail, Result};
use tracing::warn;

use super::{AppConfig, ProxyConfig, TunnelOptions};

/// 单次调用超时的上限（10 分钟）
const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证超时值
    pub fn validate_timeout(ms: u64, context: &str) -> Result<()> {
        if ms == 0 {
            bail!("{}: timeout cannot be 0", context);
        }
        if ms > MAX_TIMEOUT_MS {
            bail!(
                "{}: timeout {} ms exceeds the maximum of {} ms",
                context,
                ms,
                MAX_TIMEOUT_MS
            );
        }
        Ok(())
    }

    /// 验证大小限制
    pub fn validate_size(size: usize, min: usize, context: &str) -> Result<()> {
        if size < min {
            bail!("{}: must be at least {} bytes (got {})", context, min, size);
        }
        Ok(())
    }

    /// 验证隧道参数
    pub fn validate_tunnel_options(options: &TunnelOptions) -> Result<()> {
        Self::validate_timeout(options.connect_timeout_ms, "connect_timeout_ms")?;
        Self::validate_timeout(options.request_timeout_ms, "request_timeout_ms")?;

        if options.connect_timeout_ms > options.request_timeout_ms {
            warn!(
                "connect_timeout_ms ({}) is larger than request_timeout_ms ({}); the request timeout wins",
                options.connect_timeout_ms, options.request_timeout_ms
            );
        }

        Self::validate_size(options.max_header_size, 1024, "max_header_size")?;
        Self::validate_size(options.max_response_size, 1, "max_response_size")?;

        if options.tls.skip_verify && options.tls.ca_cert_path.is_some() {
            bail!("tls.skip_verify and tls.ca_cert_path cannot be combined");
        }

        Ok(())
    }

    /// 验证显式代理 URL
    ///
    /// 运行时解析失败会静默回退到默认代理，这里在加载配置文件时提前报出来
    pub fn validate_proxy_url(url: &str) -> Result<()> {
        if let Err(e) = ProxyConfig::parse(url) {
            bail!("proxy.url: {}", e);
        }
        Ok(())
    }

    /// 验证完整配置
    pub fn validate_app_config(config: &AppConfig) -> Result<()> {
        if let Some(ref url) = config.proxy.url {
            Self::validate_proxy_url(url)?;
        }
        Self::validate_tunnel_options(&config.tunnel)
    }
}
