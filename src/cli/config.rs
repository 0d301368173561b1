use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::AppConfig;

/// 检查配置文件权限（仅Unix系统）
#[cfg(unix)]
pub fn check_config_file_permissions(config_path: &str) -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tracing::warn;

    let metadata = fs::metadata(config_path)
        .with_context(|| format!("Failed to read metadata for config file: {}", config_path))?;
    let mode = metadata.permissions().mode();

    // 代理 URL 中可能带有凭据
    if mode & 0o044 != 0 {
        warn!(
            "Config file '{}' is readable by group or others (permissions: {:o}), \
             it may contain proxy credentials. RECOMMENDATION: chmod 600 {}",
            config_path,
            mode & 0o777,
            config_path
        );
    }

    Ok(())
}

/// Windows系统不进行权限检查
#[cfg(not(unix))]
pub fn check_config_file_permissions(_config_path: &str) -> Result<()> {
    Ok(())
}

#[derive(Serialize)]
struct CheckResult {
    valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    details: serde_json::Value,
}

/// Expand path with tilde (~) and make it absolute
pub fn expand_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path);
    let path_buf = PathBuf::from(expanded.as_ref());

    if path_buf.is_absolute() {
        Ok(expanded.into_owned())
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&path_buf)
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))
    }
}

/// 收集配置中值得提示的问题
fn collect_warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.proxy.url.is_none() {
        warnings.push(
            "No [proxy] url configured, environment variables or the built-in default will be used"
                .to_string(),
        );
    }

    if let Some(ref ca_path) = config.tunnel.tls.ca_cert_path {
        if !ca_path.exists() {
            warnings.push(format!("CA certificate file not found: {:?}", ca_path));
        }
    }

    if config.tunnel.tls.skip_verify {
        warnings.push("TLS certificate verification is disabled".to_string());
    }

    warnings
}

/// 检查配置文件
pub fn check_config(config_path: &str, format: &str) -> Result<()> {
    match AppConfig::load(config_path) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            let proxy = config.proxy_resolver().resolve_with_source();
            let tunnel = &config.tunnel;

            if format == "json" {
                let result = CheckResult {
                    valid: true,
                    warnings,
                    error: None,
                    details: serde_json::json!({
                        "proxy": proxy.0.to_string(),
                        "proxy_source": proxy.1,
                        "connect_timeout_ms": tunnel.connect_timeout_ms,
                        "request_timeout_ms": tunnel.request_timeout_ms,
                        "max_header_size": tunnel.max_header_size,
                        "max_response_size": tunnel.max_response_size,
                        "ca_cert_path": tunnel.tls.ca_cert_path,
                        "skip_verify": tunnel.tls.skip_verify,
                    }),
                };
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("✓ Proxy: {} (from {})", proxy.0, proxy.1);
                println!("✓ Connect timeout: {} ms", tunnel.connect_timeout_ms);
                println!("✓ Request timeout: {} ms", tunnel.request_timeout_ms);
                println!("✓ Max header size: {} bytes", tunnel.max_header_size);
                println!("✓ Max response size: {} bytes", tunnel.max_response_size);
                match tunnel.tls.ca_cert_path {
                    Some(ref ca_path) => println!("✓ CA certificate path: {:?}", ca_path),
                    None => println!("✓ CA certificates: system roots"),
                }
                for warning in &warnings {
                    println!("⚠ Warning: {}", warning);
                }
                println!("\n✓ Configuration is valid!");
            }
            Ok(())
        }
        Err(e) => {
            if format == "json" {
                let result = CheckResult {
                    valid: false,
                    warnings: vec![],
                    error: Some(format!("{:#}", e)),
                    details: serde_json::json!({}),
                };
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("✗ Configuration validation failed!");
                println!("\nError details:");
                println!("{:#}", e);

                println!("\nCommon issues:");
                println!("  1. Check TOML syntax (brackets, quotes, commas)");
                println!("  2. Verify field names are spelled correctly");
                println!("  3. Timeouts are in milliseconds and must be between 1 and 600000");
                println!("  4. ca_cert_path and skip_verify cannot be combined under [tunnel.tls]");
            }

            Err(e)
        }
    }
}
