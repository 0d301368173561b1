use anyhow::{Context, Result};
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{AppConfig, ConfigValidator, ProxyConfigResolver};
use crate::tunnel::{ResponseBody, TunnelClient, TunnelRequest, TunnelResponse};

use super::config::{check_config, check_config_file_permissions, expand_path};
use super::template;

/// Execute CLI commands
pub async fn execute_command(cli: &super::Cli) -> Result<()> {
    use super::Commands;

    match &cli.command {
        Commands::Fetch {
            url,
            method,
            headers,
            data,
            json,
            proxy,
            config,
            timeout,
            include,
            output,
        } => {
            let request = build_request(method, url, headers, data.as_deref(), json.as_deref())?;
            let request = match timeout {
                Some(ms) => request.timeout(Duration::from_millis(*ms)),
                None => request,
            };
            run_fetch(
                request,
                proxy.as_deref(),
                config.as_deref(),
                *include,
                output.as_deref(),
            )
            .await?;
        }
        Commands::Resolve { proxy, config } => {
            let app_config = load_app_config(config.as_deref())?;
            let resolver = proxy_resolver(&app_config, proxy.as_deref())?;
            let (proxy, source) = resolver.resolve_with_source();
            println!("Proxy:  {}", proxy);
            println!("Source: {}", source);
        }
        Commands::Check { config, format } => {
            let config_path = expand_path(config)?;
            check_config(&config_path, format)?;
        }
        Commands::Template { output } => {
            template::generate_config_template(output.as_deref())?;
        }
    }

    Ok(())
}

/// 加载配置文件；未指定时使用默认配置
fn load_app_config(config: Option<&str>) -> Result<AppConfig> {
    let Some(config) = config else {
        return Ok(AppConfig::default());
    };

    let config_path = expand_path(config)?;
    check_config_file_permissions(&config_path)?;

    info!("Loading configuration from: {}", config_path);
    AppConfig::load(&config_path)
}

/// 代理解析器：命令行 --proxy 排在最前
fn proxy_resolver(config: &AppConfig, cli_proxy: Option<&str>) -> Result<ProxyConfigResolver> {
    if let Some(url) = cli_proxy {
        ConfigValidator::validate_proxy_url(url).context("Invalid --proxy")?;
    }
    Ok(config
        .proxy_resolver()
        .with_explicit("--proxy", cli_proxy.map(str::to_string)))
}

/// 解析 "Name: Value" 格式的请求头
fn parse_header(raw: &str) -> Result<(&str, &str)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid header '{}', expected 'Name: Value'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Invalid header '{}', name is empty", raw);
    }
    Ok((name, value.trim()))
}

fn build_request(
    method: &str,
    url: &str,
    headers: &[String],
    data: Option<&str>,
    json: Option<&str>,
) -> Result<TunnelRequest> {
    let headers = headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<Vec<_>>>()?;

    let mut request = TunnelRequest::from_parts(method, url)?.headers(headers)?;

    if let Some(json) = json {
        let value: serde_json::Value =
            serde_json::from_str(json).context("--json is not valid JSON")?;
        request = request.json(&value)?;
    } else if let Some(data) = data {
        request = request.body(data.to_string());
    }

    Ok(request)
}

/// 发送一次请求并输出响应
async fn run_fetch(
    request: TunnelRequest,
    cli_proxy: Option<&str>,
    config: Option<&str>,
    include: bool,
    output: Option<&str>,
) -> Result<()> {
    let app_config = load_app_config(config)?;
    let (proxy, source) = proxy_resolver(&app_config, cli_proxy)?.resolve_with_source();
    info!("Using proxy {} from {}", proxy, source);

    let options = app_config.tunnel.clone().with_env_overrides();
    let client = TunnelClient::new(proxy, options)?;
    let response = client.send(request).await?;

    if !response.is_success() {
        warn!("Upstream responded with status {}", response.status);
    }

    write_response(response, include, output)
}

fn write_response(response: TunnelResponse, include: bool, output: Option<&str>) -> Result<()> {
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();

    if include {
        writeln!(stdout, "HTTP/1.1 {}", response.status)?;
        for (name, value) in response.headers.iter() {
            writeln!(stdout, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(stdout)?;
    }

    let body = response.into_body();
    if let Some(path) = output {
        let path = expand_path(path)?;
        std::fs::write(&path, body.to_bytes())
            .with_context(|| format!("Failed to write response body to {}", path))?;
        info!("Response body ({}) written to {}", body.kind(), path);
        return Ok(());
    }

    match body {
        ResponseBody::Json(value) => writeln!(stdout, "{}", serde_json::to_string_pretty(&value)?)?,
        ResponseBody::Text(text) => writeln!(stdout, "{}", text)?,
        ResponseBody::Binary(bytes) => stdout.write_all(&bytes)?,
    }
    stdout.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Accept: application/json").unwrap(),
            ("Accept", "application/json")
        );
        assert_eq!(parse_header("X-Empty:").unwrap(), ("X-Empty", ""));
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_build_request_with_json() {
        let request = build_request(
            "POST",
            "http://example.com/items",
            &["X-Trace: abc".to_string()],
            None,
            Some(r#"{"id": 7}"#),
        )
        .unwrap();
        assert_eq!(*request.method(), http::Method::POST);
        assert_eq!(request.body_bytes().unwrap().as_ref(), br#"{"id":7}"#);
        let head = String::from_utf8(request.encode_head()).unwrap();
        assert!(head.contains("x-trace: abc\r\n"));
        assert!(head.contains("content-type: application/json\r\n"));
    }

    #[test]
    fn test_build_request_rejects_bad_json() {
        let result = build_request("POST", "http://example.com/", &[], None, Some("{oops"));
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_proxy_takes_precedence() {
        let config = AppConfig::from_toml(
            r#"
            [proxy]
            url = "http://a:b@config-proxy:3128"
            "#,
        )
        .unwrap();
        let (proxy, source) = proxy_resolver(&config, Some("http://c:d@cli-proxy:8080"))
            .unwrap()
            .resolve_with_source();
        assert_eq!(proxy.host, "cli-proxy");
        assert_eq!(proxy.port, 8080);
        assert_eq!(source, "--proxy");
    }

    #[test]
    fn test_invalid_cli_proxy_rejected() {
        assert!(proxy_resolver(&AppConfig::default(), Some("::bad::")).is_err());
    }
}
