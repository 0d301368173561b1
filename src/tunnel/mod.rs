//! 通过 CONNECT 代理发送单次 HTTP/HTTPS 请求
//!
//! 每次调用都是独立的流水线：连接代理 → CONNECT 握手 →（TLS 握手）→
//! 写请求 → 读取并解码响应。连接归调用独占，调用结束时一定会被关闭。

mod establish;
mod forward;
mod head;
mod request;
mod response;
mod state;

pub use establish::{encode_connect_request, establish, negotiate};
pub use forward::{forward, write_request, BoxedChannel, Channel};
pub use request::{Target, TunnelRequest};
pub use response::{decode_body, read_response, ResponseBody, TunnelResponse};
pub use state::{CallState, TunnelState};

use bytes::Bytes;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{ProxyConfig, ProxyConfigResolver, TlsOptions, TunnelOptions};
use crate::error::{Result, TunnelError};
use crate::tls;

/// 隧道客户端
///
/// 只持有不可变的代理配置、调用参数和 TLS 配置，不持有任何连接，
/// 可以在多个任务之间共享并发调用
#[derive(Clone)]
pub struct TunnelClient {
    proxy: ProxyConfig,
    options: TunnelOptions,
    connector: TlsConnector,
}

impl TunnelClient {
    /// 创建客户端，按 `options.tls` 加载 TLS 配置
    pub fn new(proxy: ProxyConfig, options: TunnelOptions) -> Result<Self> {
        options
            .validate()
            .map_err(|e| TunnelError::config_error(format!("{:#}", e)))?;
        let tls_config = tls::load_client_config(&options.tls)?;
        Ok(Self::with_tls_config(proxy, options, tls_config))
    }

    /// 使用现成的 TLS 配置创建客户端
    pub fn with_tls_config(
        proxy: ProxyConfig,
        options: TunnelOptions,
        tls_config: Arc<rustls::ClientConfig>,
    ) -> Self {
        Self {
            proxy,
            options,
            connector: TlsConnector::from(tls_config),
        }
    }

    /// 从环境变量解析代理并应用 CONNECT_TUNNEL_* 覆盖
    pub fn from_env() -> Result<Self> {
        let proxy = ProxyConfigResolver::from_env().resolve();
        Self::new(proxy, TunnelOptions::default().with_env_overrides())
    }

    pub fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }

    pub fn options(&self) -> &TunnelOptions {
        &self.options
    }

    /// 发送请求
    ///
    /// 整个调用受超时约束；超时或调用方放弃 future 时连接随之关闭
    pub async fn send(&self, request: TunnelRequest) -> Result<TunnelResponse> {
        let deadline = request
            .timeout_override()
            .unwrap_or_else(|| self.options.request_timeout());
        let mut call = CallState::new();
        let target = request.target();
        let span = info_span!(
            "tunnel",
            call_id = %call.id(),
            method = %request.method(),
            target = %target.authority()
        );

        let result = match timeout(deadline, self.run(&request, &mut call))
            .instrument(span.clone())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TunnelError::timeout(deadline)),
        };

        let _enter = span.enter();
        match result {
            Ok(response) => {
                info!(
                    "{} {} -> {} ({} body, {:?})",
                    request.method(),
                    request.path_and_query(),
                    response.status,
                    response.body.kind(),
                    call.elapsed()
                );
                Ok(response)
            }
            Err(e) => {
                let failed_in = call.fail();
                warn!("Tunnel call failed during {}: {}", failed_in, e);
                Err(e)
            }
        }
    }

    async fn run(&self, request: &TunnelRequest, call: &mut CallState) -> Result<TunnelResponse> {
        let target = request.target();
        let stream = establish(&self.proxy, &target.host, target.port, &self.options, call).await?;
        let mut channel = forward(stream, request, &self.connector, call).await?;

        call.advance(TunnelState::ResponseReceiving);
        let response = read_response(&mut channel, request.method(), &self.options).await?;

        // 响应已完整读取，关闭失败不影响结果
        if let Err(e) = channel.shutdown().await {
            debug!("Error while shutting down tunnel: {}", e);
        }
        drop(channel);
        call.advance(TunnelState::Closed);

        Ok(response)
    }

    /// 发送任意方法的请求
    pub async fn fetch<I, K, V>(
        &self,
        method: &str,
        url: &str,
        headers: I,
        body: Option<Bytes>,
    ) -> Result<TunnelResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = TunnelRequest::from_parts(method, url)?.headers(headers)?;
        if let Some(body) = body {
            request = request.body(body);
        }
        self.send(request).await
    }

    /// 发送 GET 请求
    pub async fn get<I, K, V>(&self, url: &str, headers: I) -> Result<TunnelResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.send(TunnelRequest::get(url)?.headers(headers)?).await
    }

    /// 发送 JSON 请求体的 POST 请求
    pub async fn post<T, I, K, V>(&self, url: &str, json_body: &T, headers: I) -> Result<TunnelResponse>
    where
        T: Serialize + ?Sized,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let request = TunnelRequest::post(url)?.headers(headers)?.json(json_body)?;
        self.send(request).await
    }
}

/// 默认 TLS 配置（系统证书），进程内只加载一次
fn default_tls_config() -> Result<Arc<rustls::ClientConfig>> {
    static DEFAULT_TLS: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();

    if let Some(config) = DEFAULT_TLS.get() {
        return Ok(config.clone());
    }
    let config = tls::load_client_config(&TlsOptions::default())?;
    Ok(DEFAULT_TLS.get_or_init(|| config).clone())
}

fn default_client(proxy: &ProxyConfig) -> Result<TunnelClient> {
    Ok(TunnelClient::with_tls_config(
        proxy.clone(),
        TunnelOptions::default(),
        default_tls_config()?,
    ))
}

/// 使用默认参数通过指定代理发送一次请求
pub async fn fetch_over_tunnel<I, K, V>(
    proxy: &ProxyConfig,
    method: &str,
    url: &str,
    headers: I,
    body: Option<Bytes>,
) -> Result<TunnelResponse>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    default_client(proxy)?
        .fetch(method, url, headers, body)
        .await
}

/// 使用默认参数通过指定代理发送 GET 请求
pub async fn get_over_tunnel<I, K, V>(
    proxy: &ProxyConfig,
    url: &str,
    headers: I,
) -> Result<TunnelResponse>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    default_client(proxy)?
        .get(url, headers)
        .await
}

/// 使用默认参数通过指定代理发送 JSON POST 请求
pub async fn post_over_tunnel<T, I, K, V>(
    proxy: &ProxyConfig,
    url: &str,
    json_body: &T,
    headers: I,
) -> Result<TunnelResponse>
where
    T: Serialize + ?Sized,
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    default_client(proxy)?
        .post(url, json_body, headers)
        .await
}
