use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::time::Duration;
use url::{Host, Url};

use crate::error::{Result, TunnelError};

/// 隧道目标（CONNECT 的 host:port）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// 主机名或 IP（IPv6 不带方括号）
    pub host: String,
    pub port: u16,
    /// 是否需要在隧道内做 TLS 握手
    pub secure: bool,
}

impl Target {
    /// CONNECT 请求行中的 authority
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// 通过隧道发送的一次 HTTP 请求
///
/// 构造时即完成校验：URL 必须是带主机名的 http/https 绝对地址，
/// 头部名称和值不能包含控制字符
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    method: Method,
    url: Url,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
}

impl TunnelRequest {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| TunnelError::invalid_request(format!("invalid URL '{}': {}", url, e)))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TunnelError::invalid_request(format!(
                    "unsupported URL scheme '{}'",
                    other
                )))
            }
        }
        if url.host().is_none() {
            return Err(TunnelError::invalid_request("URL has no host"));
        }

        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            timeout: None,
        })
    }

    /// 使用字符串形式的方法名构造
    pub fn from_parts(method: &str, url: &str) -> Result<Self> {
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| TunnelError::invalid_request(format!("invalid method '{}'", method)))?;
        Self::new(method, url)
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    /// 追加一个请求头（保持调用者给出的顺序）
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.headers.push((name, value));
        Ok(self)
    }

    /// 批量追加请求头
    pub fn headers<I, K, V>(mut self, headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self = self.header(name, value)?;
        }
        Ok(self)
    }

    /// 替换同名请求头
    pub fn set_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.headers.retain(|(n, _)| n != &name);
        self.headers.push((name, value));
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// 以 JSON 作为请求体，同时设置 `Content-Type: application/json`
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(|e| {
            TunnelError::invalid_request(format!("failed to serialize JSON body: {}", e))
        })?;
        Ok(self
            .set_header(CONTENT_TYPE.as_str(), "application/json")?
            .body(body))
    }

    /// 覆盖客户端默认的调用超时
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn header_list(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    /// 隧道目标
    pub fn target(&self) -> Target {
        let host = match self.url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => String::new(),
        };
        let secure = self.url.scheme() == "https";
        let port = self
            .url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });
        Target { host, port, secure }
    }

    /// 请求行中的路径和查询串
    pub fn path_and_query(&self) -> String {
        let mut path = self.url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = self.url.query() {
            path.push('?');
            path.push_str(query);
        }
        path
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.headers.iter().any(|(n, _)| n == name)
    }

    fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// 编码请求行和请求头（以空行结尾）
    pub fn encode_head(&self) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.path_and_query()).into_bytes();

        if !self.has_header(&HOST) {
            push_header(&mut head, HOST.as_str(), self.host_header().as_bytes());
        }

        for (name, value) in &self.headers {
            // 有请求体时 Content-Length 由实际长度决定
            if self.body.is_some() && name == CONTENT_LENGTH {
                continue;
            }
            // 每个连接只承载一个请求
            if name == CONNECTION {
                continue;
            }
            push_header(&mut head, name.as_str(), value.as_bytes());
        }

        match self.body {
            Some(ref body) => {
                push_header(&mut head, CONTENT_LENGTH.as_str(), body.len().to_string().as_bytes());
            }
            None if expects_body(&self.method) && !self.has_header(&CONTENT_LENGTH) => {
                push_header(&mut head, CONTENT_LENGTH.as_str(), b"0");
            }
            None => {}
        }

        push_header(&mut head, CONNECTION.as_str(), b"close");

        head.extend_from_slice(b"\r\n");
        head
    }
}

fn expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn push_header(buf: &mut Vec<u8>, name: &str, value: &[u8]) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value);
    buf.extend_from_slice(b"\r\n");
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| TunnelError::invalid_request(format!("invalid header name {:?}", name)))?;
    let header_value = HeaderValue::from_str(value.trim()).map_err(|_| {
        TunnelError::invalid_request(format!("invalid value for header '{}'", header_name))
    })?;
    Ok((header_name, header_value))
}
