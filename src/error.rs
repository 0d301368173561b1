/// 自定义错误类型
///
/// 使用 thiserror 定义隧道调用的错误分类，调用者可以据此区分
/// 代理拒绝、传输失败与上游失败
use std::io;
use std::time::Duration;
use thiserror::Error;

/// 隧道客户端的主要错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 与代理建立隧道之前的连接失败（DNS、拒绝连接、连接重置）
    #[error("Failed to reach proxy {addr}: {source}")]
    Transport {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 代理拒绝了 CONNECT 请求
    #[error("Proxy rejected CONNECT to {target} with status {status}")]
    ProxyConnect { status: u16, target: String },

    /// 隧道建立之后的失败（TLS 握手、请求写入、响应读取）
    #[error("Upstream error: {message}")]
    Upstream {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// 代理响应格式错误
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 请求构造校验失败
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 超时错误
    #[error("Operation timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// 资源耗尽（响应头或响应体超过限制）
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// 创建传输错误
    pub fn transport(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Transport {
            addr: addr.into(),
            source,
        }
    }

    /// 创建代理拒绝错误
    pub fn proxy_connect(status: u16, target: impl Into<String>) -> Self {
        Self::ProxyConnect {
            status,
            target: target.into(),
        }
    }

    /// 创建上游错误（无底层 I/O 错误）
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
            source: None,
        }
    }

    /// 创建带 I/O 来源的上游错误
    pub fn upstream_io(msg: impl Into<String>, source: io::Error) -> Self {
        Self::Upstream {
            message: msg.into(),
            source: Some(source),
        }
    }

    /// 创建请求校验错误
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// 创建超时错误
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 检查是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 检查是否为传输错误
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// 检查是否为上游错误
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }

    /// 代理拒绝 CONNECT 时返回的状态码
    pub fn proxy_status(&self) -> Option<u16> {
        match self {
            Self::ProxyConnect { status, .. } => Some(*status),
            _ => None,
        }
    }
}
