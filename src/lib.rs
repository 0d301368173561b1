/// CONNECT Tunnel 库入口
///
/// 通过固定的转发代理（HTTP CONNECT）发送单次 HTTP/HTTPS 请求，
/// 让所有出站调用都使用代理的白名单地址
pub mod cli;
pub mod config;
pub mod error;
pub mod limited_reader;
pub mod tls;
pub mod tunnel;

// 重新导出常用类型
pub use config::{ProxyConfig, ProxyConfigResolver, TlsOptions, TunnelOptions};
pub use error::{Result, TunnelError};
pub use limited_reader::LimitedReader;
pub use tunnel::{
    fetch_over_tunnel, get_over_tunnel, post_over_tunnel, ResponseBody, TunnelClient,
    TunnelRequest, TunnelResponse, TunnelState,
};
