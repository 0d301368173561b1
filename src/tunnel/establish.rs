use http::header::{HOST, PROXY_AUTHORIZATION};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::head::{read_head, HeadError};
use super::state::{CallState, TunnelState};
use crate::config::{ProxyConfig, TunnelOptions};
use crate::error::{Result, TunnelError};

/// CONNECT 响应最多解析的头部数量
const MAX_CONNECT_HEADERS: usize = 32;

/// 建立到目标主机的 CONNECT 隧道
///
/// 成功时返回的 TCP 连接已经是到目标主机的透明字节管道；
/// 任何失败路径上连接都会在返回前关闭
pub async fn establish(
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
    options: &TunnelOptions,
    call: &mut CallState,
) -> Result<TcpStream> {
    call.advance(TunnelState::DialingProxy);
    let mut stream = dial(proxy, options).await?;

    let authority = if target_host.contains(':') {
        format!("[{}]:{}", target_host, target_port)
    } else {
        format!("{}:{}", target_host, target_port)
    };

    call.advance(TunnelState::TunnelPending);
    match negotiate(&mut stream, proxy, &authority, options.max_header_size).await {
        Ok(()) => {
            call.advance(TunnelState::TunnelEstablished);
            info!("Tunnel to {} established via {}", authority, proxy.addr());
            Ok(stream)
        }
        Err(e) => {
            debug!("Closing proxy connection after failed CONNECT");
            drop(stream);
            Err(e)
        }
    }
}

/// 连接代理
async fn dial(proxy: &ProxyConfig, options: &TunnelOptions) -> Result<TcpStream> {
    let addr = proxy.addr();
    let connect_timeout = options.connect_timeout();
    debug!("Connecting to proxy {}", addr);

    let stream = timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| TunnelError::timeout(connect_timeout))?
        .map_err(|e| TunnelError::transport(&addr, e))?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on proxy connection: {}", e);
    }
    Ok(stream)
}

/// 编码 CONNECT 请求
pub fn encode_connect_request(proxy: &ProxyConfig, authority: &str) -> String {
    format!(
        "CONNECT {authority} HTTP/1.1\r\n{}: {authority}\r\n{}: {}\r\n\r\n",
        HOST,
        PROXY_AUTHORIZATION,
        proxy.basic_auth(),
    )
}

/// 在已连接的代理连接上完成 CONNECT 握手
pub async fn negotiate<S>(
    stream: &mut S,
    proxy: &ProxyConfig,
    authority: &str,
    max_header_size: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let addr = proxy.addr();
    let request = encode_connect_request(proxy, authority);

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| TunnelError::transport(&addr, e))?;
    stream
        .flush()
        .await
        .map_err(|e| TunnelError::transport(&addr, e))?;

    let (data, end) = read_head(stream, Vec::new(), max_header_size)
        .await
        .map_err(|e| match e {
            HeadError::Io(e) => TunnelError::transport(&addr, e),
            HeadError::Closed(_) => TunnelError::transport(
                &addr,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "proxy closed the connection before answering CONNECT",
                ),
            ),
            HeadError::TooLarge(limit) => {
                TunnelError::Protocol(format!("CONNECT response headers exceed {} bytes", limit))
            }
        })?;

    let mut headers = [httparse::EMPTY_HEADER; MAX_CONNECT_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let status = match response.parse(&data[..end]) {
        Ok(httparse::Status::Complete(_)) => response.code.ok_or_else(|| {
            TunnelError::Protocol("CONNECT response has no status code".to_string())
        })?,
        Ok(httparse::Status::Partial) => {
            return Err(TunnelError::Protocol(
                "Incomplete CONNECT response".to_string(),
            ))
        }
        Err(e) => {
            return Err(TunnelError::Protocol(format!(
                "Malformed CONNECT response: {}",
                e
            )))
        }
    };

    if status != 200 {
        warn!(
            "Proxy {} rejected CONNECT {} with status {} {}",
            addr,
            authority,
            status,
            response.reason.unwrap_or_default()
        );
        return Err(TunnelError::proxy_connect(status, authority));
    }

    // 隧道建立前代理不应发送任何额外数据
    if end < data.len() {
        return Err(TunnelError::Protocol(format!(
            "Proxy sent {} unexpected bytes after CONNECT response",
            data.len() - end
        )));
    }

    Ok(())
}
