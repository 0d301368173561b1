use rustls::pki_types::ServerName;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::request::TunnelRequest;
use super::state::{CallState, TunnelState};
use crate::error::{Result, TunnelError};

/// 隧道内的字节通道抽象
///
/// 统一封装明文 TCP 和 TLS 两种连接
pub trait Channel: AsyncRead + AsyncWrite + Unpin + Send {}

// 为所有满足条件的类型自动实现 Channel
impl<T> Channel for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedChannel = Pin<Box<dyn Channel>>;

/// 在隧道上发送请求
///
/// https 目标先在隧道内完成 TLS 握手（代理只转发字节，不终止 TLS），
/// 然后写入一个完整的 HTTP/1.1 请求
pub async fn forward(
    stream: TcpStream,
    request: &TunnelRequest,
    connector: &TlsConnector,
    call: &mut CallState,
) -> Result<BoxedChannel> {
    let target = request.target();

    let mut channel: BoxedChannel = if target.secure {
        call.advance(TunnelState::TlsHandshaking);
        let server_name = ServerName::try_from(target.host.clone()).map_err(|e| {
            TunnelError::upstream(format!("Invalid TLS server name '{}': {}", target.host, e))
        })?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| TunnelError::upstream_io("TLS handshake failed", e))?;
        debug!("TLS handshake with {} completed", target.authority());
        Box::pin(tls_stream)
    } else {
        Box::pin(stream)
    };

    write_request(&mut channel, request).await?;
    call.advance(TunnelState::RequestSent);
    Ok(channel)
}

/// 写入请求头和请求体
pub async fn write_request<W>(writer: &mut W, request: &TunnelRequest) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let head = request.encode_head();
    writer
        .write_all(&head)
        .await
        .map_err(|e| TunnelError::upstream_io("Failed to write request headers", e))?;

    if let Some(body) = request.body_bytes() {
        writer
            .write_all(body)
            .await
            .map_err(|e| TunnelError::upstream_io("Failed to write request body", e))?;
    }

    writer
        .flush()
        .await
        .map_err(|e| TunnelError::upstream_io("Failed to flush request", e))?;

    debug!(
        "Sent {} {} ({} body bytes)",
        request.method(),
        request.path_and_query(),
        request.body_bytes().map_or(0, |b| b.len())
    );
    Ok(())
}
