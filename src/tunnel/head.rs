//! HTTP 消息头读取
//!
//! CONNECT 响应和上游响应共用，错误类型由调用方映射

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// 单次读取的缓冲区大小
const READ_CHUNK_SIZE: usize = 8192;

#[derive(Debug)]
pub(crate) enum HeadError {
    /// 读取时发生 I/O 错误
    Io(io::Error),
    /// 对端在消息头结束前关闭了连接，携带已读取的字节数
    Closed(usize),
    /// 消息头超过限制
    TooLarge(usize),
}

/// 查找 `\r\n\r\n`，返回消息头结束位置（含空行）
fn find_head_end(buf: &[u8], from: usize) -> Option<usize> {
    let start = from.saturating_sub(3);
    buf[start..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| start + pos + 4)
}

/// 从 `buf` 已有的数据开始读取，直到出现完整的消息头
///
/// 返回缓冲区和消息头的结束位置；结束位置之后的字节属于消息体
pub(crate) async fn read_head<S>(
    stream: &mut S,
    mut buf: Vec<u8>,
    max_size: usize,
) -> Result<(Vec<u8>, usize), HeadError>
where
    S: AsyncRead + Unpin,
{
    if let Some(end) = find_head_end(&buf, 0) {
        return Ok((buf, end));
    }

    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = stream.read(&mut chunk).await.map_err(HeadError::Io)?;
        if n == 0 {
            return Err(HeadError::Closed(buf.len()));
        }

        let searched = buf.len();
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_head_end(&buf, searched) {
            if end > max_size {
                return Err(HeadError::TooLarge(max_size));
            }
            return Ok((buf, end));
        }

        if buf.len() > max_size {
            return Err(HeadError::TooLarge(max_size));
        }
    }
}
