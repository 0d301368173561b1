/// 有限读取器模块
///
/// 限制上游响应体可以读取的最大字节数，防止内存耗尽
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// 有限读取器 - 超过限制时返回错误，正好读完限制后遇到 EOF 视为正常
pub struct LimitedReader<R> {
    inner: R,
    remaining: usize,
    limit: usize,
    exceeded: bool,
}

impl<R> LimitedReader<R> {
    /// 创建新的有限读取器
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
            limit,
            exceeded: false,
        }
    }

    /// 获取剩余可读字节数
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// 获取总限制
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 获取已读取字节数
    pub fn read_count(&self) -> usize {
        self.limit - self.remaining
    }

    /// 是否因为超过限制而失败
    pub fn exceeded(&self) -> bool {
        self.exceeded
    }

    /// 获取内部读取器的可变引用
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// 消费 LimitedReader，返回内部读取器
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LimitedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.remaining == 0 {
            // 额度用完后再探测一个字节，区分 EOF 和超限
            let mut probe = [0u8; 1];
            let mut probe_buf = ReadBuf::new(&mut probe);
            return match Pin::new(&mut self.inner).poll_read(cx, &mut probe_buf) {
                Poll::Ready(Ok(())) if probe_buf.filled().is_empty() => Poll::Ready(Ok(())),
                Poll::Ready(Ok(())) => {
                    self.exceeded = true;
                    Poll::Ready(Err(io::Error::other(format!(
                        "Response size limit exceeded (limit: {} bytes)",
                        self.limit
                    ))))
                }
                other => other,
            };
        }

        // 只把不超过剩余额度的部分交给内部读取器
        let limit = self.remaining.min(buf.remaining());
        let read = {
            let dst = buf.initialize_unfilled_to(limit);
            let mut limited = ReadBuf::new(dst);
            match Pin::new(&mut self.inner).poll_read(cx, &mut limited) {
                Poll::Ready(Ok(())) => limited.filled().len(),
                other => return other,
            }
        };

        buf.advance(read);
        self.remaining = self.remaining.saturating_sub(read);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_read_within_limit() {
        let data: &[u8] = b"hello";
        let mut limited = LimitedReader::new(data, 16);
        let mut out = Vec::new();
        limited.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(limited.read_count(), 5);
        assert_eq!(limited.remaining(), 11);
        assert!(!limited.exceeded());
    }

    #[tokio::test]
    async fn test_read_exactly_limit() {
        let data: &[u8] = b"12345678";
        let mut limited = LimitedReader::new(data, 8);
        let mut out = Vec::new();
        limited.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), 8);
        assert!(!limited.exceeded());
    }

    #[tokio::test]
    async fn test_read_over_limit() {
        let data = vec![b'x'; 100];
        let mut limited = LimitedReader::new(&data[..], 10);
        let mut out = Vec::new();
        let err = limited.read_to_end(&mut out).await.unwrap_err();
        assert!(err.to_string().contains("limit exceeded"));
        assert!(limited.exceeded());
        assert_eq!(limited.limit(), 10);
    }
}
