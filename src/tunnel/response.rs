use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::fmt;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::debug;

use super::head::{read_head, HeadError};
use crate::config::TunnelOptions;
use crate::error::{Result, TunnelError};
use crate::limited_reader::LimitedReader;

/// httparse 一次最多解析的响应头数量
const MAX_RESPONSE_HEADERS: usize = 128;

/// 解码后的响应体
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// 声明为 JSON 且解析成功
    Json(serde_json::Value),
    /// 文本，或声明为 JSON 但解析失败时的原始文本
    Text(String),
    /// 二进制内容
    Binary(Bytes),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// 变体名称（用于日志）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }

    /// 重新编码为字节（JSON 使用紧凑格式）
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::Text(text) => Bytes::from(text.clone()),
            Self::Binary(bytes) => bytes.clone(),
        }
    }
}

/// 通过隧道收到的完整响应
#[derive(Debug, Clone)]
pub struct TunnelResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl TunnelResponse {
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 第一个同名响应头的值
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 所有同名响应头的值
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }
}

/// 已解析的响应头部分
struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
}

/// 响应体的分帧方式
#[derive(Debug, PartialEq, Eq)]
enum BodyFraming {
    Empty,
    Chunked,
    Length(u64),
    UntilClose,
}

/// 读取并解码完整响应
///
/// 响应体会被完整缓冲；解码失败不会报错，而是退回到原始文本
pub async fn read_response<S>(
    stream: &mut S,
    method: &Method,
    options: &TunnelOptions,
) -> Result<TunnelResponse>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let (head, leftover) = loop {
        let (data, end) = read_head(stream, buf, options.max_header_size)
            .await
            .map_err(head_error)?;
        let head = parse_response_head(&data[..end])?;
        let leftover = data[end..].to_vec();

        // 跳过 1xx 临时响应
        if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
            debug!("Skipping interim response {}", head.status);
            buf = leftover;
            continue;
        }
        break (head, leftover);
    };

    let framing = body_framing(method, &head)?;
    debug!("Response {} with {:?} body", head.status, framing);

    let raw = read_body(stream, leftover, framing, options.max_response_size).await?;
    let content_type = head
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let body = decode_body(content_type, raw);

    Ok(TunnelResponse {
        status: head.status,
        headers: head.headers,
        body,
    })
}

fn head_error(err: HeadError) -> TunnelError {
    match err {
        HeadError::Io(e) => TunnelError::upstream_io("Failed to read response headers", e),
        HeadError::Closed(read) => TunnelError::upstream(format!(
            "Connection closed before response headers were complete ({} bytes received)",
            read
        )),
        HeadError::TooLarge(limit) => TunnelError::ResourceExhausted(format!(
            "Response headers exceed {} bytes",
            limit
        )),
    }
}

fn parse_response_head(data: &[u8]) -> Result<ResponseHead> {
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut header_buf);

    match response.parse(data) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(TunnelError::upstream("Incomplete response headers"));
        }
        Err(e) => {
            return Err(TunnelError::upstream(format!(
                "Malformed response headers: {}",
                e
            )));
        }
    }

    let code = response
        .code
        .ok_or_else(|| TunnelError::upstream("Response has no status code"))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| TunnelError::upstream(format!("Invalid status code {}", code)))?;

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        match (
            HeaderName::from_bytes(header.name.as_bytes()),
            HeaderValue::from_bytes(header.value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!("Dropping unparseable response header '{}'", header.name),
        }
    }

    Ok(ResponseHead { status, headers })
}

fn body_framing(method: &Method, head: &ResponseHead) -> Result<BodyFraming> {
    if *method == Method::HEAD
        || head.status.is_informational()
        || head.status == StatusCode::NO_CONTENT
        || head.status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyFraming::Empty);
    }

    let chunked = head
        .headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
    if chunked {
        return Ok(BodyFraming::Chunked);
    }

    match head.headers.get(CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(BodyFraming::Length)
            .ok_or_else(|| TunnelError::upstream("Invalid Content-Length in response")),
        None => Ok(BodyFraming::UntilClose),
    }
}

async fn read_body<S>(
    stream: &mut S,
    leftover: Vec<u8>,
    framing: BodyFraming,
    max_size: usize,
) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    if framing == BodyFraming::Empty {
        return Ok(Bytes::new());
    }
    if let BodyFraming::Length(len) = framing {
        if len > max_size as u64 {
            return Err(TunnelError::ResourceExhausted(format!(
                "Response body of {} bytes exceeds limit of {} bytes",
                len, max_size
            )));
        }
    }

    // 消息头之后多读到的字节先于连接上的剩余数据
    let mut reader = LimitedReader::new(leftover.as_slice().chain(stream), max_size);

    let result = match framing {
        BodyFraming::Length(len) => {
            let mut body = vec![0u8; len as usize];
            reader.read_exact(&mut body).await.map(|_| body)
        }
        BodyFraming::Chunked => read_chunked(&mut reader, max_size).await,
        BodyFraming::UntilClose => {
            let mut body = Vec::new();
            reader.read_to_end(&mut body).await.map(|_| body)
        }
        BodyFraming::Empty => Ok(Vec::new()),
    };

    match result {
        Ok(body) => Ok(Bytes::from(body)),
        Err(e) if reader.exceeded() || is_chunk_too_large(&e) => {
            Err(TunnelError::ResourceExhausted(format!(
                "Response body exceeds limit of {} bytes",
                max_size
            )))
        }
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(TunnelError::upstream_io(
            "Connection closed before response body was complete",
            e,
        )),
        Err(e) => Err(TunnelError::upstream_io("Failed to read response body", e)),
    }
}

fn is_chunk_too_large(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<ChunkTooLarge>())
}

/// 解码 `Transfer-Encoding: chunked` 响应体
///
/// chunk 大小来自上游，不预先按声明大小分配内存；声明的累计大小超过
/// `max_size` 时直接失败
async fn read_chunked<R>(reader: R, max_size: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut body = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        // 忽略 chunk 扩展
        let size_str = line.trim().split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size_str, 16).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid chunk size {:?}", size_str),
            )
        })?;

        if size == 0 {
            break;
        }

        let declared = (body.len() as u64).checked_add(size);
        if declared.map_or(true, |total| total > max_size as u64) {
            return Err(io::Error::other(ChunkTooLarge { limit: max_size }));
        }

        let start = body.len();
        let read = (&mut reader).take(size).read_to_end(&mut body).await?;
        if (read as u64) < size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("chunk truncated after {} of {} bytes", body.len() - start, size),
            ));
        }

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing CRLF after chunk data",
            ));
        }
    }

    // 丢弃 trailer，直到空行或连接关闭
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            break;
        }
    }

    Ok(body)
}

/// chunk 声明的大小超过响应体限制
#[derive(Debug)]
struct ChunkTooLarge {
    limit: usize,
}

impl fmt::Display for ChunkTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunked body exceeds limit of {} bytes", self.limit)
    }
}

impl std::error::Error for ChunkTooLarge {}

/// 响应体的内容类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Json,
    Text,
    Binary,
    Unknown,
}

fn classify_content_type(content_type: Option<&str>) -> ContentKind {
    let Some(content_type) = content_type else {
        return ContentKind::Unknown;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence == "application/json" || essence == "text/json" || essence.ends_with("+json") {
        ContentKind::Json
    } else if essence.starts_with("text/")
        || essence.ends_with("+xml")
        || matches!(
            essence.as_str(),
            "application/xml" | "application/javascript" | "application/x-www-form-urlencoded"
        )
    {
        ContentKind::Text
    } else if ["image/", "audio/", "video/", "font/"]
        .iter()
        .any(|prefix| essence.starts_with(prefix))
        || matches!(
            essence.as_str(),
            "application/octet-stream" | "application/pdf" | "application/zip" | "application/gzip"
        )
    {
        ContentKind::Binary
    } else {
        ContentKind::Unknown
    }
}

/// 根据声明的内容类型解码响应体，永不失败
pub fn decode_body(content_type: Option<&str>, raw: Bytes) -> ResponseBody {
    match classify_content_type(content_type) {
        ContentKind::Json => match serde_json::from_slice(&raw) {
            Ok(value) => ResponseBody::Json(value),
            Err(e) => {
                debug!("Body declared as JSON failed to parse ({}), keeping raw text", e);
                ResponseBody::Text(String::from_utf8_lossy(&raw).into_owned())
            }
        },
        ContentKind::Text => ResponseBody::Text(String::from_utf8_lossy(&raw).into_owned()),
        ContentKind::Binary => ResponseBody::Binary(raw),
        ContentKind::Unknown => match String::from_utf8(raw.to_vec()) {
            Ok(text) => ResponseBody::Text(text),
            Err(_) => ResponseBody::Binary(raw),
        },
    }
}
