//! Common utilities for integration tests
#![allow(dead_code)]

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Read until the end of an HTTP head, returning the head and any extra bytes
async fn read_http_head<S: AsyncRead + Unpin>(stream: &mut S) -> Option<(String, Vec<u8>)> {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = data.split_off(pos + 4);
            return Some((String::from_utf8_lossy(&data).into_owned(), rest));
        }
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim()
            .eq_ignore_ascii_case(name)
            .then(|| v.trim().to_string())
    })
}

/// CONNECT 代理的观测数据
#[derive(Default)]
pub struct ProxyStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    targets: Mutex<Vec<String>>,
    auth_headers: Mutex<Vec<String>>,
}

impl ProxyStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }

    pub fn auth_headers(&self) -> Vec<String> {
        self.auth_headers.lock().unwrap().clone()
    }

    /// Wait until `n` client connections have been closed
    pub async fn wait_closed(&self, n: usize) -> bool {
        for _ in 0..100 {
            if self.closed() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

/// 测试用的 CONNECT 代理
pub struct TestProxy {
    pub port: u16,
    pub stats: Arc<ProxyStats>,
    handle: JoinHandle<()>,
}

impl TestProxy {
    /// Proxy URL with the given credentials
    pub fn url(&self, username: &str, password: &str) -> String {
        format!("http://{}:{}@127.0.0.1:{}", username, password, self.port)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a CONNECT proxy that relays to the requested target
///
/// With `reject_status` set every CONNECT is answered with that status instead.
pub async fn start_connect_proxy(reject_status: Option<u16>) -> TestProxy {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind proxy");
    let port = listener.local_addr().unwrap().port();
    let stats = Arc::new(ProxyStats::default());

    let proxy_stats = stats.clone();
    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let stats = proxy_stats.clone();
            stats.opened.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                handle_proxy_connection(socket, &stats, reject_status).await;
                stats.closed.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    TestProxy {
        port,
        stats,
        handle,
    }
}

async fn handle_proxy_connection(
    mut client: TcpStream,
    stats: &ProxyStats,
    reject_status: Option<u16>,
) {
    let Some((head, _)) = read_http_head(&mut client).await else {
        return;
    };

    let target = head
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("CONNECT "))
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or_default()
        .to_string();
    stats.targets.lock().unwrap().push(target.clone());
    if let Some(auth) = header_value(&head, "proxy-authorization") {
        stats.auth_headers.lock().unwrap().push(auth);
    }

    if let Some(status) = reject_status {
        let reply = format!("HTTP/1.1 {} Rejected\r\nContent-Length: 0\r\n\r\n", status);
        let _ = client.write_all(reply.as_bytes()).await;
        // 等待客户端关闭连接
        let mut buf = [0u8; 64];
        while matches!(client.read(&mut buf).await, Ok(n) if n > 0) {}
        return;
    }

    let mut upstream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(_) => {
            let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
            return;
        }
    };

    if client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await
        .is_err()
    {
        return;
    }

    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
}

/// 上游服务器收到的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub type Responder = Arc<dyn Fn(&RecordedRequest) -> Vec<u8> + Send + Sync>;

/// Build a complete HTTP/1.1 response with a Content-Length body
pub fn http_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

async fn serve_http<S>(mut stream: S, responder: &Responder, requests: &Mutex<Vec<RecordedRequest>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some((head, mut body)) = read_http_head(&mut stream).await else {
        return;
    };

    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            let (n, v) = line.split_once(':')?;
            Some((n.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    let content_length = header_value(&head, "content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut buf = [0u8; 1024];
    while body.len() < content_length {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&buf[..n]),
        }
    }

    let request = RecordedRequest {
        method,
        path,
        headers,
        body,
    };
    let response = responder(&request);
    requests.lock().unwrap().push(request);

    let _ = stream.write_all(&response).await;
    let _ = stream.shutdown().await;
}

/// 测试用的上游 HTTP 服务器
pub struct TestUpstream {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl TestUpstream {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a plain HTTP server answering each request with `responder`
pub async fn start_http_upstream<F>(responder: F) -> TestUpstream
where
    F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind upstream");
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let responder: Responder = Arc::new(responder);

    let recorded = requests.clone();
    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let responder = responder.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                serve_http(socket, &responder, &recorded).await;
            });
        }
    });

    TestUpstream {
        port,
        requests,
        handle,
    }
}

/// Start an HTTPS server with a fresh self-signed certificate for `localhost`
///
/// Returns the server and the path of the certificate to trust.
pub async fn start_https_upstream<F>(responder: F) -> (TestUpstream, TestCleanup)
where
    F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
{
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio_rustls::TlsAcceptor;

    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("Failed to generate test certificate");
    let cert_path = temp_path("test-ca", "pem");
    std::fs::write(&cert_path, certified.cert.pem()).expect("Failed to write test certificate");

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified.signing_key.serialize_der(),
    ));
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![certified.cert.der().clone()], key)
        .expect("Failed to build server TLS config");
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind upstream");
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let responder: Responder = Arc::new(responder);

    let recorded = requests.clone();
    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let responder = responder.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                if let Ok(tls_stream) = acceptor.accept(socket).await {
                    serve_http(tls_stream, &responder, &recorded).await;
                }
            });
        }
    });

    (
        TestUpstream {
            port,
            requests,
            handle,
        },
        TestCleanup::new(cert_path),
    )
}

/// Unique temporary file path
pub fn temp_path(prefix: &str, extension: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "{}-{}-{}-{}.{}",
        prefix,
        timestamp,
        counter,
        std::process::id(),
        extension
    ))
}

/// Cleanup function for test resources
pub struct TestCleanup {
    paths: Vec<PathBuf>,
}

impl TestCleanup {
    pub fn new(path: PathBuf) -> Self {
        Self { paths: vec![path] }
    }

    pub fn path(&self) -> &PathBuf {
        &self.paths[0]
    }
}

impl Drop for TestCleanup {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}
