//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use fleet_upstream::admin::AdminServer;
use fleet_upstream::config::{AdminConfig, ServiceConfig};
use fleet_upstream::upstream::ReqwestTransport;
use fleet_upstream::{Shutdown, UpstreamClient};

/// A request as seen by the mock upstream.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    /// Path including the query string.
    pub target: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Handle to a running mock upstream.
pub struct MockUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    peak: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Highest number of requests handled at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Start a mock upstream that returns a fixed response.
pub async fn start_mock_upstream(status: u16, body: &'static str) -> MockUpstream {
    start_programmable_upstream(move |_| (status, body.as_bytes().to_vec())).await
}

/// Start a mock upstream whose response is computed per request.
pub async fn start_programmable_upstream<F>(f: F) -> MockUpstream
where
    F: Fn(&CapturedRequest) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    start_slow_upstream(Duration::ZERO, f).await
}

/// Like `start_programmable_upstream`, holding each request for `delay`.
pub async fn start_slow_upstream<F>(delay: Duration, f: F) -> MockUpstream
where
    F: Fn(&CapturedRequest) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let f = Arc::new(f);

    let captured = requests.clone();
    let peak_seen = peak.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let f = f.clone();
            let captured = captured.clone();
            let active = active.clone();
            let peak_seen = peak_seen.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak_seen.fetch_max(now, Ordering::SeqCst);

                let (status, body) = f(&request);
                captured.lock().unwrap().push(request);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                active.fetch_sub(1, Ordering::SeqCst);

                let reason = reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let head = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockUpstream {
        addr,
        requests,
        peak,
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(CapturedRequest {
        method,
        target,
        headers,
        body,
    })
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Client config pointing at `base_url` with short timeouts.
pub fn test_config(base_url: &str) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.upstream.base_url = base_url.to_string();
    config.upstream.api_key = "ptr_integration".to_string();
    config.upstream.request_timeout_secs = 5;
    config.upstream.connect_timeout_secs = 1;
    config
}

/// Build a client that ignores proxy environment variables.
pub fn build_client(config: &ServiceConfig) -> UpstreamClient {
    let http = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(config.upstream.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs))
        .build()
        .unwrap();
    UpstreamClient::with_transport(config, ReqwestTransport::from_client(http)).unwrap()
}

/// Serve the admin API on an ephemeral port. Keep the returned `Shutdown`
/// alive for as long as the server should run.
pub async fn start_admin(client: Arc<UpstreamClient>, api_key: &str) -> (SocketAddr, Shutdown) {
    let config = AdminConfig {
        enabled: true,
        api_key: api_key.to_string(),
        ..Default::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = AdminServer::new(client, &config);
    tokio::spawn(server.run(listener, shutdown.subscribe()));
    (addr, shutdown)
}
