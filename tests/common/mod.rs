//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use request_shield::config::{RouteConfig, ShieldConfig};
use request_shield::observability::MemoryAuditSink;
use request_shield::security::{EngineSettings, SecurityEngine, SecurityOptions};
use request_shield::store::{MemoryStore, SharedStore};

pub const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// Headers a desktop browser sends on a navigation.
pub const BROWSER_HEADERS: &[(&str, &str)] = &[
    ("user-agent", CHROME),
    ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    ("accept-language", "en-US,en;q=0.9"),
    ("accept-encoding", "gzip, deflate, br"),
    ("connection", "keep-alive"),
    ("cache-control", "max-age=0"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-mode", "navigate"),
];

pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in BROWSER_HEADERS {
        headers.insert(*name, value.parse().unwrap());
    }
    headers
}

/// Browser-like request arriving from `peer`.
pub fn browser_request(method: &str, uri: &str, peer: &str, body: Body) -> Request<Body> {
    let mut request = Request::builder().method(method).uri(uri).body(body).unwrap();
    *request.headers_mut() = browser_headers();
    let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn route(name: &str, prefix: &str, upstream: SocketAddr, security: Option<SecurityOptions>) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        path_prefix: prefix.to_string(),
        upstream: format!("http://{}", upstream),
        security,
    }
}

/// Config with a single `/api` route in front of `upstream`.
pub fn gateway_config(upstream: SocketAddr) -> ShieldConfig {
    let mut config = ShieldConfig::default();
    config.observability.metrics_enabled = false;
    config.routes.push(route("api", "/api", upstream, None));
    config
}

/// Engine over a fresh memory store, with its audit events captured.
pub fn engine() -> (SecurityEngine, Arc<MemoryStore>, MemoryAuditSink) {
    let store = Arc::new(MemoryStore::new());
    let audit = MemoryAuditSink::new();
    let settings = EngineSettings {
        penalty_block_level: Some(3),
        ..Default::default()
    };
    let engine = SecurityEngine::new(store.clone() as Arc<dyn SharedStore>, settings)
        .with_audit_sink(Arc::new(audit.clone()));
    (engine, store, audit)
}

/// Start a backend that answers every request with its request line and
/// forwarded-for chain.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(echo(socket));
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn echo(mut socket: TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let mut content_length = 0usize;
    let mut forwarded_for = String::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "x-forwarded-for" => forwarded_for = value.trim().to_string(),
                _ => {}
            }
        }
    }

    let mut body_read = buf.len() - head_end;
    while body_read < content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => body_read += n,
        }
    }

    let body = format!("{}\nx-forwarded-for: {}\nbody-bytes: {}", request_line, forwarded_for, body_read);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
