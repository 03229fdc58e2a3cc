//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the route's upstream
//! - Strip hop-by-hop headers and add `X-Forwarded-*`
//! - Stream the upstream response back unchanged
//!
//! # Design Decisions
//! - The full request path is forwarded; the route prefix is not stripped
//! - Upstream failures map to 502, never to a security denial

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::http::Transport;
use crate::security::context::X_FORWARDED_FOR;

pub type HttpClient = Client<HttpConnector, Body>;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Build the shared upstream client.
pub fn build_client(connect_timeout: Duration) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    Client::builder(TokioExecutor::new()).build(connector)
}

/// A route's upstream, shared by its handlers.
#[derive(Clone)]
pub struct Upstream {
    pub route: Arc<str>,
    base: Uri,
    client: HttpClient,
}

impl Upstream {
    /// `base` must be an absolute `http://` URI; validation guarantees it
    /// for configured routes.
    pub fn new(route: &str, base: Uri, client: HttpClient) -> Self {
        Self {
            route: Arc::from(route),
            base,
            client,
        }
    }

    /// Target URI for a request path and query.
    pub fn target(&self, uri: &Uri) -> Result<Uri, axum::http::Error> {
        let base_path = self.base.path().trim_end_matches('/');
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        let mut builder = Uri::builder().path_and_query(format!("{}{}", base_path, path_and_query));
        if let Some(scheme) = self.base.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = self.base.authority() {
            builder = builder.authority(authority.clone());
        }
        builder.build()
    }
}

/// Forward the request to the route's upstream.
pub async fn forward(State(upstream): State<Upstream>, request: Request<Body>) -> Response {
    let (mut parts, body) = request.into_parts();

    let target = match upstream.target(&parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(route = %upstream.route, error = %e, "Failed to build upstream URI");
            return upstream_error(StatusCode::BAD_GATEWAY, "Invalid upstream target");
        }
    };

    let peer_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let tls = parts.extensions.get::<Transport>() == Some(&Transport::Tls);
    prepare_headers(&mut parts.headers, peer_ip.as_deref(), tls);

    tracing::debug!(route = %upstream.route, method = %parts.method, target = %target, "Forwarding request");
    parts.uri = target;

    match upstream.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(route = %upstream.route, error = %e, "Upstream error");
            upstream_error(StatusCode::BAD_GATEWAY, "Upstream request failed")
        }
    }
}

/// `peer_ip` is appended to the forwarded-for chain.
fn prepare_headers(headers: &mut HeaderMap, peer_ip: Option<&str>, tls: bool) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    headers.remove(header::HOST);

    if let Some(ip) = peer_ip {
        let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
        }
    }
    if tls {
        headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static("https"),
        );
    }
}

fn upstream_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "message": message })),
    )
        .into_response()
}
