//! Security middleware.
//! Runs the decision engine in front of every protected route.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;

use crate::http::Transport;
use crate::security::{
    ClientContext, Denial, DenialCode, RequestHead, RoutePolicy, ScanTarget, SecurityEngine, Verdict,
};

/// Engine plus the policy resolved for one route.
#[derive(Clone)]
pub struct RouteGuard {
    pub engine: SecurityEngine,
    pub policy: Arc<RoutePolicy>,
}

#[derive(Debug)]
enum BodyError {
    TooLarge,
    Read(axum::Error),
}

/// Buffer a body, giving up as soon as it exceeds `limit` bytes.
async fn read_limited(body: Body, limit: u64) -> Result<Vec<u8>, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buffered = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if (buffered.len() + chunk.len()) as u64 > limit {
            return Err(BodyError::TooLarge);
        }
        buffered.extend_from_slice(&chunk);
    }
    Ok(buffered)
}

pub async fn security_middleware(
    State(guard): State<RouteGuard>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = ClientContext::from_request(&request);
    let (mut parts, body) = request.into_parts();
    let secure = parts.extensions.get::<Transport>() == Some(&Transport::Tls);
    let policy = guard.policy.as_ref();

    let head = RequestHead {
        uri: &parts.uri,
        headers: &parts.headers,
        secure,
    };
    let cleared = match guard.engine.preflight(&ctx, &head, policy).await {
        Ok(cleared) => cleared,
        Err(denial) => return denial.into_response(),
    };

    // Content-Length may be absent or wrong, so the limit is enforced again
    // while streaming.
    let buffered = match read_limited(body, policy.options.max_request_size).await {
        Ok(bytes) => bytes,
        Err(BodyError::TooLarge) => {
            return guard
                .engine
                .reject(cleared, &ctx, policy, Denial::new(DenialCode::RequestTooLarge))
                .into_response();
        }
        Err(BodyError::Read(e)) => {
            tracing::debug!(ip = %ctx.ip, error = %e, "Failed to read request body");
            return guard
                .engine
                .reject(
                    cleared,
                    &ctx,
                    policy,
                    Denial::new(DenialCode::RequestTooLarge).with_message("Request body could not be read"),
                )
                .into_response();
        }
    };

    let target = ScanTarget {
        uri: &parts.uri,
        headers: &parts.headers,
        body: &buffered,
    };
    match guard.engine.inspect(cleared, &ctx, &target, policy).await {
        Verdict::Allow => {
            parts.extensions.insert(ctx);
            next.run(Request::from_parts(parts, Body::from(buffered))).await
        }
        Verdict::Deny(denial) => denial.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_limited() {
        let body = Body::from("0123456789");
        assert_eq!(read_limited(body, 10).await.unwrap(), b"0123456789");

        let body = Body::from("0123456789");
        assert!(matches!(read_limited(body, 9).await, Err(BodyError::TooLarge)));

        assert!(read_limited(Body::empty(), 0).await.unwrap().is_empty());
    }
}
