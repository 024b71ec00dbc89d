//! Request forwarder: the per-request state machine.
//!
//! match → route auth → select backend → count connection → rewrite →
//! attempt loop (build request, lazy client, execute, evaluate retry) →
//! stream response. Every increment of a backend's connection count is
//! paired with exactly one decrement through [`ConnGuard`], which rides
//! along into the streamed response body and fires when the body is
//! closed, completed, or abandoned.

use crate::models::error::GatewayError;
use crate::models::router::RouteConfig;
use crate::overlay::dialer::DialerCache;
use crate::services::load_balancer::{Backend, ConnGuard};
use crate::services::supervisor::SharedState;
use crate::utils::path::rewrite;

use actix_web::{web, HttpRequest, HttpResponse};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use log::{debug, warn};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Hop-by-hop headers never copied between the inbound and outbound legs.
static HOP_HEADERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "connection",
        "proxy-connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "host",
        "content-length",
    ]
    .into_iter()
    .collect()
});

/// Handler function registered as the catch-all service.
pub async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    handler: web::Data<RouteHandler>,
) -> Result<HttpResponse, GatewayError> {
    handler.handle(req, body).await
}

/// Forwards matched requests to overlay backends with retries.
#[derive(Clone)]
pub struct RouteHandler {
    state: SharedState,
    dialers: Arc<DialerCache>,
}

impl RouteHandler {
    pub fn new(state: SharedState, dialers: Arc<DialerCache>) -> Self {
        Self { state, dialers }
    }

    pub async fn handle(
        &self,
        req: HttpRequest,
        body: web::Bytes,
    ) -> Result<HttpResponse, GatewayError> {
        // In-flight requests keep the state snapshot they resolved; a
        // reload swapping the slot does not disturb them.
        let state = self.state.load_full();

        let path = req.path().to_string();
        let matched = state
            .matcher
            .find(req.method().as_str(), &path)
            .ok_or_else(|| GatewayError::RouteNotFound { path: path.clone() })?;
        let route = matched.route.clone();

        // Route-level auth overrides the global scheme; it is compiled into
        // the state only when the two differ, so an equal block is not
        // evaluated twice.
        if let Some(authenticator) = state.route_auth.get(&route.path) {
            authenticator.check(&path, req.headers())?;
        }

        let balancer = state
            .balancers
            .get(&route.path)
            .ok_or_else(|| GatewayError::NoBackend { path: path.clone() })?;
        let backend = balancer
            .select()
            .ok_or_else(|| GatewayError::NoBackend { path: path.clone() })?;

        let guard = ConnGuard::acquire(backend.clone());
        let target_path = rewrite(&path, &route, &matched.params);

        let max_attempts = route
            .retry
            .as_ref()
            .map(|r| r.max_attempts)
            .unwrap_or(backend.max_retries)
            .max(1);

        let mut last_error = String::from("no attempt executed");

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let backoff = match &route.retry {
                    Some(retry) => retry.backoff(attempt),
                    None => Duration::from_secs(1).saturating_mul(attempt),
                };
                sleep(backoff).await;
            }

            let client = match backend.client(&self.dialers).await {
                Ok(client) => client,
                Err(err) => {
                    warn!(
                        "Attempt {}/{} for {}: client construction failed: {}",
                        attempt + 1,
                        max_attempts,
                        backend.service,
                        err
                    );
                    backend.record_failure();
                    last_error = err.to_string();
                    continue;
                }
            };

            let upstream_req = build_upstream_request(&req, &body, &route, &backend, &target_path)?;
            debug!(
                "Forwarding {} {} to {}{}",
                req.method(),
                path,
                backend.authority(),
                target_path
            );

            match timeout(backend.timeout, client.request(upstream_req)).await {
                Err(_) => {
                    backend.record_failure();
                    last_error = format!(
                        "{} timed out after {:?}",
                        backend.service, backend.timeout
                    );
                    warn!(
                        "Attempt {}/{}: {}",
                        attempt + 1,
                        max_attempts,
                        last_error
                    );
                }
                Ok(Err(err)) => {
                    backend.record_failure();
                    last_error = err.to_string();
                    warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        max_attempts,
                        backend.service,
                        last_error
                    );
                }
                Ok(Ok(response)) => {
                    let status = response.status().as_u16();
                    let retryable = route
                        .retry
                        .as_ref()
                        .map(|r| r.is_retryable(status))
                        .unwrap_or(false);

                    if retryable {
                        backend.record_failure();
                        if attempt + 1 < max_attempts {
                            warn!(
                                "Attempt {}/{} for {}: retryable status {}",
                                attempt + 1,
                                max_attempts,
                                backend.service,
                                status
                            );
                            drop(response);
                            continue;
                        }
                        // Attempts exhausted: the client gets the last
                        // response's status rather than a synthesized 502.
                        return Ok(stream_response(response, guard));
                    }

                    backend.record_success();
                    return Ok(stream_response(response, guard));
                }
            }
        }

        Err(GatewayError::Upstream {
            message: last_error,
        })
    }
}

/// Builds the outbound request for one attempt.
///
/// The URI is origin-form (the overlay dialer decides where bytes go); the
/// authority travels in the `Host` header, which keeps the inbound value
/// unless the route rewrites it. Every value of every non-hop-by-hop
/// header is copied, and the standard forwarding trio is stamped on top.
fn build_upstream_request(
    req: &HttpRequest,
    body: &web::Bytes,
    route: &RouteConfig,
    backend: &Backend,
    target_path: &str,
) -> Result<http::Request<Full<Bytes>>, GatewayError> {
    let method = http::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let query = req.query_string();
    let uri = if query.is_empty() {
        target_path.to_string()
    } else {
        format!("{}?{}", target_path, query)
    };

    let mut request = http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(body.clone()))
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let headers = request.headers_mut();
    for (name, value) in req.headers() {
        if HOP_HEADERS.contains(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }

    let authority = backend.authority();
    let host_value = if route.rewrite_host {
        authority
    } else {
        req.connection_info().host().to_string()
    };
    if let Ok(value) = HeaderValue::from_str(&host_value) {
        headers.insert(http::header::HOST, value);
    }

    if let Some(peer) = req.peer_addr() {
        let ip = peer.ip().to_string();
        let forwarded_for = match req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
    }

    headers.insert(
        HeaderName::from_static("x-forwarded-proto"),
        HeaderValue::from_static("http"),
    );
    if let Ok(value) = HeaderValue::from_str(&req.connection_info().host().to_string()) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), value);
    }

    Ok(request)
}

/// Converts the upstream response into a streamed client response. Status
/// and headers pass through verbatim; the body is copied byte-for-byte
/// while the connection guard rides along until the stream is dropped.
fn stream_response(response: http::Response<Incoming>, guard: ConnGuard) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);

    let content_length = response
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    for (name, value) in response.headers() {
        if HOP_HEADERS.contains(name.as_str()) {
            continue;
        }
        if let Ok(value) = actix_web::http::header::HeaderValue::from_bytes(value.as_bytes()) {
            builder.append_header((name.as_str(), value));
        }
    }

    if let Some(len) = content_length {
        builder.no_chunking(len);
    }

    builder.streaming(UpstreamBody {
        body: response.into_body(),
        _guard: guard,
    })
}

/// Streams the upstream body to the client, holding the connection guard
/// so the active-connection decrement fires exactly when the body closes.
struct UpstreamBody {
    body: Incoming,
    _guard: ConnGuard,
}

impl futures::Stream for UpstreamBody {
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) => return Poll::Ready(Some(Ok(data))),
                    // Trailer frames are not forwarded.
                    Err(_) => continue,
                },
                Poll::Ready(Some(Err(err))) => {
                    return Poll::Ready(Some(Err(GatewayError::Upstream {
                        message: err.to_string(),
                    })))
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
