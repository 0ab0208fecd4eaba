//! Tower middleware that puts an [`AdmissionGate`] in front of a service.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::warn;

use crate::gate::{Admission, AdmissionGate, RequestInfo};
use crate::ratelimit::Decision;

/// Layer that wraps services with admission control.
#[derive(Clone)]
pub struct GateLayer {
    gate: Arc<AdmissionGate>,
}

impl GateLayer {
    /// Create a new gate layer.
    pub fn new(gate: Arc<AdmissionGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GateService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

/// Service produced by [`GateLayer`].
///
/// Admitted and exempt requests reach the inner service untouched. Rejected
/// requests are answered with `429 Too Many Requests` and never reach it.
#[derive(Clone)]
pub struct GateService<S> {
    inner: S,
    gate: Arc<AdmissionGate>,
}

impl<S> Service<Request<Body>> for GateService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        if peer.is_none() {
            warn!(path = %request.uri().path(), "Request has no peer address");
        }

        let admission = self.gate.check(&RequestInfo {
            peer,
            headers: request.headers(),
            path: request.uri().path(),
        });

        if let Admission::Rejected(decision) = admission {
            return Box::pin(async move { Ok(too_many_requests(&decision)) });
        }

        // The clone taken by poll_ready is the one that is ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(request).await })
    }
}

/// Build the rejection response.
pub fn too_many_requests(decision: &Decision) -> Response {
    let body = serde_json::json!({
        "error": "too many requests",
        "limit": decision.limit,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();

    if let Some(retry_after) = decision.retry_after {
        let secs = retry_after_secs(retry_after);
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }

    response
}

/// Whole seconds for `Retry-After`, rounded up so clients never retry early.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
