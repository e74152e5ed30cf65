//! Per-request metrics and access logging.
//!
//! Middleware here only sees the response head; the body streams to the
//! client afterward. To record status, byte count, and latency without
//! buffering, the response body is wrapped in an observer that counts data
//! frames as they are polled through and emits the metrics and the access
//! log record exactly once, when the body completes or is dropped (client
//! disconnect included).

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;
use http_body::{Body as HttpBody, Frame, SizeHint};

use crate::http::request_id::RequestId;

/// Name of the matched route, attached to response extensions by the
/// gateway handler (or by admin handlers). Requests that match nothing are
/// labeled "unknown".
#[derive(Debug, Clone)]
pub struct RouteLabel(pub String);

pub const UNKNOWN_ROUTE: &str = "unknown";

/// Wrap the response body so completion records metrics and one access-log
/// line.
pub async fn observe(
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let rid = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();

    let response = next.run(req).await;

    let route = response
        .extensions()
        .get::<RouteLabel>()
        .map(|l| l.0.clone())
        .unwrap_or_else(|| UNKNOWN_ROUTE.to_string());
    let status = response.status().as_u16();

    let (parts, body) = response.into_parts();
    let observed = ObservedBody {
        inner: body,
        observer: Some(ResponseObserver {
            rid,
            route,
            method,
            path,
            remote: remote.to_string(),
            status,
            bytes: 0,
            start,
        }),
    };
    Response::from_parts(parts, Body::new(observed))
}

struct ResponseObserver {
    rid: String,
    route: String,
    method: String,
    path: String,
    remote: String,
    status: u16,
    bytes: u64,
    start: Instant,
}

impl Drop for ResponseObserver {
    fn drop(&mut self) {
        let duration = self.start.elapsed();

        metrics::counter!(
            "apigw_http_requests_total",
            "route" => self.route.clone(),
            "method" => self.method.clone(),
            "code" => self.status.to_string()
        )
        .increment(1);
        metrics::histogram!(
            "apigw_http_request_duration_seconds",
            "route" => self.route.clone(),
            "method" => self.method.clone()
        )
        .record(duration.as_secs_f64());

        tracing::info!(
            target: "access",
            rid = %self.rid,
            route = %self.route,
            method = %self.method,
            path = %self.path,
            remote = %self.remote,
            status = self.status,
            bytes = self.bytes,
            duration_ms = duration.as_millis() as u64,
            "http_request"
        );
    }
}

struct ObservedBody {
    inner: Body,
    observer: Option<ResponseObserver>,
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(obs), Some(data)) = (this.observer.as_mut(), frame.data_ref()) {
                    obs.bytes += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(None) => {
                // End of stream: emit the record now rather than at drop.
                this.observer.take();
                Poll::Ready(None)
            }
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
