//! Upstream client construction and request forwarding.

use std::net::IpAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme, Uri};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::schema::UpstreamConfig;
use crate::http::respond;
use crate::routing::Route;

pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Build the shared upstream client with hardened defaults.
pub fn build_client(cfg: &UpstreamConfig) -> HttpClient {
    // Multiple transitive deps pull in different rustls crypto provider
    // backends, so rustls can't auto-select one; pick one explicitly.
    // Safe to call more than once (e.g. across tests in the same process).
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(Duration::from_secs(cfg.dial_timeout_seconds)));
    http.set_keepalive(Some(Duration::from_secs(30)));
    http.enforce_http(false);

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(cfg.idle_conn_timeout_seconds))
        .pool_max_idle_per_host(cfg.max_idle_conns_per_host)
        .build(https)
}

/// Forward the request to the route's upstream.
///
/// `path` is the request path after strip-prefix rewriting. All failure
/// modes are mapped to a response here; the caller only ever sees a status
/// code, which is what feeds the circuit breaker.
pub async fn forward(
    client: &HttpClient,
    route: &Route,
    response_header_timeout: Duration,
    client_ip: IpAddr,
    path: &str,
    req: Request<Body>,
) -> Response<Body> {
    let (mut parts, body) = req.into_parts();

    let target_path = join_paths(route.upstream.path(), path);
    let path_and_query = match parts.uri.query() {
        Some(q) => format!("{target_path}?{q}"),
        None => target_path,
    };

    let scheme = if route.upstream.scheme() == "https" {
        Scheme::HTTPS
    } else {
        Scheme::HTTP
    };
    let authority = match upstream_authority(route) {
        Some(a) => a,
        None => {
            tracing::error!(route = %route.name, upstream = %route.upstream, "invalid upstream authority");
            return respond::bad_gateway("invalid upstream address");
        }
    };

    let uri = Uri::builder()
        .scheme(scheme)
        .authority(authority.clone())
        .path_and_query(match PathAndQuery::try_from(path_and_query.as_str()) {
            Ok(pq) => pq,
            Err(_) => return respond::bad_gateway("invalid rewritten path"),
        })
        .build();
    parts.uri = match uri {
        Ok(u) => u,
        Err(_) => return respond::bad_gateway("uri rewrite failed"),
    };

    scrub_hop_by_hop(&mut parts.headers);
    parts.headers.remove(header::HOST);
    if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
        parts.headers.insert(header::HOST, host);
    }
    append_forwarded_for(&mut parts.headers, client_ip);

    let outbound = Request::from_parts(parts, body);

    let result = tokio::time::timeout(response_header_timeout, client.request(outbound)).await;
    match result {
        Err(_) => respond::bad_gateway("upstream response header timeout"),
        Ok(Err(err)) => {
            if is_body_limit_error(&err) {
                return respond::request_too_large();
            }
            tracing::warn!(route = %route.name, error = %err, "upstream request failed");
            respond::bad_gateway(&err.to_string())
        }
        Ok(Ok(response)) => {
            let mut response = response.map(Body::new);
            scrub_hop_by_hop(response.headers_mut());
            response
        }
    }
}

fn upstream_authority(route: &Route) -> Option<Authority> {
    let host = route.upstream.host_str()?;
    let authority = match route.upstream.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Authority::try_from(authority.as_str()).ok()
}

/// Join the upstream base path with the request path, collapsing the slash
/// at the seam.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn scrub_hop_by_hop(headers: &mut HeaderMap) {
    // Connection may name additional per-hop headers.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let prior = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let value = match prior {
        Some(prior) if !prior.is_empty() => format!("{prior}, {client_ip}"),
        _ => client_ip.to_string(),
    };
    if let Ok(v) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", v);
    }
}

/// Walk the error chain looking for the body-length cap.
fn is_body_limit_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}
