//! Reverse proxy in front of the container runtime API
//!
//! Every inbound request is forwarded to the runtime with its method, path,
//! query, headers and body intact. Only the scheme and authority change.
//! Bodies are streamed in both directions, so image uploads and build
//! contexts of any size pass through.
//! The mapping from inbound to outbound request is a plain function
//! (`outbound_request`); the observer callback is invoked before forwarding
//! and never touches the request.

use crate::observability::{AgentMetrics, StructuredLogger};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use reqwest::Client;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};
use url::Url;

/// Headers that describe a single connection and are regenerated per hop
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// What the observer learns about each inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub source: IpAddr,
    pub method: Method,
    pub path: String,
}

/// Callback invoked with every inbound request before it is forwarded
pub type RequestObserver = Arc<dyn Fn(&RequestRecord) + Send + Sync>;

/// Observer that writes `Request from <ip>: <path>` to the log
pub fn logging_observer(logger: StructuredLogger) -> RequestObserver {
    Arc::new(move |record: &RequestRecord| {
        logger.log_proxy_request(&record.source, &record.method, &record.path);
    })
}

/// Request as it will be sent to the runtime
#[derive(Debug)]
pub struct OutboundRequest<B> {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: B,
}

/// Rewrite an inbound URI onto the upstream base URL
///
/// A path prefix on the upstream is kept and joined with a single slash.
pub fn forward_url(upstream: &Url, uri: &Uri) -> Url {
    let mut url = upstream.clone();

    let base = upstream.path().trim_end_matches('/');
    let path = uri.path();
    let joined = if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    };
    url.set_path(&joined);

    let query = match (upstream.query(), uri.query()) {
        (Some(a), Some(b)) if !a.is_empty() => Some(format!("{}&{}", a, b)),
        (Some(a), None) => Some(a.to_string()),
        (_, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    };
    url.set_query(query.as_deref());

    url
}

/// Copy headers minus `Host` and hop-by-hop headers
pub fn forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    forwarded.remove(header::HOST);
    strip_hop_by_hop(&mut forwarded);
    forwarded
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Connection may name additional per-hop headers
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

/// Map an inbound request onto the upstream runtime
pub fn outbound_request<B>(upstream: &Url, parts: &Parts, body: B) -> OutboundRequest<B> {
    OutboundRequest {
        method: parts.method.clone(),
        url: forward_url(upstream, &parts.uri),
        headers: forward_headers(&parts.headers),
        body,
    }
}

#[derive(Error, Debug)]
enum ProxyError {
    #[error("runtime unreachable: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}

/// Proxy settings
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Runtime API base URL
    pub upstream: Url,
    /// Timeout for establishing the upstream connection
    pub connect_timeout: Duration,
}

impl ProxyConfig {
    pub fn new(upstream: Url) -> Self {
        Self {
            upstream,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared state of the proxy handler
pub struct ProxyState {
    config: ProxyConfig,
    client: Client,
    observer: RequestObserver,
    metrics: AgentMetrics,
}

impl ProxyState {
    pub fn new(config: ProxyConfig, observer: RequestObserver) -> Result<Self> {
        // No overall timeout: attach, logs and events streams stay open
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .context("Failed to create proxy HTTP client")?;

        Ok(Self {
            config,
            client,
            observer,
            metrics: AgentMetrics::new(),
        })
    }

    async fn forward(&self, request: Request) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let body = reqwest::Body::wrap_stream(body.into_data_stream());

        let outbound = outbound_request(&self.config.upstream, &parts, body);
        let upstream = self
            .client
            .request(outbound.method, outbound.url)
            .headers(outbound.headers)
            .body(outbound.body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let record = RequestRecord {
        source: remote.ip(),
        method: request.method().clone(),
        path: request.uri().path().to_string(),
    };
    (state.observer)(&record);
    state.metrics.inc_proxied_requests();

    match state.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(source = %record.source, path = %record.path, error = %e, "Proxy request failed");
            state.metrics.inc_proxy_errors();
            e.into_response()
        }
    }
}

/// Create the proxy router; every route falls through to the runtime
pub fn create_router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}

/// Bind the proxy port on all interfaces
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind proxy port {}", port))
}

/// Serve the proxy on a bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<ProxyState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let upstream = state.config.upstream.clone();
    let app = create_router(state);
    info!(addr = %listener.local_addr()?, upstream = %upstream, "Starting runtime proxy");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
