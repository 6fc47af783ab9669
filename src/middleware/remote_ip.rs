//! Axum middleware that resolves the originating client before routing.
//!
//! The connecting peer comes from `ConnectInfo<SocketAddr>`, so the router
//! must be served with `into_make_service_with_connect_info::<SocketAddr>()`.
//! Requests without connection info are passed through untouched.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use http::{HeaderMap, header::HOST};
use serde::Serialize;

use crate::forwarded::{
    DEFAULT_HTTP_PORT, DEFAULT_HTTPS_PORT, Exchange, HostLiteral, HostnameLookup,
    RemoteIpResolver, RequestAttributes,
};

/// Shared state for [`remote_ip_middleware`].
#[derive(Clone)]
pub struct RemoteIpState {
    resolver: Arc<RemoteIpResolver>,
    lookup: Option<Arc<dyn HostnameLookup>>,
    local_addr: Option<SocketAddr>,
}

impl RemoteIpState {
    pub fn new(resolver: RemoteIpResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
            lookup: None,
            local_addr: None,
        }
    }

    /// Reverse-resolve clients with `lookup` when the resolver has lookups enabled.
    pub fn with_lookup(mut self, lookup: Arc<dyn HostnameLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Listener address, used for the local view and as the server name
    /// fallback when a request carries no `Host`.
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn resolver(&self) -> &RemoteIpResolver {
        &self.resolver
    }

    /// The configured lookup, if the resolver has lookups enabled.
    pub fn lookup(&self) -> Option<&dyn HostnameLookup> {
        self.lookup
            .as_deref()
            .filter(|_| self.resolver.enable_lookups())
    }
}

/// The resolved view of a request, inserted into its extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardedRequest {
    pub remote_addr: String,
    pub remote_host: String,
    pub scheme: String,
    pub secure: bool,
    pub server_name: String,
    pub server_port: u16,
    pub local_port: u16,
    /// Whether the peer was a known proxy and its forwarded headers were honoured.
    pub forwarded: bool,
}

impl From<&Exchange> for ForwardedRequest {
    fn from(exchange: &Exchange) -> Self {
        Self {
            remote_addr: exchange.remote_addr.clone(),
            remote_host: exchange.remote_host.clone(),
            scheme: exchange.scheme.clone(),
            secure: exchange.secure,
            server_name: exchange.server_name.clone(),
            server_port: exchange.server_port,
            local_port: exchange.local_port,
            forwarded: exchange.attributes.forwarded,
        }
    }
}

/// Resolve the client from forwarded headers and publish the result.
///
/// Rewritten forwarded headers replace the inbound ones, and
/// [`ForwardedRequest`] plus, when enabled,
/// [`AccessLogAttributes`](crate::forwarded::AccessLogAttributes) are
/// inserted into the request extensions.
pub async fn remote_ip_middleware(
    State(state): State<RemoteIpState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>().copied() else {
        tracing::debug!(
            path = %req.uri().path(),
            "No connection info on request, skipping remote ip resolution"
        );
        return next.run(req).await;
    };

    let mut exchange = exchange_from_request(&mut req, peer, state.local_addr);
    let resolver = state.resolver();

    let snapshot = match state.lookup() {
        Some(lookup) => resolver.enter_with_lookup(&mut exchange, lookup).await,
        None => resolver.enter(&mut exchange),
    };
    // The request moves into `next`; the resolved view is never restored.
    resolver.exit(&mut exchange, snapshot, false);

    let forwarded = ForwardedRequest::from(&exchange);
    *req.headers_mut() = std::mem::take(&mut exchange.headers);
    req.extensions_mut().insert(forwarded);
    if let Some(access_log) = exchange.attributes.access_log.take() {
        req.extensions_mut().insert(access_log);
    }

    next.run(req).await
}

/// Build an [`Exchange`] for `req`, moving its headers into the exchange.
fn exchange_from_request(req: &mut Request, peer: SocketAddr, local_addr: Option<SocketAddr>) -> Exchange {
    let scheme = req.uri().scheme_str().unwrap_or("http").to_ascii_lowercase();
    let secure = scheme == "https";
    let default_port = if secure { DEFAULT_HTTPS_PORT } else { DEFAULT_HTTP_PORT };

    let authority = host_authority(req.headers())
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()));

    let (server_name, server_port) = match authority.as_deref().map(HostLiteral::parse) {
        Some(Ok(literal)) => (
            literal.host.to_string(),
            literal.port_number().unwrap_or(default_port),
        ),
        Some(Err(e)) => {
            tracing::debug!(error = %e, "Ignoring invalid Host header");
            fallback_server(local_addr, default_port)
        }
        None => fallback_server(local_addr, default_port),
    };

    let remote_addr = peer.ip().to_string();
    Exchange {
        remote_host: remote_addr.clone(),
        remote_addr,
        scheme,
        secure,
        server_name,
        local_name: local_addr.map(|addr| addr.ip().to_string()),
        server_port,
        local_port: local_addr.map_or(server_port, |addr| addr.port()),
        protocol: format!("{:?}", req.version()),
        request_uri: req.uri().path().to_string(),
        headers: std::mem::take(req.headers_mut()),
        attributes: RequestAttributes::default(),
    }
}

fn host_authority(headers: &HeaderMap) -> Option<String> {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn fallback_server(local_addr: Option<SocketAddr>, default_port: u16) -> (String, u16) {
    match local_addr {
        Some(addr) => (addr.ip().to_string(), addr.port()),
        None => ("localhost".to_string(), default_port),
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use axum::{Extension, Json, Router, body::Body, routing::get};
    use http::{HeaderMap, Request as HttpRequest, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::forwarded::{AccessLogAttributes, RemoteIpSettings};

    #[derive(Debug, serde::Deserialize)]
    struct Echo {
        remote_addr: String,
        scheme: String,
        secure: bool,
        server_name: String,
        server_port: u16,
        forwarded: bool,
        forwarded_for: Option<String>,
        forwarded_by: Option<String>,
        access_log_addr: Option<String>,
    }

    async fn echo(
        Extension(view): Extension<ForwardedRequest>,
        access_log: Option<Extension<AccessLogAttributes>>,
        headers: HeaderMap,
    ) -> Json<serde_json::Value> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Json(serde_json::json!({
            "remote_addr": view.remote_addr,
            "scheme": view.scheme,
            "secure": view.secure,
            "server_name": view.server_name,
            "server_port": view.server_port,
            "forwarded": view.forwarded,
            "forwarded_for": header("x-forwarded-for"),
            "forwarded_by": header("x-forwarded-by"),
            "access_log_addr": access_log.map(|Extension(a)| a.remote_addr),
        }))
    }

    fn app(config: RemoteIpSettings) -> Router {
        let state = RemoteIpState::new(RemoteIpResolver::new(&config).unwrap());
        Router::new()
            .route("/echo", get(echo))
            .layer(axum::middleware::from_fn_with_state(state, remote_ip_middleware))
    }

    fn config() -> RemoteIpSettings {
        RemoteIpSettings {
            trusted_proxies: Some("proxy1|proxy2".to_string()),
            protocol_header: Some("X-Forwarded-Proto".to_string()),
            ..Default::default()
        }
    }

    fn request(peer: &str, headers: Vec<(&str, &str)>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method("GET").uri("/echo");
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let mut req = builder.body(Body::empty()).unwrap();

        let ip: IpAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(SocketAddr::new(ip, 12345)));
        req
    }

    async fn call(app: Router, req: HttpRequest<Body>) -> Echo {
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_resolves_client_behind_internal_proxy() {
        let req = request(
            "10.0.0.5",
            vec![
                ("Host", "public.example.com"),
                ("X-Forwarded-For", "140.211.11.130, proxy1, proxy2"),
                ("X-Forwarded-Proto", "https"),
            ],
        );
        let echo = call(app(config()), req).await;

        assert_eq!(echo.remote_addr, "140.211.11.130");
        assert_eq!(echo.scheme, "https");
        assert!(echo.secure);
        assert_eq!(echo.server_name, "public.example.com");
        assert_eq!(echo.server_port, 443);
        assert!(echo.forwarded);
        assert_eq!(echo.forwarded_for, None);
        assert_eq!(echo.forwarded_by.as_deref(), Some("proxy1, proxy2"));
        assert_eq!(echo.access_log_addr.as_deref(), Some("140.211.11.130"));
    }

    #[tokio::test]
    async fn test_untrusted_peer_headers_ignored() {
        let req = request(
            "203.0.113.50",
            vec![
                ("Host", "backend:8080"),
                ("X-Forwarded-For", "1.2.3.4"),
                ("X-Forwarded-Proto", "https"),
            ],
        );
        let echo = call(app(config()), req).await;

        assert_eq!(echo.remote_addr, "203.0.113.50");
        assert_eq!(echo.scheme, "http");
        assert_eq!(echo.server_name, "backend");
        assert_eq!(echo.server_port, 8080);
        assert!(!echo.forwarded);
        assert_eq!(echo.forwarded_for.as_deref(), Some("1.2.3.4"));
    }

    #[tokio::test]
    async fn test_ipv6_loopback_peer_is_internal() {
        let req = request("::1", vec![("X-Forwarded-For", "2001:db8::7")]);
        let echo = call(app(config()), req).await;

        assert_eq!(echo.remote_addr, "2001:db8::7");
    }

    #[tokio::test]
    async fn test_access_log_extension_disabled() {
        let config = RemoteIpSettings {
            request_attributes_enabled: false,
            ..config()
        };
        let req = request("10.0.0.5", vec![("X-Forwarded-For", "140.211.11.130")]);
        let echo = call(app(config), req).await;

        assert_eq!(echo.remote_addr, "140.211.11.130");
        assert_eq!(echo.access_log_addr, None);
    }

    #[tokio::test]
    async fn test_missing_connect_info_passes_through() {
        let app = Router::new()
            .route("/plain", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                RemoteIpState::new(RemoteIpResolver::new(&config()).unwrap()),
                remote_ip_middleware,
            ));

        let req = HttpRequest::builder()
            .uri("/plain")
            .header("X-Forwarded-For", "1.2.3.4")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_exchange_from_request_defaults() {
        let mut req = HttpRequest::builder()
            .uri("/path?q=1")
            .body(Body::empty())
            .unwrap();
        let peer: SocketAddr = "192.168.1.20:5555".parse().unwrap();
        let local: SocketAddr = "10.1.1.1:8080".parse().unwrap();

        let exchange = exchange_from_request(&mut req, peer, Some(local));
        assert_eq!(exchange.remote_addr, "192.168.1.20");
        assert_eq!(exchange.server_name, "10.1.1.1");
        assert_eq!(exchange.server_port, 8080);
        assert_eq!(exchange.local_port, 8080);
        assert_eq!(exchange.protocol, "HTTP/1.1");
        assert_eq!(exchange.request_uri, "/path");
    }

    #[test]
    fn test_exchange_from_request_bracketed_host() {
        let mut req = HttpRequest::builder()
            .uri("/")
            .header("Host", "[2001:db8::1]:8443")
            .body(Body::empty())
            .unwrap();
        let peer: SocketAddr = "[::1]:5555".parse().unwrap();

        let exchange = exchange_from_request(&mut req, peer, None);
        assert_eq!(exchange.remote_addr, "::1");
        assert_eq!(exchange.server_name, "[2001:db8::1]");
        assert_eq!(exchange.server_port, 8443);
        assert!(req.headers().is_empty());
    }
}
