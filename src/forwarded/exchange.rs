//! The request view the resolver reads and rewrites, and its snapshot.

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

/// Request-scoped view of the connection and routing facts a forwarded chain
/// can override.
///
/// The server adapter fills this from its own request type before handing it
/// to the resolver, and reads it back afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    /// Address of the immediate network peer (or the resolved client).
    pub remote_addr: String,
    pub remote_host: String,
    pub scheme: String,
    pub secure: bool,
    pub server_name: String,
    pub local_name: Option<String>,
    pub server_port: u16,
    pub local_port: u16,
    /// Protocol version string, e.g. `HTTP/1.1`.
    pub protocol: String,
    /// Request URI, used for diagnostics only.
    pub request_uri: String,
    pub headers: HeaderMap,
    /// Outputs written by the resolver. Not part of the snapshot.
    pub attributes: RequestAttributes,
}

impl Exchange {
    /// Set the server port, and the local port as well when requested.
    pub fn set_port(&mut self, port: u16, change_local_port: bool) {
        self.server_port = port;
        if change_local_port {
            self.local_port = port;
        }
    }

    /// A plain HTTP/1.1 exchange from `remote_addr` to `localhost:80`.
    pub fn new(remote_addr: impl Into<String>) -> Self {
        let remote_addr = remote_addr.into();
        Self {
            remote_host: remote_addr.clone(),
            remote_addr,
            scheme: "http".to_string(),
            secure: false,
            server_name: "localhost".to_string(),
            local_name: None,
            server_port: 80,
            local_port: 80,
            protocol: "HTTP/1.1".to_string(),
            request_uri: "/".to_string(),
            headers: HeaderMap::new(),
            attributes: RequestAttributes::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(remote_addr: &str) -> Self {
        Self {
            server_port: 8080,
            local_port: 8080,
            request_uri: "/test".to_string(),
            ..Self::new(remote_addr)
        }
    }
}

/// Attributes published for downstream consumers such as access loggers.
///
/// These survive restoration: loggers read them after the downstream
/// handler has returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAttributes {
    /// Set when the peer was internal or trusted and forwarded headers were honoured.
    pub forwarded: bool,
    pub access_log: Option<AccessLogAttributes>,
}

/// The resolved view as an access log should record it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessLogAttributes {
    pub remote_addr: String,
    pub remote_host: String,
    pub protocol: String,
    pub server_name: String,
    pub server_port: u16,
}

impl AccessLogAttributes {
    pub fn from_exchange(exchange: &Exchange) -> Self {
        Self {
            remote_addr: exchange.remote_addr.clone(),
            remote_host: exchange.remote_host.clone(),
            protocol: exchange.protocol.clone(),
            server_name: exchange.server_name.clone(),
            server_port: exchange.server_port,
        }
    }
}

/// State captured before any override is applied.
///
/// Header values are kept verbatim, every occurrence in order, so that a
/// restore reproduces the inbound headers exactly.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    remote_addr: String,
    remote_host: String,
    scheme: String,
    secure: bool,
    server_name: String,
    local_name: Option<Option<String>>,
    server_port: u16,
    local_port: u16,
    headers: Vec<(HeaderName, Vec<HeaderValue>)>,
}

impl RequestSnapshot {
    /// Capture the exchange. `local_name` is only captured when it may be
    /// rewritten; `headers` lists the header names that may be rewritten.
    pub fn capture(exchange: &Exchange, capture_local_name: bool, headers: &[&HeaderName]) -> Self {
        Self {
            remote_addr: exchange.remote_addr.clone(),
            remote_host: exchange.remote_host.clone(),
            scheme: exchange.scheme.clone(),
            secure: exchange.secure,
            server_name: exchange.server_name.clone(),
            local_name: capture_local_name.then(|| exchange.local_name.clone()),
            server_port: exchange.server_port,
            local_port: exchange.local_port,
            headers: headers
                .iter()
                .map(|&name| {
                    let values = exchange.headers.get_all(name).iter().cloned().collect();
                    (name.clone(), values)
                })
                .collect(),
        }
    }

    /// Put every captured field and header back.
    pub fn restore(self, exchange: &mut Exchange) {
        exchange.remote_addr = self.remote_addr;
        exchange.remote_host = self.remote_host;
        exchange.scheme = self.scheme;
        exchange.secure = self.secure;
        exchange.server_name = self.server_name;
        if let Some(local_name) = self.local_name {
            exchange.local_name = local_name;
        }
        exchange.server_port = self.server_port;
        exchange.local_port = self.local_port;

        for (name, values) in self.headers {
            exchange.headers.remove(&name);
            for value in values {
                exchange.headers.append(name.clone(), value);
            }
        }
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }
}
