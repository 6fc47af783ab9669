//! Settings a [`RemoteIpResolver`](super::RemoteIpResolver) is built from.

use serde::{Deserialize, Serialize};

use super::{
    protocol::{DEFAULT_HTTP_PORT, DEFAULT_HTTPS_PORT},
    trust::DEFAULT_INTERNAL_PROXIES,
};

/// Forwarded-chain resolution settings, read from the `[remote_ip]` config
/// section.
///
/// ```toml
/// [remote_ip]
/// trusted_proxies = "proxy1|proxy2"
/// protocol_header = "X-Forwarded-Proto"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteIpSettings {
    /// Header carrying the legacy client chain.
    #[serde(default = "default_remote_ip_header")]
    pub remote_ip_header: String,

    /// Header the trusted proxies of a resolved chain are written to.
    #[serde(default = "default_proxies_header")]
    pub proxies_header: String,

    /// Header carrying the scheme claimed by the proxies (e.g. `X-Forwarded-Proto`).
    /// Unset means the scheme is never overridden in legacy mode.
    #[serde(default)]
    pub protocol_header: Option<String>,

    /// Value of `protocol_header` that marks a hop as HTTPS.
    #[serde(default = "default_https_value")]
    pub protocol_header_https_value: String,

    /// Header carrying the port claimed by the proxies (e.g. `X-Forwarded-Port`).
    #[serde(default)]
    pub port_header: Option<String>,

    /// Header carrying the host claimed by the proxies (e.g. `X-Forwarded-Host`).
    #[serde(default)]
    pub host_header: Option<String>,

    /// Regular expression matching internal proxies. These are trusted and
    /// dropped from rewritten chains. An empty string disables the pattern.
    #[serde(default = "default_internal_proxies")]
    pub internal_proxies: Option<String>,

    /// Regular expression matching trusted external proxies. These are
    /// recorded in `proxies_header`.
    #[serde(default)]
    pub trusted_proxies: Option<String>,

    /// Server port applied when the forwarded protocol is plain HTTP.
    #[serde(default = "default_http_server_port")]
    pub http_server_port: u16,

    /// Server port applied when the forwarded protocol is HTTPS.
    #[serde(default = "default_https_server_port")]
    pub https_server_port: u16,

    /// Read the RFC 7239 `Forwarded` header instead of the legacy headers.
    #[serde(default)]
    pub rfc7239_only: bool,

    /// Publish the resolved view for access logging.
    #[serde(default = "default_true")]
    pub request_attributes_enabled: bool,

    /// Also rewrite the local name from a forwarded host.
    #[serde(default)]
    pub change_local_name: bool,

    /// Also rewrite the local port from a forwarded port or protocol.
    #[serde(default)]
    pub change_local_port: bool,

    /// Reverse-resolve the client address into the remote host.
    #[serde(default)]
    pub enable_lookups: bool,
}

impl Default for RemoteIpSettings {
    fn default() -> Self {
        Self {
            remote_ip_header: default_remote_ip_header(),
            proxies_header: default_proxies_header(),
            protocol_header: None,
            protocol_header_https_value: default_https_value(),
            port_header: None,
            host_header: None,
            internal_proxies: default_internal_proxies(),
            trusted_proxies: None,
            http_server_port: default_http_server_port(),
            https_server_port: default_https_server_port(),
            rfc7239_only: false,
            request_attributes_enabled: true,
            change_local_name: false,
            change_local_port: false,
            enable_lookups: false,
        }
    }
}

fn default_remote_ip_header() -> String {
    "X-Forwarded-For".to_string()
}

fn default_proxies_header() -> String {
    "X-Forwarded-By".to_string()
}

fn default_https_value() -> String {
    "https".to_string()
}

fn default_internal_proxies() -> Option<String> {
    Some(DEFAULT_INTERNAL_PROXIES.to_string())
}

fn default_http_server_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_https_server_port() -> u16 {
    DEFAULT_HTTPS_PORT
}

fn default_true() -> bool {
    true
}
