//! Scheme and port derivation from a forwarded protocol claim.

use super::exchange::Exchange;

/// Default port applied when a request is considered plain HTTP.
pub const DEFAULT_HTTP_PORT: u16 = 80;
/// Default port applied when a request is considered HTTPS.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Turns protocol claims into scheme, secure flag and server port.
#[derive(Debug, Clone)]
pub struct ProtocolResolver {
    pub https_value: String,
    pub http_server_port: u16,
    pub https_server_port: u16,
    pub change_local_port: bool,
}

impl Default for ProtocolResolver {
    fn default() -> Self {
        Self {
            https_value: "https".to_string(),
            http_server_port: DEFAULT_HTTP_PORT,
            https_server_port: DEFAULT_HTTPS_PORT,
            change_local_port: false,
        }
    }
}

impl ProtocolResolver {
    /// A request is secure only if every hop claims the https value.
    ///
    /// One `http` hop anywhere in the chain means the client leg may have
    /// been plain text.
    pub fn is_secure<S: AsRef<str>>(&self, claims: &[S]) -> bool {
        !claims.is_empty()
            && claims
                .iter()
                .all(|claim| claim.as_ref().eq_ignore_ascii_case(&self.https_value))
    }

    /// Apply scheme, secure flag and the matching default port.
    pub fn apply<S: AsRef<str>>(&self, exchange: &mut Exchange, claims: &[S]) {
        let (secure, scheme, port) = if self.is_secure(claims) {
            (true, "https", self.https_server_port)
        } else {
            (false, "http", self.http_server_port)
        };

        exchange.secure = secure;
        exchange.scheme = scheme.to_string();
        exchange.set_port(port, self.change_local_port);
    }

    /// Apply an explicit port claim. Non-numeric values are logged and ignored.
    pub fn apply_port(&self, exchange: &mut Exchange, claim: &str, source: &str) -> bool {
        match claim.trim().parse::<u16>() {
            Ok(port) => {
                exchange.set_port(port, self.change_local_port);
                true
            }
            Err(e) => {
                tracing::debug!(
                    port = %claim,
                    source = %source,
                    error = %e,
                    "Ignoring invalid forwarded port"
                );
                false
            }
        }
    }
}
