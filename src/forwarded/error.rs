/// Errors raised while building a resolver from configuration.
///
/// Nothing in here is produced while handling a request: header content is
/// attacker-controlled and malformed values are logged and skipped instead.
#[derive(Debug, thiserror::Error)]
pub enum ForwardedError {
    #[error("Invalid {kind} proxies pattern: {source}")]
    InvalidPattern {
        kind: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid header name for {setting}: {value}")]
    InvalidHeaderName { setting: &'static str, value: String },

    #[error("Invalid setting {setting}: {message}")]
    InvalidSetting {
        setting: &'static str,
        message: String,
    },
}
