//! Configuration for the remote-ip resolver and its server.
//!
//! Configured via a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [remote_ip]
//! trusted_proxies = "${TRUSTED_PROXIES}"
//! protocol_header = "X-Forwarded-Proto"
//!
//! [observability.logging]
//! level = "debug"
//! format = "json"
//! ```

mod observability;
mod server;

use std::{path::Path, sync::LazyLock};

pub use observability::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
pub use server::*;

use crate::forwarded::{ForwardedError, RemoteIpResolver, RemoteIpSettings};

/// Root configuration.
///
/// All sections are optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Forwarded-chain resolution.
    #[serde(default)]
    pub remote_ip: RemoteIpSettings,

    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: Config = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the resolver described by the `[remote_ip]` section.
    pub fn resolver(&self) -> Result<RemoteIpResolver, ConfigError> {
        Ok(RemoteIpResolver::new(&self.remote_ip)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.resolver()?;

        if self
            .remote_ip
            .proxies_header
            .eq_ignore_ascii_case(&self.remote_ip.remote_ip_header)
        {
            return Err(ConfigError::Validation(
                "remote_ip.proxies_header must differ from remote_ip.remote_ip_header".into(),
            ));
        }

        if self.remote_ip.trusted_proxies.is_none() && self.remote_ip.internal_proxies.is_none() {
            tracing::warn!(
                "Neither remote_ip.internal_proxies nor remote_ip.trusted_proxies is set. \
                 Forwarded headers will never be honoured."
            );
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid remote_ip configuration: {0}")]
    RemoteIp(#[from] ForwardedError),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips variables that appear after a `#` on the same line.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.remote_ip.remote_ip_header, "X-Forwarded-For");
        assert_eq!(config.remote_ip.proxies_header, "X-Forwarded-By");
        assert_eq!(config.remote_ip.protocol_header, None);
        assert_eq!(config.remote_ip.https_server_port, 443);
        assert!(config.remote_ip.request_attributes_enabled);
        assert!(config.remote_ip.internal_proxies.is_some());
        assert_eq!(config.observability.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [remote_ip]
            trusted_proxies = "proxy1|proxy2"
            protocol_header = "X-Forwarded-Proto"
            port_header = "X-Forwarded-Port"
            host_header = "X-Forwarded-Host"
            rfc7239_only = true
            change_local_port = true

            [observability.logging]
            level = "debug"
            format = "json"
        "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_addr().to_string(), "127.0.0.1:9000");
        assert_eq!(config.remote_ip.trusted_proxies.as_deref(), Some("proxy1|proxy2"));
        assert!(config.remote_ip.rfc7239_only);
        assert_eq!(config.observability.logging.format, LogFormat::Json);

        let resolver = config.resolver().unwrap();
        assert!(resolver.classifier().is_trusted("proxy2"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Config::from_str("[remote_ip]\ntrusted = \"proxy1\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = Config::from_str("[remote_ip]\ntrusted_proxies = \"(unclosed\"").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::RemoteIp(ForwardedError::InvalidPattern { kind: "trusted", .. })
        ));
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let err = Config::from_str("[remote_ip]\nport_header = \"X Forwarded Port\"").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::RemoteIp(ForwardedError::InvalidHeaderName { setting: "port_header", .. })
        ));
    }

    #[test]
    fn test_zero_port_rejected() {
        let err = Config::from_str("[remote_ip]\nhttp_server_port = 0").unwrap_err();
        assert!(matches!(err, ConfigError::RemoteIp(ForwardedError::InvalidSetting { .. })));
    }

    #[test]
    fn test_same_chain_headers_rejected() {
        let err = Config::from_str("[remote_ip]\nproxies_header = \"x-forwarded-for\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_empty_internal_pattern_disables_it() {
        let config = Config::from_str("[remote_ip]\ninternal_proxies = \"\"").unwrap();
        let resolver = config.resolver().unwrap();
        assert!(!resolver.classifier().is_internal("127.0.0.1"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9191").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9191);
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/nonexistent/remote-ip.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, _)));
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_TRUSTED_PROXIES", Some("proxy1|proxy2"), || {
            let config =
                Config::from_str("[remote_ip]\ntrusted_proxies = \"${TEST_TRUSTED_PROXIES}\"")
                    .unwrap();
            assert_eq!(config.remote_ip.trusted_proxies.as_deref(), Some("proxy1|proxy2"));
        });
    }

    #[test]
    fn test_missing_env_var() {
        temp_env::with_var_unset("TEST_MISSING_VAR", || {
            let err = Config::from_str("[remote_ip]\ntrusted_proxies = \"${TEST_MISSING_VAR}\"")
                .unwrap_err();
            assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "TEST_MISSING_VAR"));
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# trusted_proxies = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# trusted_proxies = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_before_comment_expanded() {
        temp_env::with_var("TEST_BEFORE_COMMENT", Some("expanded"), || {
            let result =
                expand_env_vars("key = \"${TEST_BEFORE_COMMENT}\" # ${NONEXISTENT_VAR}").unwrap();
            assert_eq!(result, "key = \"expanded\" # ${NONEXISTENT_VAR}");
        });
    }

    #[test]
    fn test_multiline_keeps_trailing_newline() {
        let input = "[server]\nport = 1\n";
        assert_eq!(expand_env_vars(input).unwrap(), input);
    }
}
