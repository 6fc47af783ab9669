//! Proxy trust classification.
//!
//! Two independent patterns decide how a hop is treated during the chain walk:
//! - `internal`: part of our own infrastructure, dropped from rewritten chains
//! - `trusted`: a credible external relay, kept in the proxies chain
//!
//! Both are matched against the whole address string. A missing pattern never
//! matches, so an unset `trusted` pattern means no external hop is trusted.

use regex::Regex;

use super::ForwardedError;

/// Default internal proxies: RFC 1918 ranges, loopback, link-local and the
/// IPv6 loopback forms.
pub const DEFAULT_INTERNAL_PROXIES: &str = concat!(
    r"10\.\d{1,3}\.\d{1,3}\.\d{1,3}|",
    r"192\.168\.\d{1,3}\.\d{1,3}|",
    r"169\.254\.\d{1,3}\.\d{1,3}|",
    r"127\.\d{1,3}\.\d{1,3}\.\d{1,3}|",
    r"172\.1[6-9]\.\d{1,3}\.\d{1,3}|",
    r"172\.2[0-9]\.\d{1,3}\.\d{1,3}|",
    r"172\.3[0-1]\.\d{1,3}\.\d{1,3}|",
    r"0:0:0:0:0:0:0:1|::1",
);

/// Immutable two-pattern predicate over hop addresses.
///
/// Cheap to clone and safe to share across concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct TrustClassifier {
    internal: Option<Regex>,
    trusted: Option<Regex>,
}

impl TrustClassifier {
    /// Compile the classifier from optional pattern sources.
    ///
    /// An empty pattern is treated the same as an absent one.
    pub fn new(internal: Option<&str>, trusted: Option<&str>) -> Result<Self, ForwardedError> {
        Ok(Self {
            internal: compile("internal", internal)?,
            trusted: compile("trusted", trusted)?,
        })
    }

    /// Classifier with the default internal ranges and no trusted proxies.
    pub fn with_defaults() -> Self {
        Self {
            internal: Some(anchored(DEFAULT_INTERNAL_PROXIES).expect("default pattern is valid")),
            trusted: None,
        }
    }

    /// Returns true if the address belongs to an internal proxy.
    pub fn is_internal(&self, addr: &str) -> bool {
        self.internal.as_ref().is_some_and(|re| re.is_match(addr))
    }

    /// Returns true if the address belongs to a trusted proxy.
    pub fn is_trusted(&self, addr: &str) -> bool {
        self.trusted.as_ref().is_some_and(|re| re.is_match(addr))
    }

    /// The internal pattern as configured, without the anchoring wrapper.
    pub fn internal_pattern(&self) -> Option<&str> {
        self.internal.as_ref().map(unanchored)
    }

    /// The trusted pattern as configured, without the anchoring wrapper.
    pub fn trusted_pattern(&self) -> Option<&str> {
        self.trusted.as_ref().map(unanchored)
    }
}

fn compile(kind: &'static str, pattern: Option<&str>) -> Result<Option<Regex>, ForwardedError> {
    match pattern {
        None | Some("") => Ok(None),
        Some(p) => anchored(p)
            .map(Some)
            .map_err(|source| ForwardedError::InvalidPattern { kind, source }),
    }
}

// Full-string match: the alternation is grouped so `a|b` cannot match a prefix.
fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

fn unanchored(re: &Regex) -> &str {
    let s = re.as_str();
    &s[4..s.len() - 2]
}
