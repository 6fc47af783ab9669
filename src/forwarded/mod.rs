//! Forwarded-chain client resolution.
//!
//! Requests that reach us through reverse proxies carry the original client
//! address in attacker-controllable headers, either the legacy
//! `X-Forwarded-For` list or the RFC 7239 `Forwarded` header. This module
//! walks those chains from the nearest hop outwards and only believes hops
//! that match the configured internal or trusted proxy patterns.
//!
//! The core works on an [`Exchange`], a plain view of the request, so it can
//! be driven by the axum middleware in [`crate::middleware`] or by anything
//! else that can fill one in.

mod chain;
mod error;
mod exchange;
mod host;
pub mod legacy;
mod lookup;
mod protocol;
mod resolver;
pub mod rfc7239;
mod settings;
mod trust;

pub use chain::{ChainResolution, ChainResolver};
pub use error::ForwardedError;
pub use exchange::{AccessLogAttributes, Exchange, RequestAttributes, RequestSnapshot};
pub use host::{HostLiteral, HostParseError, HostPort, HostResolver};
#[cfg(feature = "dns")]
pub use lookup::DnsLookup;
pub use lookup::{HostnameLookup, LookupError};
pub use protocol::{DEFAULT_HTTP_PORT, DEFAULT_HTTPS_PORT, ProtocolResolver};
pub use resolver::{ForwardedScope, RemoteIpResolver};
pub use rfc7239::{Directive, DirectiveMap};
pub use settings::RemoteIpSettings;
pub use trust::{DEFAULT_INTERNAL_PROXIES, TrustClassifier};
