//! Best-effort reverse DNS for the resolved client address.
//!
//! A failed lookup never fails the request: the caller falls back to the
//! address literal.

use std::net::IpAddr;

use async_trait::async_trait;

/// Errors from a reverse lookup.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Reverse lookup failed: {0}")]
    Resolve(String),

    #[error("No PTR record for {0}")]
    NoRecord(IpAddr),

    #[error("Failed to build DNS resolver: {0}")]
    Init(String),
}

/// Resolves an address to a host name.
#[async_trait]
pub trait HostnameLookup: Send + Sync {
    async fn lookup_hostname(&self, ip: IpAddr) -> Result<String, LookupError>;
}

#[cfg(feature = "dns")]
mod system {
    use std::net::IpAddr;

    use async_trait::async_trait;
    use hickory_resolver::{
        Resolver, TokioResolver, name_server::TokioConnectionProvider, system_conf::read_system_conf,
    };

    use super::{HostnameLookup, LookupError};

    /// Reverse lookups through the system resolver configuration.
    #[derive(Clone)]
    pub struct DnsLookup {
        resolver: TokioResolver,
    }

    impl DnsLookup {
        /// Build from the system DNS configuration, falling back to defaults.
        pub fn from_system() -> Result<Self, LookupError> {
            let resolver = match read_system_conf() {
                Ok((config, opts)) => {
                    Resolver::builder_with_config(config, TokioConnectionProvider::default())
                        .with_options(opts)
                        .build()
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Failed to read system DNS config, using default"
                    );
                    Resolver::builder_tokio()
                        .map_err(|e| LookupError::Init(e.to_string()))?
                        .build()
                }
            };
            Ok(Self { resolver })
        }

        pub fn with_resolver(resolver: TokioResolver) -> Self {
            Self { resolver }
        }
    }

    #[async_trait]
    impl HostnameLookup for DnsLookup {
        async fn lookup_hostname(&self, ip: IpAddr) -> Result<String, LookupError> {
            let response = self
                .resolver
                .reverse_lookup(ip)
                .await
                .map_err(|e| LookupError::Resolve(e.to_string()))?;

            response
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string())
                .filter(|name| !name.is_empty())
                .ok_or(LookupError::NoRecord(ip))
        }
    }
}

#[cfg(feature = "dns")]
pub use system::DnsLookup;
