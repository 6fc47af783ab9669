//! Scoped application of forwarded overrides to an [`Exchange`].
//!
//! [`RemoteIpResolver::enter`] captures a [`RequestSnapshot`] and rewrites the
//! exchange; [`RemoteIpResolver::exit`] puts the snapshot back. `invoke` and
//! `scope` pair the two so that restoration happens on every exit path,
//! including a panic unwinding out of the downstream handler.

use std::{
    net::IpAddr,
    ops::{Deref, DerefMut},
};

use http::HeaderName;

use super::{
    ForwardedError,
    chain::{ChainResolution, ChainResolver},
    exchange::{AccessLogAttributes, Exchange, RequestSnapshot},
    host::HostResolver,
    legacy,
    lookup::HostnameLookup,
    protocol::ProtocolResolver,
    rfc7239::{self, Directive, DirectiveMap},
    settings::RemoteIpSettings,
    trust::TrustClassifier,
};

/// Resolves the originating client of a request from its forwarded headers.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RemoteIpResolver {
    classifier: TrustClassifier,
    remote_ip_header: HeaderName,
    proxies_header: HeaderName,
    forwarded_header: HeaderName,
    protocol_header: Option<HeaderName>,
    port_header: Option<HeaderName>,
    host_header: Option<HeaderName>,
    protocol: ProtocolResolver,
    host: HostResolver,
    rfc7239_only: bool,
    request_attributes_enabled: bool,
    change_local_name: bool,
    enable_lookups: bool,
}

impl RemoteIpResolver {
    /// Validate `config` and compile its proxy patterns.
    pub fn new(config: &RemoteIpSettings) -> Result<Self, ForwardedError> {
        let classifier = TrustClassifier::new(
            config.internal_proxies.as_deref(),
            config.trusted_proxies.as_deref(),
        )?;

        if config.protocol_header_https_value.trim().is_empty() {
            return Err(ForwardedError::InvalidSetting {
                setting: "protocol_header_https_value",
                message: "must not be empty".to_string(),
            });
        }
        for (setting, port) in [
            ("http_server_port", config.http_server_port),
            ("https_server_port", config.https_server_port),
        ] {
            if port == 0 {
                return Err(ForwardedError::InvalidSetting {
                    setting,
                    message: "port must be non-zero".to_string(),
                });
            }
        }

        Ok(Self {
            classifier,
            remote_ip_header: header_name("remote_ip_header", &config.remote_ip_header)?,
            proxies_header: header_name("proxies_header", &config.proxies_header)?,
            forwarded_header: rfc7239::FORWARDED,
            protocol_header: optional_header_name("protocol_header", &config.protocol_header)?,
            port_header: optional_header_name("port_header", &config.port_header)?,
            host_header: optional_header_name("host_header", &config.host_header)?,
            protocol: ProtocolResolver {
                https_value: config.protocol_header_https_value.clone(),
                http_server_port: config.http_server_port,
                https_server_port: config.https_server_port,
                change_local_port: config.change_local_port,
            },
            host: HostResolver {
                change_local_name: config.change_local_name,
                change_local_port: config.change_local_port,
            },
            rfc7239_only: config.rfc7239_only,
            request_attributes_enabled: config.request_attributes_enabled,
            change_local_name: config.change_local_name,
            enable_lookups: config.enable_lookups,
        })
    }

    pub fn classifier(&self) -> &TrustClassifier {
        &self.classifier
    }

    pub fn enable_lookups(&self) -> bool {
        self.enable_lookups
    }

    pub fn request_attributes_enabled(&self) -> bool {
        self.request_attributes_enabled
    }

    /// Headers this resolver may rewrite, in snapshot order.
    pub fn managed_headers(&self) -> [&HeaderName; 3] {
        [&self.proxies_header, &self.remote_ip_header, &self.forwarded_header]
    }

    /// Capture the exchange and apply every override the peer is entitled to.
    ///
    /// The remote host is set to the resolved address literal. Use
    /// [`enter_with_lookup`](Self::enter_with_lookup) for a reverse lookup.
    pub fn enter(&self, exchange: &mut Exchange) -> RequestSnapshot {
        let snapshot = self.capture(exchange);
        self.apply(exchange, &snapshot);
        self.publish(exchange);
        snapshot
    }

    /// As [`enter`](Self::enter), then replace the remote host with the
    /// reverse-DNS name of the resolved client. A failed lookup keeps the
    /// address literal.
    pub async fn enter_with_lookup(
        &self,
        exchange: &mut Exchange,
        lookup: &dyn HostnameLookup,
    ) -> RequestSnapshot {
        let snapshot = self.capture(exchange);
        if let Some(client) = self.apply(exchange, &snapshot) {
            exchange.remote_host = reverse_lookup(lookup, &client).await;
        }
        self.publish(exchange);
        snapshot
    }

    /// Finish a request. `restore` is false when the caller is handing the
    /// request off for asynchronous continuation and still needs the
    /// resolved view.
    pub fn exit(&self, exchange: &mut Exchange, snapshot: RequestSnapshot, restore: bool) {
        if restore {
            snapshot.restore(exchange);
        }
    }

    /// Run `next` against the resolved exchange and restore afterwards,
    /// whether `next` returns or panics.
    pub fn invoke<T>(&self, exchange: &mut Exchange, next: impl FnOnce(&mut Exchange) -> T) -> T {
        let mut scope = self.scope(exchange);
        next(&mut scope)
    }

    /// Guard form of [`invoke`](Self::invoke).
    pub fn scope<'a>(&self, exchange: &'a mut Exchange) -> ForwardedScope<'a> {
        let snapshot = self.enter(exchange);
        ForwardedScope {
            exchange,
            snapshot: Some(snapshot),
        }
    }

    fn capture(&self, exchange: &Exchange) -> RequestSnapshot {
        RequestSnapshot::capture(exchange, self.change_local_name, &self.managed_headers())
    }

    /// Returns the resolved client address, if the walk found one.
    fn apply(&self, exchange: &mut Exchange, original: &RequestSnapshot) -> Option<String> {
        let peer = exchange.remote_addr.clone();
        if !self.classifier.is_internal(&peer) && !self.classifier.is_trusted(&peer) {
            tracing::debug!(
                uri = %exchange.request_uri,
                remote_addr = %peer,
                "Skipping forwarded headers from untrusted peer"
            );
            return None;
        }

        let client = if self.rfc7239_only {
            self.apply_rfc7239(exchange, &peer)
        } else {
            self.apply_legacy(exchange, &peer)
        };

        if let Some(client) = &client {
            exchange.remote_addr = client.clone();
            exchange.remote_host = client.clone();
        }
        exchange.attributes.forwarded = true;

        tracing::debug!(
            uri = %exchange.request_uri,
            original_remote_addr = %original.remote_addr(),
            original_scheme = %original.scheme(),
            original_server_name = %original.server_name(),
            original_server_port = original.server_port(),
            remote_addr = %exchange.remote_addr,
            scheme = %exchange.scheme,
            secure = exchange.secure,
            server_name = %exchange.server_name,
            server_port = exchange.server_port,
            "Resolved forwarded request"
        );

        client
    }

    fn apply_legacy(&self, exchange: &mut Exchange, peer: &str) -> Option<String> {
        let chain = legacy::parse_chain(&exchange.headers, &self.remote_ip_header);
        let resolution = ChainResolver::new(&self.classifier).resolve(peer, &chain);

        match &resolution.client {
            Some(_) => {
                legacy::set_chain_header(&mut exchange.headers, &self.proxies_header, &resolution.proxies);
                legacy::set_chain_header(
                    &mut exchange.headers,
                    &self.remote_ip_header,
                    &resolution.remaining,
                );
            }
            None if !chain.is_empty() && !resolution.proxies.is_empty() => {
                legacy::set_chain_header(&mut exchange.headers, &self.proxies_header, &resolution.proxies);
            }
            None => {}
        }

        if let Some(name) = &self.protocol_header
            && exchange.headers.contains_key(name)
        {
            let claims = legacy::parse_chain(&exchange.headers, name);
            self.protocol.apply(exchange, &claims);
        }

        if let Some(name) = &self.port_header
            && let Some(claim) = first_value(exchange, name)
        {
            self.protocol.apply_port(exchange, &claim, name.as_str());
        }

        if let Some(name) = &self.host_header
            && let Some(claim) = first_value(exchange, name)
        {
            self.host.apply(exchange, &claim, name.as_str());
        }

        resolution.client
    }

    fn apply_rfc7239(&self, exchange: &mut Exchange, peer: &str) -> Option<String> {
        let mut directives = DirectiveMap::from_headers(&exchange.headers);
        let chain = directives.get(Directive::For).unwrap_or_default().to_vec();
        let ChainResolution {
            client,
            proxies,
            remaining,
        } = ChainResolver::new(&self.classifier).resolve_by(peer, &chain, rfc7239::node_key);

        if client.is_some() {
            directives.set(Directive::By, proxies);
            directives.set(Directive::For, remaining);
            directives.write_header(&mut exchange.headers);
        } else if !chain.is_empty() && !proxies.is_empty() {
            directives.set(Directive::By, proxies);
            directives.write_header(&mut exchange.headers);
        }

        if let Some(protos) = directives.get(Directive::Proto) {
            self.protocol.apply(exchange, protos);
        }

        if let Some(host) = directives.get(Directive::Host).and_then(|hosts| hosts.first()) {
            let host = host.clone();
            self.host.apply(exchange, &host, self.forwarded_header.as_str());
        }

        client.map(|client| rfc7239::node_key(&client).into_owned())
    }

    fn publish(&self, exchange: &mut Exchange) {
        if self.request_attributes_enabled {
            exchange.attributes.access_log = Some(AccessLogAttributes::from_exchange(exchange));
        }
    }
}

/// An entered exchange that restores itself when dropped.
///
/// Dereferences to the resolved [`Exchange`].
#[must_use = "the exchange is restored as soon as the scope is dropped"]
pub struct ForwardedScope<'a> {
    exchange: &'a mut Exchange,
    snapshot: Option<RequestSnapshot>,
}

impl ForwardedScope<'_> {
    /// Keep the resolved view past the end of the scope.
    ///
    /// The returned snapshot can still be handed to
    /// [`RemoteIpResolver::exit`] once the request completes.
    pub fn suspend(mut self) -> RequestSnapshot {
        // Only `suspend` and `drop` take the snapshot, and `suspend` consumes self.
        self.snapshot
            .take()
            .unwrap_or_else(|| RequestSnapshot::capture(self.exchange, false, &[]))
    }
}

impl Deref for ForwardedScope<'_> {
    type Target = Exchange;

    fn deref(&self) -> &Exchange {
        self.exchange
    }
}

impl DerefMut for ForwardedScope<'_> {
    fn deref_mut(&mut self) -> &mut Exchange {
        self.exchange
    }
}

impl Drop for ForwardedScope<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            snapshot.restore(self.exchange);
        }
    }
}

fn header_name(setting: &'static str, value: &str) -> Result<HeaderName, ForwardedError> {
    HeaderName::try_from(value.trim()).map_err(|_| ForwardedError::InvalidHeaderName {
        setting,
        value: value.to_string(),
    })
}

fn optional_header_name(
    setting: &'static str,
    value: &Option<String>,
) -> Result<Option<HeaderName>, ForwardedError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(|v| header_name(setting, v))
        .transpose()
}

fn first_value(exchange: &Exchange, name: &HeaderName) -> Option<String> {
    let value = exchange.headers.get(name)?;
    match value.to_str() {
        Ok(value) => Some(value.trim().to_string()),
        Err(_) => {
            tracing::debug!(header = %name, "Ignoring non-ASCII forwarded header");
            None
        }
    }
}

async fn reverse_lookup(lookup: &dyn HostnameLookup, client: &str) -> String {
    let Ok(ip) = client.parse::<IpAddr>() else {
        tracing::debug!(remote_addr = %client, "Resolved client is not an IP address, skipping lookup");
        return client.to_string();
    };

    match lookup.lookup_hostname(ip).await {
        Ok(name) => name,
        Err(e) => {
            tracing::debug!(remote_addr = %client, error = %e, "Reverse lookup failed");
            client.to_string()
        }
    }
}
