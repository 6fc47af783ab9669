//! Host literal grammar and the host claim resolver.
//!
//! A host literal is either a bracketed IPv6 address with an optional zone
//! (`[fe80::1%25eth0]`) or a registered name / IPv4 address, followed by an
//! optional `:port`. Ports may be numeric or, in RFC 7239 values, an
//! obfuscated token starting with `_`.

use std::net::Ipv6Addr;

use super::exchange::Exchange;

/// Reasons a host literal is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostParseError {
    #[error("empty host")]
    Empty,

    #[error("missing closing bracket in IPv6 literal")]
    UnclosedBracket,

    #[error("invalid IPv6 literal: {0}")]
    InvalidIpv6(String),

    #[error("invalid zone identifier: {0}")]
    InvalidZone(String),

    #[error("invalid character {0:?} in host name")]
    InvalidCharacter(char),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("unexpected characters after host: {0}")]
    TrailingCharacters(String),
}

/// Port part of a host literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPort<'a> {
    Number(u16),
    /// RFC 7239 `obfport`, e.g. `_9090`.
    Obfuscated(&'a str),
}

/// A parsed `host[:port]` literal borrowing from its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLiteral<'a> {
    /// Host part as written, brackets included for IPv6.
    pub host: &'a str,
    pub port: Option<HostPort<'a>>,
}

impl<'a> HostLiteral<'a> {
    pub fn parse(input: &'a str) -> Result<Self, HostParseError> {
        if input.is_empty() {
            return Err(HostParseError::Empty);
        }

        let (host, tail) = if let Some(rest) = input.strip_prefix('[') {
            let close = rest.find(']').ok_or(HostParseError::UnclosedBracket)?;
            validate_ipv6(&rest[..close])?;
            input.split_at(close + 2)
        } else {
            let split = input.rfind(':').unwrap_or(input.len());
            let (host, tail) = input.split_at(split);
            validate_reg_name(host)?;
            (host, tail)
        };

        Ok(Self {
            host,
            port: parse_port(tail)?,
        })
    }

    /// Host part without IPv6 brackets.
    pub fn address(&self) -> &'a str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(self.host)
    }

    pub fn is_ipv6(&self) -> bool {
        self.host.starts_with('[')
    }

    pub fn port_number(&self) -> Option<u16> {
        match self.port {
            Some(HostPort::Number(port)) => Some(port),
            _ => None,
        }
    }
}

fn validate_ipv6(inner: &str) -> Result<(), HostParseError> {
    let (addr, zone) = match inner.split_once('%') {
        Some((addr, zone)) => (addr, Some(zone)),
        None => (inner, None),
    };

    if addr.parse::<Ipv6Addr>().is_err() {
        return Err(HostParseError::InvalidIpv6(inner.to_string()));
    }

    if let Some(zone) = zone {
        // The zone delimiter may arrive percent-encoded as "%25".
        let zone = zone.strip_prefix("25").filter(|z| !z.is_empty()).unwrap_or(zone);
        if zone.is_empty() || !zone.chars().all(is_unreserved) {
            return Err(HostParseError::InvalidZone(zone.to_string()));
        }
    }

    Ok(())
}

fn validate_reg_name(host: &str) -> Result<(), HostParseError> {
    if host.is_empty() {
        return Err(HostParseError::Empty);
    }
    if let Some(c) = host.chars().find(|&c| !is_unreserved(c)) {
        return Err(HostParseError::InvalidCharacter(c));
    }
    if host.starts_with(['.', '-']) {
        return Err(HostParseError::InvalidCharacter(host.as_bytes()[0] as char));
    }
    Ok(())
}

fn parse_port(tail: &str) -> Result<Option<HostPort<'_>>, HostParseError> {
    if tail.is_empty() {
        return Ok(None);
    }

    let Some(port) = tail.strip_prefix(':') else {
        return Err(HostParseError::TrailingCharacters(tail.to_string()));
    };

    if port.is_empty() {
        return Ok(None);
    }

    if port.starts_with('_') {
        if port.len() > 1 && port.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
            return Ok(Some(HostPort::Obfuscated(port)));
        }
        return Err(HostParseError::InvalidPort(port.to_string()));
    }

    if !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HostParseError::InvalidPort(port.to_string()));
    }

    port.parse::<u16>()
        .map(|p| Some(HostPort::Number(p)))
        .map_err(|_| HostParseError::InvalidPort(port.to_string()))
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// Applies a forwarded host claim to the server name and port.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostResolver {
    pub change_local_name: bool,
    pub change_local_port: bool,
}

impl HostResolver {
    /// Override server name (and port, if present) from a host claim.
    ///
    /// Returns false and leaves the exchange untouched when the claim is not a
    /// valid host literal.
    pub fn apply(&self, exchange: &mut Exchange, claim: &str, source: &str) -> bool {
        let literal = match HostLiteral::parse(claim) {
            Ok(literal) => literal,
            Err(e) => {
                tracing::debug!(
                    host = %claim,
                    source = %source,
                    error = %e,
                    "Ignoring invalid forwarded host"
                );
                return false;
            }
        };

        exchange.server_name = literal.host.to_string();
        if self.change_local_name {
            exchange.local_name = Some(literal.host.to_string());
        }

        if let Some(port) = literal.port_number() {
            exchange.set_port(port, self.change_local_port);
        }

        true
    }
}
