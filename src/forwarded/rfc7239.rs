//! RFC 7239 `Forwarded` header parsing and serialisation.
//!
//! ```text
//! Forwarded: for=192.0.2.60;proto=http;by=203.0.113.43, for="[2001:db8::1]:4711"
//! ```
//!
//! `;` separates directives within one hop and `,` separates hops. Both end
//! the directive being read. Values are collected per directive in the order
//! they appear, across every occurrence of the header.

use std::{borrow::Cow, fmt};

use http::{HeaderMap, HeaderName, HeaderValue};
use indexmap::IndexMap;

use super::host::HostLiteral;

/// The fixed header name used by the RFC 7239 dialect.
pub const FORWARDED: HeaderName = http::header::FORWARDED;

/// The four directives this resolver understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    For,
    By,
    Host,
    Proto,
}

impl Directive {
    pub fn parse(name: &str) -> Option<Self> {
        [Self::For, Self::By, Self::Host, Self::Proto]
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::For => "for",
            Self::By => "by",
            Self::Host => "host",
            Self::Proto => "proto",
        }
    }

    fn carries_node(self) -> bool {
        matches!(self, Self::For | Self::By | Self::Host)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insertion-ordered multimap of directive values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveMap {
    entries: IndexMap<Directive, Vec<String>>,
}

impl DirectiveMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from every occurrence of the `Forwarded` header.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get_all(FORWARDED)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .fold(Self::new(), |map, value| map.parse_into(value))
    }

    /// Parse a single header value.
    pub fn parse(value: &str) -> Self {
        Self::new().parse_into(value)
    }

    fn parse_into(self, value: &str) -> Self {
        tokenize(value)
            .filter_map(|(key, value)| accept(&key, value))
            .fold(self, |mut map, (directive, value)| {
                map.push(directive, value);
                map
            })
    }

    pub fn get(&self, directive: Directive) -> Option<&[String]> {
        self.entries.get(&directive).map(Vec::as_slice)
    }

    pub fn contains(&self, directive: Directive) -> bool {
        self.entries.contains_key(&directive)
    }

    pub fn push(&mut self, directive: Directive, value: String) {
        self.entries.entry(directive).or_default().push(value);
    }

    /// Replace a directive's values, keeping its position if already present.
    /// An empty list removes the directive.
    pub fn set(&mut self, directive: Directive, values: Vec<String>) {
        if values.is_empty() {
            self.entries.shift_remove(&directive);
        } else {
            self.entries.insert(directive, values);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Directive, &[String])> {
        self.entries.iter().map(|(d, v)| (*d, v.as_slice()))
    }

    /// Render the map as a single `Forwarded` header value.
    pub fn serialize(&self) -> String {
        self.iter()
            .map(|(directive, values)| {
                values
                    .iter()
                    .map(|value| render_pair(directive, value))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Write the serialised map to `headers`, removing the header when the map is empty.
    pub fn write_header(&self, headers: &mut HeaderMap) {
        let serialized = self.serialize();
        if serialized.is_empty() {
            headers.remove(FORWARDED);
            return;
        }
        match HeaderValue::try_from(serialized.as_str()) {
            Ok(value) => {
                headers.insert(FORWARDED, value);
            }
            Err(_) => {
                tracing::debug!(value = %serialized, "Dropping unrepresentable Forwarded header");
                headers.remove(FORWARDED);
            }
        }
    }
}

/// Split a raw value into `(key, value)` pairs.
///
/// Quotes and spaces are dropped wherever they appear. A second `=` inside a
/// directive is ignored.
fn tokenize(input: &str) -> impl Iterator<Item = (String, String)> + '_ {
    let mut key = String::new();
    let mut value = String::new();
    let mut in_key = true;
    let mut chars = input.chars();
    let mut done = false;

    std::iter::from_fn(move || {
        while !done {
            match chars.next() {
                Some('=') => in_key = false,
                Some(',' | ';') => {
                    in_key = true;
                    let pair = (std::mem::take(&mut key), std::mem::take(&mut value));
                    if !pair.0.is_empty() && !pair.1.is_empty() {
                        return Some(pair);
                    }
                }
                Some(' ' | '"') => {}
                Some(c) if in_key => key.push(c),
                Some(c) => value.push(c),
                None => {
                    done = true;
                    if !key.is_empty() && !value.is_empty() {
                        return Some((std::mem::take(&mut key), std::mem::take(&mut value)));
                    }
                }
            }
        }
        None
    })
}

/// Decide whether a parsed pair is recorded. Values are kept as written.
fn accept(key: &str, value: String) -> Option<(Directive, String)> {
    let directive = Directive::parse(key)?;
    match directive {
        Directive::For | Directive::By | Directive::Host => {
            (!is_obfuscated(&value)).then_some((directive, value))
        }
        Directive::Proto => {
            let known = value.eq_ignore_ascii_case("http") || value.eq_ignore_ascii_case("https");
            known.then_some((directive, value))
        }
    }
}

/// Obfuscated identifiers: `unknown` or anything starting with `_`.
pub fn is_obfuscated(value: &str) -> bool {
    value.starts_with('_') || value.eq_ignore_ascii_case("unknown")
}

/// The form of a `for` node that trust patterns are matched against.
///
/// `[2001:db8::1]:8080` becomes `2001:db8::1:8080`, the way the node would
/// appear in a legacy chain. Anything that is not a valid bracketed literal
/// is returned unchanged, so it can never match an address pattern.
pub fn node_key(value: &str) -> Cow<'_, str> {
    if !value.starts_with('[') {
        return Cow::Borrowed(value);
    }
    match HostLiteral::parse(value) {
        Ok(literal) => {
            let port = value[literal.host.len()..].trim_start_matches(':');
            if port.is_empty() {
                Cow::Owned(literal.address().to_string())
            } else {
                Cow::Owned(format!("{}:{}", literal.address(), port))
            }
        }
        Err(e) => {
            tracing::debug!(value = %value, error = %e, "Forwarded node is not a valid literal");
            Cow::Borrowed(value)
        }
    }
}

fn render_pair(directive: Directive, value: &str) -> String {
    if directive.carries_node()
        && let Some(bracketed) = bracket_ipv6(value)
    {
        return format!("{directive}=\"{bracketed}\"");
    }
    format!("{directive}={value}")
}

/// Bracketed form of an IPv6 node, or `None` for anything else.
///
/// The legacy form `addr:port` is ambiguous for IPv6; a value that parses as
/// an address on its own is taken as portless, otherwise the last colon
/// separates the port.
fn bracket_ipv6(value: &str) -> Option<String> {
    if value.starts_with('[') {
        return Some(value.to_string());
    }

    let first = value.find(':')?;
    let last = value.rfind(':')?;
    if first == last {
        return None;
    }

    if value.parse::<std::net::Ipv6Addr>().is_ok() {
        return Some(format!("[{value}]"));
    }
    Some(format!("[{}]{}", &value[..last], &value[last..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<'a>(map: &'a DirectiveMap, directive: Directive) -> Vec<&'a str> {
        map.get(directive)
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn test_parse_single_hop() {
        let map = DirectiveMap::parse("for=192.0.2.60;proto=http;by=203.0.113.43");
        assert_eq!(values(&map, Directive::For), vec!["192.0.2.60"]);
        assert_eq!(values(&map, Directive::Proto), vec!["http"]);
        assert_eq!(values(&map, Directive::By), vec!["203.0.113.43"]);
    }

    #[test]
    fn test_parse_multiple_hops_keeps_order() {
        let map = DirectiveMap::parse("for=140.211.11.130, for=proxy1, For=proxy2");
        assert_eq!(
            values(&map, Directive::For),
            vec!["140.211.11.130", "proxy1", "proxy2"]
        );
    }

    #[test]
    fn test_parse_strips_quotes_and_spaces() {
        let map = DirectiveMap::parse(r#" for = "192.0.2.43" ; host = "example.com" "#);
        assert_eq!(values(&map, Directive::For), vec!["192.0.2.43"]);
        assert_eq!(values(&map, Directive::Host), vec!["example.com"]);
    }

    #[test]
    fn test_parse_keeps_bracketed_ipv6_as_written() {
        let map = DirectiveMap::parse(
            r#"for="[2400:dd01:103a:4041::101]:8080", for="[::1]", by="[::1]:80""#,
        );
        assert_eq!(
            values(&map, Directive::For),
            vec!["[2400:dd01:103a:4041::101]:8080", "[::1]"]
        );
        assert_eq!(values(&map, Directive::By), vec!["[::1]:80"]);
    }

    #[test]
    fn test_node_key() {
        assert_eq!(
            node_key("[2400:dd01:103a:4041::101]:8080"),
            "2400:dd01:103a:4041::101:8080"
        );
        assert_eq!(node_key("[::1]"), "::1");
        assert_eq!(node_key("192.0.2.60:4711"), "192.0.2.60:4711");
        assert_eq!(node_key("[bogus]:80"), "[bogus]:80");
    }

    #[test]
    fn test_parse_drops_obfuscated_values() {
        let map = DirectiveMap::parse("for=unknown, for=_hidden, for=1.2.3.4;by=_proxy;host=UNKNOWN");
        assert_eq!(values(&map, Directive::For), vec!["1.2.3.4"]);
        assert!(!map.contains(Directive::By));
        assert!(!map.contains(Directive::Host));
    }

    #[test]
    fn test_parse_filters_proto() {
        let map = DirectiveMap::parse("proto=HTTPS, proto=ftp, proto=http");
        assert_eq!(values(&map, Directive::Proto), vec!["HTTPS", "http"]);
    }

    #[test]
    fn test_parse_ignores_unknown_and_empty_directives() {
        let map = DirectiveMap::parse("secret=xyz;for=;=1.2.3.4;;for=5.6.7.8");
        assert_eq!(values(&map, Directive::For), vec!["5.6.7.8"]);
        assert_eq!(map.iter().count(), 1);
    }

    #[test]
    fn test_from_headers_folds_all_occurrences() {
        let mut headers = HeaderMap::new();
        headers.append(FORWARDED, HeaderValue::from_static("for=140.211.11.130;proto=https"));
        headers.append(FORWARDED, HeaderValue::from_static("for=proxy1;proto=https"));

        let map = DirectiveMap::from_headers(&headers);
        assert_eq!(values(&map, Directive::For), vec!["140.211.11.130", "proxy1"]);
        assert_eq!(values(&map, Directive::Proto), vec!["https", "https"]);
        assert_eq!(
            map.iter().map(|(d, _)| d).collect::<Vec<_>>(),
            vec![Directive::For, Directive::Proto]
        );
    }

    #[test]
    fn test_serialize_groups_in_key_order() {
        let mut map = DirectiveMap::new();
        map.push(Directive::For, "140.211.11.130".into());
        map.push(Directive::For, "proxy1".into());
        map.push(Directive::Proto, "https".into());
        map.push(Directive::By, "proxy2".into());

        assert_eq!(
            map.serialize(),
            "for=140.211.11.130, for=proxy1;proto=https;by=proxy2"
        );
    }

    #[test]
    fn test_serialize_brackets_ipv6() {
        let mut map = DirectiveMap::new();
        map.push(Directive::For, "2400:dd01:103a:4041::101:8080".into());
        map.push(Directive::For, "[2001:db8::1]:443".into());
        map.push(Directive::For, "2001:db8:0:0:0:0:0:zz".into());
        map.push(Directive::By, "10.0.0.1:80".into());

        assert_eq!(
            map.serialize(),
            r#"for="[2400:dd01:103a:4041::101:8080]", for="[2001:db8::1]:443", for="[2001:db8:0:0:0:0:0]:zz";by=10.0.0.1:80"#
        );
    }

    #[test]
    fn test_set_keeps_position_and_removes_empty() {
        let mut map = DirectiveMap::parse("for=a;by=b;proto=http");
        map.set(Directive::For, vec!["c".into()]);
        map.set(Directive::By, vec![]);

        assert_eq!(map.serialize(), "for=c;proto=http");
    }

    #[test]
    fn test_round_trip() {
        let mut map = DirectiveMap::new();
        map.push(Directive::For, "140.211.11.130".into());
        map.push(Directive::For, "[2001:db8::1]".into());
        map.push(Directive::For, "[2400:dd01:103a:4041::101]:8080".into());
        map.push(Directive::By, "proxy1".into());
        map.push(Directive::By, "[2001:db8::2]:80".into());
        map.push(Directive::Host, "example.com:8443".into());
        map.push(Directive::Proto, "https".into());

        assert_eq!(DirectiveMap::parse(&map.serialize()), map);
    }

    #[test]
    fn test_parsed_header_serializes_back_unchanged() {
        let raw = r#"for="[2001:db8::1]:4711", for=192.0.2.60:80, for="[::1]";proto=https;by=proxy1"#;
        assert_eq!(DirectiveMap::parse(raw).serialize(), raw);
    }

    #[test]
    fn test_write_header_removes_when_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED, HeaderValue::from_static("for=a"));

        DirectiveMap::new().write_header(&mut headers);
        assert!(!headers.contains_key(FORWARDED));
    }
}
