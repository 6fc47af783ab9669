//! Comma-delimited `X-Forwarded-For` style chains.
//!
//! Format: `client, proxy1, proxy2, ..., proxyN`. Each proxy appends the
//! address it received the request from, so the rightmost entry is the hop
//! closest to us.

use http::{HeaderMap, HeaderName, HeaderValue};

/// Parse all occurrences of a list header into one ordered chain.
///
/// Occurrences are joined in order, then split on commas. Whitespace around
/// entries is trimmed and empty entries are dropped.
pub fn parse_chain(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(split_list)
        .collect()
}

/// Split a single comma-delimited value.
pub fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Join chain entries the way proxies write them.
pub fn join_chain<S: AsRef<str>>(entries: &[S]) -> String {
    entries
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Replace a header with a joined chain, or remove it when the chain is empty.
///
/// Entries that cannot be represented as a header value are left out of the
/// rewritten header rather than failing the request.
pub fn set_chain_header<S: AsRef<str>>(headers: &mut HeaderMap, name: &HeaderName, entries: &[S]) {
    if entries.is_empty() {
        headers.remove(name);
        return;
    }

    let joined = join_chain(entries);
    match HeaderValue::try_from(joined.as_str()) {
        Ok(value) => {
            headers.insert(name.clone(), value);
        }
        Err(_) => {
            tracing::debug!(header = %name, value = %joined, "Dropping unrepresentable chain header");
            headers.remove(name);
        }
    }
}
