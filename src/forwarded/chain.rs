//! Right-to-left trust walk over a forwarded chain.
//!
//! The chain is walked from the hop closest to us towards the original
//! client. Internal proxies are dropped, trusted proxies are collected, and
//! the first hop that is neither ends the walk: it is the client. Everything
//! to its left stays as written, since any of it may have been forged by that
//! untrusted hop.

use std::{borrow::Cow, collections::VecDeque};

use super::trust::TrustClassifier;

/// Outcome of a chain walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainResolution {
    /// First untrusted hop, if the walk found one.
    pub client: Option<String>,
    /// Trusted proxies in original left-to-right order, the peer last.
    pub proxies: Vec<String>,
    /// Entries left of the client, unmodified. Empty when no client was found.
    pub remaining: Vec<String>,
}

/// Walks chains against a shared classifier.
#[derive(Debug, Clone, Copy)]
pub struct ChainResolver<'a> {
    classifier: &'a TrustClassifier,
}

impl<'a> ChainResolver<'a> {
    pub fn new(classifier: &'a TrustClassifier) -> Self {
        Self { classifier }
    }

    /// Walk `chain` (left = oldest claim) for a request received from `peer`.
    ///
    /// A peer that is not internal is recorded as the rightmost proxy.
    pub fn resolve<S: AsRef<str>>(&self, peer: &str, chain: &[S]) -> ChainResolution {
        self.resolve_by(peer, chain, |hop| Cow::Borrowed(hop))
    }

    /// As [`resolve`](Self::resolve), classifying each hop by `key(hop)`.
    ///
    /// The resolution still carries every hop as written.
    pub fn resolve_by<S, F>(&self, peer: &str, chain: &[S], key: F) -> ChainResolution
    where
        S: AsRef<str>,
        F: for<'h> Fn(&'h str) -> Cow<'h, str>,
    {
        let mut proxies = VecDeque::new();
        if !self.classifier.is_internal(peer) {
            proxies.push_front(peer.to_string());
        }

        for (idx, hop) in chain.iter().enumerate().rev() {
            let hop = hop.as_ref();
            let matched = key(hop);
            if self.classifier.is_internal(&matched) {
                continue;
            }
            if self.classifier.is_trusted(&matched) {
                proxies.push_front(hop.to_string());
                continue;
            }

            return ChainResolution {
                client: Some(hop.to_string()),
                proxies: proxies.into(),
                remaining: chain[..idx].iter().map(|s| s.as_ref().to_string()).collect(),
            };
        }

        ChainResolution {
            client: None,
            proxies: proxies.into(),
            remaining: Vec::new(),
        }
    }
}
