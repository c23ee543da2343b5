//! Origin-domain derivation and the blocked domain set.
//!
//! A blocked entry covers the domain itself and every subdomain: blocking
//! `google.com` blocks `mail.google.com` but not `notgoogle.com`.

use std::collections::BTreeSet;

use url::{Host, Url};

/// Derive the origin domain of a URL: lowercase host without userinfo,
/// port, or a leading `www.`. Returns `None` when the URL does not parse or
/// has no host.
///
/// ```rust
/// use webtrail_core::blocklist::origin_domain;
///
/// assert_eq!(origin_domain("https://www.Example.com:8443/a?b#c").as_deref(), Some("example.com"));
/// assert_eq!(origin_domain("about:blank"), None);
/// ```
pub fn origin_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = match parsed.host()? {
        Host::Domain(d) => d.trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    (!host.is_empty()).then_some(host)
}

/// Normalize user input into a blocklist entry. Accepts bare domains,
/// wildcard forms (`*.example.com`), and pasted URLs.
pub fn normalize_domain(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.contains("://") {
        return origin_domain(trimmed);
    }
    let bare = trimmed.trim_start_matches("*.").trim_start_matches('.');
    if bare.is_empty() || bare.contains(char::is_whitespace) {
        return None;
    }
    origin_domain(&format!("http://{}", bare))
}

/// True when `domain` equals `ancestor` or is a subdomain of it.
pub fn is_same_or_subdomain(domain: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return false;
    }
    domain == ancestor
        || (domain.len() > ancestor.len()
            && domain.ends_with(ancestor)
            && domain.as_bytes()[domain.len() - ancestor.len() - 1] == b'.')
}

/// Snapshot of blocked domains consulted during ingestion.
#[derive(Debug, Clone, Default)]
pub struct BlockedDomainSet {
    domains: BTreeSet<String>,
}

impl BlockedDomainSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; returns `false` if it was already present or invalid.
    pub fn insert(&mut self, domain: &str) -> bool {
        match normalize_domain(domain) {
            Some(d) => self.domains.insert(d),
            None => false,
        }
    }

    pub fn remove(&mut self, domain: &str) -> bool {
        match normalize_domain(domain) {
            Some(d) => self.domains.remove(&d),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }

    /// Walk the domain's ancestor suffixes (`a.b.c`, `b.c`, `c`) and report
    /// the first blocked one.
    pub fn blocking_entry(&self, domain: &str) -> Option<&str> {
        let mut candidate = domain;
        loop {
            if let Some(hit) = self.domains.get(candidate) {
                return Some(hit.as_str());
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => return None,
            }
        }
    }

    pub fn is_blocked(&self, domain: &str) -> bool {
        self.blocking_entry(domain).is_some()
    }
}

impl<S: AsRef<str>> FromIterator<S> for BlockedDomainSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = BlockedDomainSet::new();
        for d in iter {
            set.insert(d.as_ref());
        }
        set
    }
}
