//! Origin allowlist parsing and matching.
//!
//! The same policy backs both the CORS middleware and the WebSocket upgrade
//! check (CORS middleware does not protect upgrades). Entries may be `*`, a
//! bare hostname, `host:port`, or a full `scheme://host[:port]` URL; matching
//! compares scheme (when the entry specifies one), case-insensitive hostname,
//! and port (when the entry specifies one).
//!
//! The active policy is held behind an [`arc_swap::ArcSwap`] so
//! `PATCH /api/v1/config` can replace it atomically while requests are in
//! flight.

use std::sync::Arc;

use arc_swap::ArcSwap;
use url::Url;

/// One parsed allowlist entry.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Entry {
    /// `*` — matches every origin.
    Any,
    /// Host with optional scheme and port constraints.
    Host {
        scheme: Option<String>,
        host: String,
        port: Option<u16>,
    },
}

/// Immutable snapshot of the origin allowlist.
#[derive(Clone, Debug, Default)]
pub struct OriginPolicy {
    entries: Vec<Entry>,
    raw: Vec<String>,
}

impl OriginPolicy {
    /// Parses an allowlist. Unparseable entries are skipped with a warning
    /// rather than failing the whole policy.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        let mut raw = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match parse_entry(entry) {
                Some(e) => {
                    parsed.push(e);
                    raw.push(entry.to_string());
                }
                None => tracing::warn!(entry, "skipping unparseable origin allowlist entry"),
            }
        }
        Self {
            entries: parsed,
            raw,
        }
    }

    /// Loopback origins under http and https, the out-of-the-box policy.
    pub fn default_loopback() -> Self {
        Self::new([
            "http://localhost",
            "https://localhost",
            "http://127.0.0.1",
            "https://127.0.0.1",
            "http://[::1]",
            "https://[::1]",
        ])
    }

    /// The entries as configured, for the config read endpoint.
    pub fn raw_entries(&self) -> &[String] {
        &self.raw
    }

    /// Whether `origin` (an `Origin` header value) is allowed.
    pub fn allows(&self, origin: &str) -> bool {
        let Ok(url) = Url::parse(origin) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let scheme = url.scheme().to_ascii_lowercase();
        let port = url.port_or_known_default();

        self.entries.iter().any(|entry| match entry {
            Entry::Any => true,
            Entry::Host {
                scheme: want_scheme,
                host: want_host,
                port: want_port,
            } => {
                if let Some(want) = want_scheme {
                    if *want != scheme {
                        return false;
                    }
                }
                if *want_host != host {
                    return false;
                }
                if let Some(want) = want_port {
                    if Some(*want) != port {
                        return false;
                    }
                }
                true
            }
        })
    }
}

fn parse_entry(entry: &str) -> Option<Entry> {
    if entry == "*" {
        return Some(Entry::Any);
    }

    if entry.contains("://") {
        let url = Url::parse(entry).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        return Some(Entry::Host {
            scheme: Some(url.scheme().to_ascii_lowercase()),
            host,
            port: url.port(),
        });
    }

    // Bare `host` or `host:port`. Bracketed IPv6 literals keep their colons.
    if let Some(rest) = entry.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let host = format!("[{}]", host.to_ascii_lowercase());
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p.parse().ok()?),
            None if tail.is_empty() => None,
            None => return None,
        };
        return Some(Entry::Host {
            scheme: None,
            host,
            port,
        });
    }

    match entry.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Some(Entry::Host {
            scheme: None,
            host: host.to_ascii_lowercase(),
            port: Some(port.parse().ok()?),
        }),
        _ => Some(Entry::Host {
            scheme: None,
            host: entry.to_ascii_lowercase(),
            port: None,
        }),
    }
}

/// Shared, atomically replaceable origin policy.
#[derive(Clone)]
pub struct OriginPolicyHandle {
    inner: Arc<ArcSwap<OriginPolicy>>,
}

impl OriginPolicyHandle {
    pub fn new(policy: OriginPolicy) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(policy)),
        }
    }

    pub fn load(&self) -> Arc<OriginPolicy> {
        self.inner.load_full()
    }

    /// Replaces the active policy. Callers race only against readers, which
    /// keep whatever snapshot they already loaded.
    pub fn replace(&self, policy: OriginPolicy) {
        self.inner.store(Arc::new(policy));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_allows_everything() {
        let policy = OriginPolicy::new(["*"]);
        assert!(policy.allows("https://anything.example"));
        assert!(policy.allows("http://localhost:9999"));
    }

    #[test]
    fn full_url_entry_matches_scheme_and_host() {
        let policy = OriginPolicy::new(["http://localhost"]);
        assert!(policy.allows("http://localhost"));
        assert!(policy.allows("http://LOCALHOST"));
        assert!(!policy.allows("https://localhost"));
        assert!(!policy.allows("http://evil.example"));
    }

    #[test]
    fn host_port_entry_ignores_scheme() {
        let policy = OriginPolicy::new(["app.example.com:8443"]);
        assert!(policy.allows("https://app.example.com:8443"));
        assert!(policy.allows("http://app.example.com:8443"));
        assert!(!policy.allows("https://app.example.com:9000"));
    }

    #[test]
    fn bare_host_matches_any_scheme_and_port() {
        let policy = OriginPolicy::new(["app.example.com"]);
        assert!(policy.allows("https://app.example.com"));
        assert!(policy.allows("http://app.example.com:3000"));
        assert!(!policy.allows("https://other.example.com"));
    }

    #[test]
    fn explicit_port_matches_known_default() {
        let policy = OriginPolicy::new(["https://app.example.com:443"]);
        assert!(policy.allows("https://app.example.com"));
    }

    #[test]
    fn loopback_defaults_cover_ipv6() {
        let policy = OriginPolicy::default_loopback();
        assert!(policy.allows("http://localhost"));
        assert!(policy.allows("https://127.0.0.1"));
        assert!(policy.allows("http://[::1]"));
        assert!(!policy.allows("http://192.168.1.10"));
    }

    #[test]
    fn garbage_origin_is_rejected() {
        let policy = OriginPolicy::new(["*"]);
        assert!(!policy.allows("not a url"));
    }

    #[test]
    fn handle_swaps_atomically() {
        let handle = OriginPolicyHandle::new(OriginPolicy::new(["http://localhost"]));
        assert!(!handle.load().allows("https://app.example.com"));
        handle.replace(OriginPolicy::new(["https://app.example.com"]));
        assert!(handle.load().allows("https://app.example.com"));
    }
}
