//! URL normalization and host extraction.
//!
//! Rule matching works on three derived subjects of a URL:
//!
//! - the normalized URL (`scheme://host[:port]path`) for prefix rules
//! - the `host[:port]` for exact hostname rules
//! - the registrable domain (public suffix + 1) for domain rules

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?::[0-9]{1,5})?$",
    )
    .expect("host pattern is valid")
});

/// Strips query string, fragment and userinfo from a URL.
///
/// Parseable URLs become `scheme://host[:port]path` with the host
/// lower-cased. A port written in the input is kept, even the scheme's
/// default. Anything else is truncated at the first `?` or `#`. The function
/// is idempotent.
pub fn normalize_url(input: &str) -> String {
    let input = input.trim();
    match Url::parse(input) {
        Ok(parsed) if parsed.has_host() => {
            let host = parsed.host_str().unwrap_or_default();
            let mut out = format!("{}://{}", parsed.scheme(), host);
            if let Some(port) = parsed.port().or_else(|| written_port(input)) {
                out.push(':');
                out.push_str(&port.to_string());
            }
            out.push_str(parsed.path());
            out
        }
        _ => {
            let end = input.find(|c: char| c == '?' || c == '#').unwrap_or(input.len());
            input[..end].to_string()
        }
    }
}

/// Port spelled out in the authority of a raw URL. `Url` forgets default
/// ports, so they are read from the input.
fn written_port(input: &str) -> Option<u16> {
    let rest = input.split_once("://")?.1;
    let authority = &rest[..rest.find(['/', '?', '#']).unwrap_or(rest.len())];
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = strip_port(host_port);
    if host.len() == host_port.len() {
        return None;
    }
    host_port[host.len() + 1..].parse().ok()
}

/// Returns the `host[:port]` part of a URL.
pub fn hostname(url: &str) -> String {
    let normalized = normalize_url(url);
    let rest = match normalized.split_once("://") {
        Some((_, rest)) => rest,
        None => normalized.as_str(),
    };
    let end = rest.find('/').unwrap_or(rest.len());
    rest[..end].to_string()
}

/// Removes a trailing `:port` from a host, leaving IPv6 literals intact.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port))
            if !name.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name
        }
        _ => host,
    }
}

/// Returns the registrable domain (public suffix + 1) of a host or URL.
///
/// Falls back to the bare host when the public suffix list has no answer
/// (IP addresses, single labels).
pub fn registrable_domain(host_or_url: &str) -> String {
    let host = if host_or_url.contains("://") {
        hostname(host_or_url)
    } else {
        host_or_url.to_string()
    };
    let bare = strip_port(&host).trim_end_matches('.').to_ascii_lowercase();
    if bare.starts_with('[') || bare.parse::<std::net::Ipv4Addr>().is_ok() {
        return bare;
    }
    match psl::domain_str(&bare) {
        Some(domain) => domain.to_string(),
        None => bare,
    }
}

/// Checks `label(.label)+` optionally followed by `:port`.
pub fn validate_host(host: &str) -> bool {
    HOST_RE.is_match(host)
}

/// The three rule-matching subjects of a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSubjects {
    /// Normalized URL, matched by prefix rules.
    pub url: String,
    /// `host[:port]`, matched by exact hostname rules.
    pub hostname: String,
    /// Registrable domain, matched by domain rules.
    pub domain: String,
}

impl UrlSubjects {
    /// Derives all subjects from a raw URL.
    pub fn from_url(url: &str) -> Self {
        let url = normalize_url(url);
        let hostname = hostname(&url);
        let domain = registrable_domain(&hostname);
        Self {
            url,
            hostname,
            domain,
        }
    }

    /// Hostname without its port, as used for reputation lookups.
    pub fn bare_host(&self) -> &str {
        strip_port(&self.hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_query_and_fragment() {
        assert_eq!(
            normalize_url("https://www.example.com/page?x=1#top"),
            "https://www.example.com/page"
        );
        assert_eq!(
            normalize_url("HTTPS://WWW.Example.com/Path"),
            "https://www.example.com/Path"
        );
        assert_eq!(normalize_url("https://user:pw@host.com/a"), "https://host.com/a");
    }

    #[test]
    fn normalize_keeps_explicit_port() {
        assert_eq!(
            normalize_url("http://localhost:8081/x?y"),
            "http://localhost:8081/x"
        );
        assert_eq!(normalize_url("https://a.com:443/x"), "https://a.com:443/x");
        assert_eq!(normalize_url("https://a.com/x"), "https://a.com/x");
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in [
            "https://www.dhl.de/de/privatkunden/?q=1",
            "http://a.b.example.co.uk:8080/x/y#frag",
            "https://example.com",
            "not a url?query",
            "ftp://files.example.org/pub/",
            "https://a.com:443/x?q",
            "http://[::1]:80/",
        ] {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once, "input {input}");
        }
    }

    #[test]
    fn normalize_unparseable_truncates() {
        assert_eq!(normalize_url("www.example.com/x?y=1"), "www.example.com/x");
        assert_eq!(normalize_url("garbage#frag"), "garbage");
    }

    #[test]
    fn hostname_includes_port() {
        assert_eq!(hostname("https://www.example.com/page"), "www.example.com");
        assert_eq!(hostname("http://localhost:8081/x"), "localhost:8081");
        assert_eq!(hostname("https://h.example:443/"), "h.example:443");
        assert_eq!(hostname("https://user@h.example:443/"), "h.example:443");
        assert_eq!(hostname("www.example.com/x"), "www.example.com");
    }

    #[test]
    fn registrable_domain_uses_public_suffix() {
        assert_eq!(
            registrable_domain("https://a.b.example.co.uk/x"),
            "example.co.uk"
        );
        assert_eq!(registrable_domain("www.whatismyip.com"), "whatismyip.com");
        assert_eq!(registrable_domain("api.sub.blocked.com:8443"), "blocked.com");
    }

    #[test]
    fn registrable_domain_falls_back_to_host() {
        assert_eq!(registrable_domain("10.0.0.1:8080"), "10.0.0.1");
    }

    #[test]
    fn strip_port_variants() {
        assert_eq!(strip_port("example.com:443"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("example.com:abc"), "example.com:abc");
    }

    #[test]
    fn validate_host_syntax() {
        assert!(validate_host("www.example.com"));
        assert!(validate_host("example.com:8443"));
        assert!(validate_host("a-b.c-d.io"));
        assert!(!validate_host("invalid-hostname"));
        assert!(!validate_host("-bad.com"));
        assert!(!validate_host("bad..com"));
        assert!(!validate_host("a.com/path"));
        assert!(!validate_host(""));
    }

    #[test]
    fn subjects_from_url() {
        let subjects = UrlSubjects::from_url("https://www.example.com:8443/page?x");
        assert_eq!(subjects.url, "https://www.example.com:8443/page");
        assert_eq!(subjects.hostname, "www.example.com:8443");
        assert_eq!(subjects.domain, "example.com");
        assert_eq!(subjects.bare_host(), "www.example.com");
    }
}
