use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Hostnames that always point back into the serving infrastructure.
const PRIVATE_HOSTNAMES: &[&str] = &["localhost", "localhost.localdomain", "metadata.google.internal"];

/// Reasons a candidate feed URL is refused.
///
/// These cover both parsing failures and the SSRF (Server-Side Request
/// Forgery) policy. The [`reason`](UrlRejection::reason) tag is surfaced to
/// callers so they can tell a typo from a blocked target.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlRejection {
    /// The URL uses a scheme other than http or https.
    #[error("protocol")]
    Protocol,
    /// An allow-list is configured and the host matches none of its entries.
    #[error("host-not-allowed")]
    HostNotAllowed,
    /// The host is a loopback, private, link-local or otherwise internal target.
    #[error("private-host")]
    PrivateHost,
    /// The string could not be parsed as an absolute URL with a host.
    #[error("bad-url")]
    BadUrl,
}

impl UrlRejection {
    /// Stable kebab-case tag for this rejection.
    pub fn reason(self) -> &'static str {
        match self {
            UrlRejection::Protocol => "protocol",
            UrlRejection::HostNotAllowed => "host-not-allowed",
            UrlRejection::PrivateHost => "private-host",
            UrlRejection::BadUrl => "bad-url",
        }
    }
}

/// Validates a candidate upstream feed URL against the proxy's SSRF policy.
///
/// Checks run in this order:
/// 1. the string parses as an absolute URL with a host ([`UrlRejection::BadUrl`])
/// 2. the scheme is `http` or `https` ([`UrlRejection::Protocol`])
/// 3. when `allow_hosts` is non-empty, the host equals an entry or is a
///    subdomain of one ([`UrlRejection::HostNotAllowed`])
/// 4. the host is not private ([`UrlRejection::PrivateHost`], see [`is_private_host`])
///
/// The returned URL is canonical: the fragment is dropped and the `url`
/// crate's normalization applies (lowercase scheme and host, default port
/// removed, numeric IPv4 spellings folded to dotted quads).
///
/// Classification is purely lexical. No DNS lookup happens here, so a public
/// hostname that resolves to a private address is NOT caught.
///
/// # Examples
///
/// ```
/// use feedrelay::util::{safe_feed_url, UrlRejection};
///
/// let url = safe_feed_url("https://Example.com:443/feed#top", &[]).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed");
///
/// assert_eq!(safe_feed_url("http://10.0.0.5/feed", &[]), Err(UrlRejection::PrivateHost));
/// assert_eq!(safe_feed_url("ftp://example.com/feed", &[]), Err(UrlRejection::Protocol));
///
/// let allow = vec!["example.com".to_string()];
/// assert!(safe_feed_url("https://blog.example.com/feed", &allow).is_ok());
/// assert_eq!(
///     safe_feed_url("https://other.com/feed", &allow),
///     Err(UrlRejection::HostNotAllowed)
/// );
/// ```
pub fn safe_feed_url(candidate: &str, allow_hosts: &[String]) -> Result<Url, UrlRejection> {
    let mut url = Url::parse(candidate.trim()).map_err(|_| UrlRejection::BadUrl)?;

    match url.scheme() {
        "http" | "https" => {}
        _ => return Err(UrlRejection::Protocol),
    }

    let host = url.host().ok_or(UrlRejection::BadUrl)?;

    if !allow_hosts.is_empty() && !host_allowed(&host, allow_hosts) {
        return Err(UrlRejection::HostNotAllowed);
    }

    if is_private_host(&host) {
        return Err(UrlRejection::PrivateHost);
    }

    url.set_fragment(None);
    Ok(url)
}

/// Parses a comma-separated allow-list such as the `ALLOW_HOSTS` environment variable.
///
/// Entries are trimmed and lowercased; a leading `.` is dropped so
/// `.example.com` and `example.com` mean the same thing. Empty entries are skipped.
pub fn parse_allow_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|entry| entry.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn host_allowed(host: &Host<&str>, allow_hosts: &[String]) -> bool {
    let name = match host {
        Host::Domain(domain) => domain.trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    };

    allow_hosts.iter().any(|allowed| {
        name == *allowed
            || name
                .strip_suffix(allowed.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Returns `true` when `host` names an internal or non-routable target.
///
/// Covers `localhost` (and any `*.localhost`), `localhost.localdomain`,
/// `metadata.google.internal`; IPv4 `0.0.0.0`, `127.0.0.0/8`, `10.0.0.0/8`,
/// `172.16.0.0/12`, `192.168.0.0/16`, `169.254.0.0/16` (including the cloud
/// metadata address) and `100.64.0.0/10`; IPv6 `::`, `::1`, `fe80::/10`,
/// `fc00::/7`, and IPv4-mapped addresses whose IPv4 part is private.
pub fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let name = domain.trim_end_matches('.').to_ascii_lowercase();
            if PRIVATE_HOSTNAMES.contains(&name.as_str()) || name.ends_with(".localhost") {
                return true;
            }
            // Domains that are really IP literals (e.g. with a trailing dot)
            name.parse::<IpAddr>().is_ok_and(|ip| is_private_ip(&ip))
        }
        Host::Ipv4(ip) => is_private_ipv4(ip),
        Host::Ipv6(ip) => is_private_ipv6(ip),
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_private_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_private_ipv6(ipv6),
    }
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    // Carrier-grade NAT (100.64.0.0/10)
    let is_shared = a == 100 && (b & 0xc0) == 64;
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified() || is_shared
}

fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_private_ipv4(&mapped);
    }
    let segments = ip.segments();
    // Unique Local (fc00::/7)
    let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
    // Link-Local (fe80::/10)
    let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
    is_unique_local || is_link_local
}
