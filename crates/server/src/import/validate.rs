use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::Url;

use decant_common::DecantError;

/// Cloud metadata endpoints blocked by hostname.
const BLOCKED_HOSTS: [&str; 3] = [
    "metadata.google.internal",
    "metadata.azure.com",
    "169.254.169.254",
];

/// Parse and validate an import URL: http(s) only, hostname required.
pub fn validate_url(raw: Option<&str>) -> Result<Url, DecantError> {
    let Some(raw) = raw else {
        return Err(DecantError::UrlRequired);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DecantError::UrlEmpty);
    }

    let parsed = Url::parse(raw).map_err(|e| DecantError::UrlInvalid(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(DecantError::UrlInvalidProtocol(other.to_string())),
    }

    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(DecantError::UrlNoHostname);
    }

    Ok(parsed)
}

/// Refuse targets that would let an import reach loopback, private, or
/// cloud-metadata address space. Checks the host literal only — no DNS
/// resolution happens here.
pub fn check_ssrf(url: &Url) -> Result<(), DecantError> {
    let host = url
        .host_str()
        .ok_or(DecantError::UrlNoHostname)?
        .trim_matches(&['[', ']'][..])
        .to_ascii_lowercase();

    if host == "localhost" || host.ends_with(".localhost") {
        return Err(DecantError::SsrfBlocked(host));
    }
    if BLOCKED_HOSTS.contains(&host.as_str()) {
        return Err(DecantError::SsrfBlocked(host));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(DecantError::SsrfBlocked(host));
        }
    }

    Ok(())
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()                                      // 127/8
        || ip.is_unspecified()                            // 0.0.0.0
        || octets[0] == 10                                // 10/8
        || (octets[0] == 172 && (16..=31).contains(&octets[1])) // 172.16/12
        || (octets[0] == 192 && octets[1] == 168)         // 192.168/16
        || (octets[0] == 169 && octets[1] == 254)         // 169.254/16
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    // IPv4-mapped addresses are judged by their embedded IPv4.
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_blocked_v4(mapped);
    }
    let segments = ip.segments();
    ip.is_loopback()                                      // ::1
        || ip.is_unspecified()
        || (segments[0] & 0xfe00) == 0xfc00               // fc00::/7 unique local
        || (segments[0] & 0xffc0) == 0xfe80               // fe80::/10 link-local
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_validate_missing_and_empty() {
        assert!(matches!(validate_url(None), Err(DecantError::UrlRequired)));
        assert!(matches!(validate_url(Some("  ")), Err(DecantError::UrlEmpty)));
    }

    #[test]
    fn test_validate_malformed() {
        assert!(matches!(
            validate_url(Some("not a url")),
            Err(DecantError::UrlInvalid(_))
        ));
    }

    #[test]
    fn test_validate_protocol() {
        assert!(matches!(
            validate_url(Some("ftp://example.com/file")),
            Err(DecantError::UrlInvalidProtocol(_))
        ));
        assert!(validate_url(Some("https://example.com")).is_ok());
    }

    #[test]
    fn test_ssrf_blocks_localhost_names() {
        assert!(check_ssrf(&parsed("http://localhost/x")).is_err());
        assert!(check_ssrf(&parsed("http://api.localhost/x")).is_err());
        assert!(check_ssrf(&parsed("http://127.0.0.1/x")).is_err());
        assert!(check_ssrf(&parsed("http://[::1]/x")).is_err());
    }

    #[test]
    fn test_ssrf_blocks_private_ranges() {
        for target in [
            "http://10.0.0.5/",
            "http://172.16.1.1/",
            "http://172.31.255.255/",
            "http://192.168.1.10/",
            "http://169.254.0.7/",
        ] {
            assert!(check_ssrf(&parsed(target)).is_err(), "{}", target);
        }
    }

    #[test]
    fn test_ssrf_blocks_metadata_endpoints() {
        assert!(check_ssrf(&parsed("http://169.254.169.254/latest/")).is_err());
        assert!(check_ssrf(&parsed("http://metadata.google.internal/v1")).is_err());
        assert!(check_ssrf(&parsed("https://metadata.azure.com/x")).is_err());
    }

    #[test]
    fn test_ssrf_blocks_ipv6_local_space() {
        assert!(check_ssrf(&parsed("http://[fc00::1]/")).is_err());
        assert!(check_ssrf(&parsed("http://[fd12:3456::1]/")).is_err());
        assert!(check_ssrf(&parsed("http://[fe80::1]/")).is_err());
        assert!(check_ssrf(&parsed("http://[::ffff:10.0.0.1]/")).is_err());
    }

    #[test]
    fn test_ssrf_allows_public_targets() {
        assert!(check_ssrf(&parsed("https://example.com/a")).is_ok());
        assert!(check_ssrf(&parsed("http://172.32.0.1/")).is_ok());
        assert!(check_ssrf(&parsed("http://8.8.8.8/")).is_ok());
    }
}
