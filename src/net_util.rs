//! Small networking helpers: CIDR normalization and host extraction
//!
//! NetworkPolicy IP blocks require CIDR notation, while the intent objects
//! and external directories hand us bare addresses, `host:port` pairs and
//! full URLs. Everything funnels through here so the rest of the operator
//! only deals in validated CIDRs and bare hostnames.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::Error;

/// Normalize a bare IP to a single-host CIDR and validate the result.
///
/// `1.2.3.4` becomes `1.2.3.4/32`, `::1` becomes `::1/128`; inputs already in
/// CIDR notation are validated as-is. Invalid input is a permanent error, the
/// destination can never resolve until the spec is fixed.
pub fn normalize_cidr(input: &str) -> Result<String, Error> {
    if input.contains('/') {
        input
            .parse::<IpNet>()
            .map_err(|_| Error::validation(format!("{input:?} is not a valid CIDR")))?;
        return Ok(input.to_string());
    }

    let addr: IpAddr = input
        .parse()
        .map_err(|_| Error::validation(format!("{input:?} is not a valid IP address")))?;
    let max_len = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    let net = IpNet::new(addr, max_len)
        .map_err(|_| Error::validation(format!("{input:?} is not a valid IP address")))?;
    Ok(net.to_string())
}

/// Whether the input is an IP address or CIDR range (as opposed to a hostname)
pub fn is_ip_range(input: &str) -> bool {
    normalize_cidr(input).is_ok()
}

/// Single-host CIDR for a resolved address (`/32` for IPv4, `/128` for IPv6)
pub fn single_host_cidr(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("{ip}/128"),
        _ => format!("{ip}/32"),
    }
}

/// Extract the bare host from a router address, which may be a URL
/// (`https://myapp.io`), a `host:port` pair, or already a bare hostname.
pub fn url_to_host(addr: &str) -> String {
    let without_scheme = addr
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(addr);

    let host_port = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);

    // Strip one trailing ":port" when present; IPv6 literals (which contain
    // multiple colons) are left alone.
    match host_port.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            host.to_string()
        }
        _ => host_port.to_string(),
    }
}

/// Split a bind address into host and port, defaulting the port from the
/// URL scheme (443 for https, 80 otherwise).
pub fn parse_host_port(addr: &str) -> (String, u16) {
    let mut port = if addr.starts_with("https://") { 443 } else { 80 };

    let without_scheme = addr
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(addr);
    let host_port = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);

    let host = match host_port.rsplit_once(':') {
        Some((host, p)) if !host.contains(':') => {
            if let Ok(parsed) = p.parse::<u16>() {
                port = parsed;
            }
            host.to_string()
        }
        _ => host_port.to_string(),
    };

    (host, port)
}

/// Whether a bind host points at an in-cluster service (already reachable
/// through the app's own pod selector rule)
pub fn is_kubernetes_internal(host: &str) -> bool {
    host.contains("svc.cluster.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ipv4_normalizes_to_slash_32() {
        assert_eq!(normalize_cidr("100.100.100.100").unwrap(), "100.100.100.100/32");
        assert_eq!(normalize_cidr("1.1.1.1").unwrap(), "1.1.1.1/32");
    }

    #[test]
    fn bare_ipv6_normalizes_to_slash_128() {
        assert_eq!(normalize_cidr("::1").unwrap(), "::1/128");
        assert_eq!(normalize_cidr("2001:db8::1").unwrap(), "2001:db8::1/128");
    }

    #[test]
    fn explicit_cidrs_are_validated_not_rewritten() {
        assert_eq!(normalize_cidr("10.0.0.0/8").unwrap(), "10.0.0.0/8");
        assert_eq!(normalize_cidr("2001:db8::/32").unwrap(), "2001:db8::/32");
    }

    #[test]
    fn invalid_input_is_rejected() {
        assert!(normalize_cidr("300.0.0.1").is_err());
        assert!(normalize_cidr("10.0.0.0/33").is_err());
        assert!(normalize_cidr("2001:db8::/129").is_err());
        assert!(normalize_cidr("example.com").is_err());
        assert!(normalize_cidr("").is_err());
    }

    /// A malformed prefix must never pass through into an IPBlock, the API
    /// server would reject the whole NetworkPolicy.
    #[test]
    fn signed_or_garbage_prefixes_are_rejected() {
        assert!(normalize_cidr("1.1.1.1/+24").is_err());
        assert!(normalize_cidr("1.1.1.1/-1").is_err());
        assert!(normalize_cidr("1.1.1.1/").is_err());
        assert!(normalize_cidr("1.1.1.1/24/8").is_err());
    }

    #[test]
    fn ip_range_detection_drives_upstream_classification() {
        assert!(is_ip_range("3.3.3.3"));
        assert!(is_ip_range("10.0.0.0/8"));
        assert!(!is_ip_range("api.example.com"));
    }

    #[test]
    fn router_addresses_reduce_to_bare_hosts() {
        assert_eq!(url_to_host("https://myapp.io"), "myapp.io");
        assert_eq!(url_to_host("http.myapp.io"), "http.myapp.io");
        assert_eq!(url_to_host("http://myapp.io/path"), "myapp.io");
        assert_eq!(url_to_host("myapp.io:8080"), "myapp.io");
    }

    #[test]
    fn bind_hosts_carry_scheme_default_ports() {
        assert_eq!(parse_host_port("https://db.example.com"), ("db.example.com".into(), 443));
        assert_eq!(parse_host_port("http://db.example.com"), ("db.example.com".into(), 80));
        assert_eq!(parse_host_port("db.example.com:5432"), ("db.example.com".into(), 5432));
        assert_eq!(parse_host_port("db.example.com"), ("db.example.com".into(), 80));
    }

    #[test]
    fn cluster_internal_binds_are_recognized() {
        assert!(is_kubernetes_internal("mysql.default.svc.cluster.local"));
        assert!(!is_kubernetes_internal("mysql.example.com"));
    }
}
