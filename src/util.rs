//! Address formatting helpers.
//!
//! # Responsibilities
//! - Normalize IPv6 literals for host:port composition (bracket handling)
//! - Default the scheme on resolved peer addresses

/// Bracket an IPv6 literal so it can be joined with a port.
///
/// IPv4 addresses and hostnames pass through unchanged.
pub fn bracket_ipv6(host: &str) -> String {
    if host.contains('.') || !host.contains(':') || host.starts_with('[') {
        return host.to_string();
    }
    format!("[{}]", host)
}

/// Compose a `host:port` address, bracketing IPv6 hosts.
pub fn host_port(host: &str, port: u16) -> String {
    format!("{}:{}", bracket_ipv6(host), port)
}

/// Prepend `http://` when the address carries no explicit scheme.
pub fn ensure_scheme(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_passthrough() {
        assert_eq!(bracket_ipv6("10.0.0.1"), "10.0.0.1");
        assert_eq!(host_port("10.0.0.1", 8080), "10.0.0.1:8080");
    }

    #[test]
    fn test_ipv6_brackets() {
        assert_eq!(bracket_ipv6("::1"), "[::1]");
        assert_eq!(bracket_ipv6("[::1]"), "[::1]");
        assert_eq!(host_port("fe80::2", 80), "[fe80::2]:80");
    }

    #[test]
    fn test_scheme_defaulting() {
        assert_eq!(ensure_scheme("127.0.0.1:80"), "http://127.0.0.1:80");
        assert_eq!(ensure_scheme("http://a:1"), "http://a:1");
        assert_eq!(ensure_scheme("https://a:1"), "https://a:1");
    }
}
