//! UDP endpoint parsing and address-candidate selection
//!
//! Endpoints arrive as `udp://[bind-addr:]port` (sources) or
//! `udp://host:port` (destinations). Resolution follows the usual
//! getaddrinfo contract: resolve the name to a candidate list, then try
//! socket creation plus bind/connect on each candidate in order, keeping
//! the first that succeeds.

use crate::error::{Error, Result};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

/// A parsed `udp://` endpoint, before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpEndpoint {
    pub host: String,
    pub port: u16,
}

fn strip_scheme(path: &str) -> &str {
    path.strip_prefix("udp://").unwrap_or(path)
}

fn parse_port(text: &str, path: &str) -> Result<u16> {
    text.parse()
        .map_err(|_| Error::Endpoint(format!("invalid port in UDP endpoint: {}", path)))
}

/// Parse a source endpoint. A bare port binds the wildcard address.
pub fn parse_udp_source(path: &str) -> Result<UdpEndpoint> {
    let rest = strip_scheme(path);
    match rest.rfind(':') {
        None => Ok(UdpEndpoint {
            host: "0.0.0.0".to_string(),
            port: parse_port(rest, path)?,
        }),
        Some(pos) => Ok(UdpEndpoint {
            host: trim_brackets(&rest[..pos]).to_string(),
            port: parse_port(&rest[pos + 1..], path)?,
        }),
    }
}

/// Parse a destination endpoint. Host and port are both required.
pub fn parse_udp_dest(path: &str) -> Result<UdpEndpoint> {
    let rest = strip_scheme(path);
    match rest.rfind(':') {
        None => Err(Error::Endpoint(format!(
            "invalid UDP destination address format (expected host:port): {}",
            path
        ))),
        Some(pos) => Ok(UdpEndpoint {
            host: trim_brackets(&rest[..pos]).to_string(),
            port: parse_port(&rest[pos + 1..], path)?,
        }),
    }
}

/// IPv6 literals may arrive bracketed, `[::1]:9876`.
fn trim_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Resolve an endpoint to its candidate address list.
pub fn resolve(endpoint: &UdpEndpoint, path: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| Error::Endpoint(format!("could not resolve {}: {}", path, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::Endpoint(format!("no addresses found for {}", path)));
    }
    for addr in &addrs {
        log::debug!("resolved {} candidate: {}", path, addr);
    }
    Ok(addrs)
}

/// Bind a UDP socket to the first workable candidate.
pub fn bind_first(addrs: &[SocketAddr], path: &str) -> Result<UdpSocket> {
    for addr in addrs {
        match UdpSocket::bind(addr) {
            Ok(sock) => {
                log::debug!("bound to {}", addr);
                return Ok(sock);
            }
            Err(e) => log::debug!("bind to {} failed: {}", addr, e),
        }
    }
    Err(Error::Endpoint(format!(
        "could not bind a UDP socket for {}",
        path
    )))
}

/// Connect a UDP socket to the first workable candidate.
pub fn connect_first(addrs: &[SocketAddr], path: &str) -> Result<UdpSocket> {
    for addr in addrs {
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let sock = match UdpSocket::bind(local) {
            Ok(s) => s,
            Err(e) => {
                log::debug!("local bind for {} failed: {}", addr, e);
                continue;
            }
        };
        match sock.connect(addr) {
            Ok(()) => {
                log::debug!("connected to {}", addr);
                return Ok(sock);
            }
            Err(e) => log::debug!("connect to {} failed: {}", addr, e),
        }
    }
    Err(Error::Endpoint(format!(
        "could not connect a UDP socket to any resolved address for {}",
        path
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_bare_port() {
        let ep = parse_udp_source("udp://9876").unwrap();
        assert_eq!(
            ep,
            UdpEndpoint {
                host: "0.0.0.0".to_string(),
                port: 9876
            }
        );
    }

    #[test]
    fn test_parse_source_with_bind_addr() {
        let ep = parse_udp_source("udp://127.0.0.1:9876").unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 9876);
    }

    #[test]
    fn test_parse_ipv6_brackets() {
        let ep = parse_udp_dest("udp://[::1]:80").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 80);
    }

    #[test]
    fn test_parse_dest_requires_host_and_port() {
        assert!(matches!(
            parse_udp_dest("udp://9876"),
            Err(Error::Endpoint(_))
        ));
        let ep = parse_udp_dest("udp://example.com:53").unwrap();
        assert_eq!(ep.host, "example.com");
        assert_eq!(ep.port, 53);
    }

    #[test]
    fn test_parse_bad_port() {
        assert!(matches!(
            parse_udp_source("udp://localhost:notaport"),
            Err(Error::Endpoint(_))
        ));
        assert!(matches!(
            parse_udp_source("udp://70000"),
            Err(Error::Endpoint(_))
        ));
    }

    #[test]
    fn test_bind_first_loopback() {
        let ep = parse_udp_source("udp://127.0.0.1:0").unwrap();
        let addrs = resolve(&ep, "udp://127.0.0.1:0").unwrap();
        let sock = bind_first(&addrs, "udp://127.0.0.1:0").unwrap();
        assert_eq!(sock.local_addr().unwrap().ip().to_string(), "127.0.0.1");
    }
}
