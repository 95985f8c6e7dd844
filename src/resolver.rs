//! Host name expansion for inet schemes.

use std::net::ToSocketAddrs;

use log::debug;

use crate::api::Api;
use crate::connector::ConnectorType;
use crate::error::{Error, Result};
use crate::url::Url;

/// Expand a URL whose authority is a host name into one URL per resolved
/// address, with canonical IP literals.
///
/// URLs that already carry an IP literal, and URLs of schemes that do not
/// name hosts, pass through unchanged as a single-element vector. Name
/// resolution itself is the system resolver's business.
pub fn resolve_url(api: &Api, url: &Url) -> Result<Vec<Url>> {
    let info = api.registry().info_for_scheme(&url.scheme)?;
    match info.conn_type {
        ConnectorType::Tcp
        | ConnectorType::Tcp4
        | ConnectorType::Tcp6
        | ConnectorType::Udp
        | ConnectorType::Udp4
        | ConnectorType::Udp6 => {}
        _ => return Ok(vec![url.clone()]),
    }

    if url.authority.is_empty() {
        return Err(Error::Format);
    }

    // Already a literal? Nothing to do.
    if crate::peer_address::PeerAddress::new(api, url).is_ok() {
        return Ok(vec![url.clone()]);
    }

    let (host, port) = split_host_port(&url.authority)?;

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::AddressNotAvailable)?;

    let v4_wanted = matches!(info.conn_type, ConnectorType::Tcp4 | ConnectorType::Udp4);
    let v6_wanted = matches!(info.conn_type, ConnectorType::Tcp6 | ConnectorType::Udp6);

    let mut result = Vec::new();
    for addr in addrs {
        if (v4_wanted && !addr.is_ipv4()) || (v6_wanted && !addr.is_ipv6()) {
            continue;
        }
        let mut resolved = url.clone();
        resolved.authority = addr.to_string();
        result.push(resolved);
    }

    debug!("resolved {} to {} address(es)", url.authority, result.len());
    if result.is_empty() {
        return Err(Error::AddressNotAvailable);
    }
    Ok(result)
}

fn split_host_port(authority: &str) -> Result<(&str, u16)> {
    match authority.rsplit_once(':') {
        // A colon inside a v6 literal is not a port separator.
        Some((host, port)) if !host.contains(':') => {
            let port = port.parse::<u16>().map_err(|_| Error::Format)?;
            Ok((host, port))
        }
        _ => Ok((authority, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_pass_through() {
        let api = Api::new().unwrap();
        let url = Url::parse("tcp://127.0.0.1:80").unwrap();
        let resolved = resolve_url(&api, &url).unwrap();
        assert_eq!(resolved, vec![url]);
    }

    #[test]
    fn non_inet_schemes_pass_through() {
        let api = Api::new().unwrap();
        let url = Url::parse("anon://").unwrap();
        let resolved = resolve_url(&api, &url).unwrap();
        assert_eq!(resolved, vec![url]);
    }

    #[test]
    fn localhost_resolves_to_loopback() {
        let api = Api::new().unwrap();
        let url = Url::parse("tcp://localhost:8080").unwrap();
        let resolved = resolve_url(&api, &url).unwrap();
        assert!(!resolved.is_empty());
        for r in &resolved {
            assert_eq!(r.scheme, "tcp");
            let addr: std::net::SocketAddr = r.authority.parse().unwrap();
            assert_eq!(addr.port(), 8080);
            assert!(addr.ip().is_loopback());
        }
    }

    #[test]
    fn family_specific_schemes_filter() {
        let api = Api::new().unwrap();
        let url = Url::parse("tcp4://localhost:80").unwrap();
        if let Ok(resolved) = resolve_url(&api, &url) {
            for r in &resolved {
                let addr: std::net::SocketAddr = r.authority.parse().unwrap();
                assert!(addr.is_ipv4());
            }
        }
    }

    #[test]
    fn host_port_split() {
        assert_eq!(split_host_port("example.com:80").unwrap(), ("example.com", 80));
        assert_eq!(split_host_port("example.com").unwrap(), ("example.com", 0));
        assert_eq!(split_host_port("::1").unwrap(), ("::1", 0));
    }
}
