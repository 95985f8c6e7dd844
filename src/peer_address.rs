//! Peer addresses: a socket address annotated with connector type and
//! canonical scheme.

use std::fmt;
use std::net::SocketAddr;

use crate::api::Api;
use crate::connector::ConnectorType;
use crate::error::{Error, Result};
use crate::url::Url;

/// The address variants a connector can be bound or connected to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SocketAddrKind {
    /// No address, e.g. anonymous pipes.
    Unspec,
    /// An IPv4 or IPv6 socket address.
    Inet(SocketAddr),
    /// A local name: filesystem path, pipe name, or abstract name (leading
    /// NUL byte, Linux only).
    Local(Vec<u8>),
}

impl SocketAddrKind {
    pub fn is_unspec(&self) -> bool {
        matches!(self, SocketAddrKind::Unspec)
    }

    /// The local name as bytes, if this is a local address.
    pub fn local_name(&self) -> Option<&[u8]> {
        match self {
            SocketAddrKind::Local(name) => Some(name),
            _ => None,
        }
    }

    pub fn inet(&self) -> Option<SocketAddr> {
        match self {
            SocketAddrKind::Inet(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl fmt::Display for SocketAddrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddrKind::Unspec => Ok(()),
            SocketAddrKind::Inet(addr) => write!(f, "{}", addr),
            SocketAddrKind::Local(name) => {
                if name.first() == Some(&0) {
                    write!(f, "%00{}", String::from_utf8_lossy(&name[1..]))
                } else {
                    write!(f, "{}", String::from_utf8_lossy(name))
                }
            }
        }
    }
}

/// A socket address, the connector type it belongs to, and the canonical
/// scheme string for that type.
///
/// Construction narrows family-agnostic types against the address family,
/// so `tcp://` with an IPv6 authority yields [`ConnectorType::Tcp6`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    addr: SocketAddrKind,
    conn_type: ConnectorType,
    scheme: String,
}

impl PeerAddress {
    pub fn new(api: &Api, url: &Url) -> Result<PeerAddress> {
        let info = api.registry().info_for_scheme(&url.scheme)?;
        let addr = address_from_url(info.conn_type, url)?;
        PeerAddress::from_parts(api, addr, info.conn_type)
    }

    /// Build from an already known address, narrowing `conn_type` against
    /// the address family.
    pub fn from_parts(api: &Api, addr: SocketAddrKind, conn_type: ConnectorType) -> Result<PeerAddress> {
        let narrowed = best_match(conn_type, &addr).ok_or(Error::Format)?;
        let scheme = api
            .registry()
            .scheme_for_type(narrowed)
            .unwrap_or_default();
        Ok(PeerAddress {
            addr,
            conn_type: narrowed,
            scheme,
        })
    }

    pub fn socket_addr(&self) -> &SocketAddrKind {
        &self.addr
    }

    pub fn conn_type(&self) -> ConnectorType {
        self.conn_type
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.addr {
            SocketAddrKind::Unspec => write!(f, "{}://", self.scheme),
            SocketAddrKind::Inet(addr) => write!(f, "{}://{}", self.scheme, addr),
            SocketAddrKind::Local(_) => write!(f, "{}://{}", self.scheme, self.addr),
        }
    }
}

fn address_from_url(conn_type: ConnectorType, url: &Url) -> Result<SocketAddrKind> {
    match conn_type {
        ConnectorType::Tcp
        | ConnectorType::Tcp4
        | ConnectorType::Tcp6
        | ConnectorType::Udp
        | ConnectorType::Udp4
        | ConnectorType::Udp6 => {
            if url.authority.is_empty() {
                return Err(Error::Format);
            }
            Ok(SocketAddrKind::Inet(parse_inet_authority(&url.authority)?))
        }

        ConnectorType::Local
        | ConnectorType::Fifo
        | ConnectorType::Pipe
        | ConnectorType::Tun
        | ConnectorType::Tap => {
            if url.path.is_empty() {
                return Ok(SocketAddrKind::Unspec);
            }
            let bytes = url.path.as_bytes();
            // An abstract name is URL-encoded with a NUL right behind the
            // leading slash; the name itself starts at the NUL.
            if bytes.len() >= 2 && bytes[1] == 0 {
                Ok(SocketAddrKind::Local(bytes[1..].to_vec()))
            } else {
                Ok(SocketAddrKind::Local(bytes.to_vec()))
            }
        }

        _ => Ok(SocketAddrKind::Unspec),
    }
}

/// Parse an inet authority: `a.b.c.d[:port]`, `[v6]:port` or a bare IPv6.
fn parse_inet_authority(authority: &str) -> Result<SocketAddr> {
    if let Ok(addr) = authority.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = authority.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, 0));
    }
    // Bracketed IPv6 without a port.
    if let Some(inner) = authority
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        if let Ok(ip) = inner.parse::<std::net::Ipv6Addr>() {
            return Ok(SocketAddr::new(ip.into(), 0));
        }
    }
    Err(Error::Format)
}

/// Narrow a connector type against the address family, or reject the
/// combination.
fn best_match(conn_type: ConnectorType, addr: &SocketAddrKind) -> Option<ConnectorType> {
    use ConnectorType::*;
    match conn_type {
        Tcp => match addr {
            SocketAddrKind::Inet(SocketAddr::V4(_)) => Some(Tcp4),
            SocketAddrKind::Inet(SocketAddr::V6(_)) => Some(Tcp6),
            _ => None,
        },
        Tcp4 => matches!(addr, SocketAddrKind::Inet(SocketAddr::V4(_))).then_some(Tcp4),
        Tcp6 => matches!(addr, SocketAddrKind::Inet(SocketAddr::V6(_))).then_some(Tcp6),
        Udp => match addr {
            SocketAddrKind::Inet(SocketAddr::V4(_)) => Some(Udp4),
            SocketAddrKind::Inet(SocketAddr::V6(_)) => Some(Udp6),
            _ => None,
        },
        Udp4 => matches!(addr, SocketAddrKind::Inet(SocketAddr::V4(_))).then_some(Udp4),
        Udp6 => matches!(addr, SocketAddrKind::Inet(SocketAddr::V6(_))).then_some(Udp6),
        Pipe | Fifo | Tun | Tap => {
            matches!(addr, SocketAddrKind::Local(_)).then_some(conn_type)
        }
        Local => {
            matches!(addr, SocketAddrKind::Local(_) | SocketAddrKind::Unspec).then_some(Local)
        }
        Anon | Unspec => addr.is_unspec().then_some(conn_type),
        // Extended types carry whatever address they were given.
        FileDesc | User(_) => Some(conn_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrows_tcp_to_family() {
        let v6 = SocketAddrKind::Inet("[::1]:80".parse().unwrap());
        assert_eq!(best_match(ConnectorType::Tcp, &v6), Some(ConnectorType::Tcp6));

        let v4 = SocketAddrKind::Inet("127.0.0.1:80".parse().unwrap());
        assert_eq!(best_match(ConnectorType::Udp, &v4), Some(ConnectorType::Udp4));
    }

    #[test]
    fn rejects_family_mismatch() {
        let v4 = SocketAddrKind::Inet("127.0.0.1:80".parse().unwrap());
        assert_eq!(best_match(ConnectorType::Tcp6, &v4), None);

        let v6 = SocketAddrKind::Inet("[::1]:80".parse().unwrap());
        assert_eq!(best_match(ConnectorType::Udp4, &v6), None);
    }

    #[test]
    fn authority_forms() {
        assert_eq!(
            parse_inet_authority("192.0.2.1:81").unwrap(),
            "192.0.2.1:81".parse().unwrap()
        );
        assert_eq!(
            parse_inet_authority("192.0.2.1").unwrap().port(),
            0
        );
        assert!(parse_inet_authority("[2001:db8::1]:80").unwrap().is_ipv6());
        assert!(parse_inet_authority("2001:db8::1").unwrap().is_ipv6());
        assert!(parse_inet_authority("[2001:db8::1]").unwrap().is_ipv6());
        assert!(parse_inet_authority("not-an-ip").is_err());
    }

    #[test]
    fn abstract_names_start_at_the_nul() {
        let url = Url::parse("local:///%00hidden").unwrap();
        let addr = address_from_url(ConnectorType::Local, &url).unwrap();
        assert_eq!(addr.local_name().unwrap(), b"\0hidden");
    }

    #[test]
    fn filesystem_names_keep_the_slash() {
        let url = Url::parse("local:///tmp/sock").unwrap();
        let addr = address_from_url(ConnectorType::Local, &url).unwrap();
        assert_eq!(addr.local_name().unwrap(), b"/tmp/sock");
    }
}
