//! The uniform connector abstraction.
//!
//! A [`Connector`] is a value-typed handle to an endpoint of some kind:
//! sockets, pipes, FIFOs, adopted descriptors. Construction is URL driven;
//! the scheme picks the kind via the registry, the query string tweaks
//! options. Clones share state, so a connector can be registered with a
//! scheduler and used from several threads at once.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};

use log::trace;

use crate::api::Api;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::{self, Options};
use crate::peer_address::{PeerAddress, SocketAddrKind};
use crate::registry::ConnectorInfo;
use crate::url::Url;

pub(crate) mod anon;
#[cfg(unix)]
pub(crate) mod fifo;
#[cfg(unix)]
pub(crate) mod filedesc;
pub(crate) mod local;
#[cfg(windows)]
pub(crate) mod pipe;
pub(crate) mod tcp;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) mod tuntap;
pub(crate) mod udp;

/// Tags the kind of endpoint a connector talks to.
///
/// The family-agnostic `Tcp` and `Udp` narrow to their `4`/`6` variants
/// once an address family is known. `User` values are free for downstream
/// scheme registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum ConnectorType {
    Unspec,
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
    Anon,
    Local,
    Fifo,
    Pipe,
    FileDesc,
    Tun,
    Tap,
    User(u8),
}

impl Default for ConnectorType {
    fn default() -> ConnectorType {
        ConnectorType::Unspec
    }
}

/// What an implementation hands back from `accept`.
pub enum AcceptResult {
    /// The connector has no server/client distinction; the accepted
    /// connector shares the server's state.
    Shared,
    /// A fresh implementation for the accepted peer, with the peer's
    /// address if one is known.
    New(Box<dyn ConnectorImpl>, SocketAddrKind),
}

/// The polymorphic contract each connector kind implements.
///
/// Implementations are driven through the [`Connector`] value type, which
/// serializes access; methods take `&mut self` and need not lock anything
/// themselves.
pub trait ConnectorImpl: Send + fmt::Debug {
    /// Server-side bind; for stream kinds, begin accepting. Datagram and
    /// FIFO kinds also create the underlying resource here.
    fn listen(&mut self) -> Result<()>;
    fn listening(&self) -> bool;

    /// Client-side connect. Non-blocking connectors may return
    /// [`Error::Async`] with the connection still in progress.
    fn connect(&mut self) -> Result<()>;
    fn connected(&self) -> bool;

    fn accept(&mut self) -> Result<AcceptResult>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn receive(&mut self, _buf: &mut [u8]) -> Result<(usize, SocketAddrKind)> {
        Err(Error::UnsupportedAction)
    }

    fn send(&mut self, _buf: &[u8], _to: &SocketAddrKind) -> Result<usize> {
        Err(Error::UnsupportedAction)
    }

    /// Bytes available for reading without consuming them. Zero means "no
    /// data", not an error.
    fn peek(&self) -> Result<usize>;

    fn close(&mut self) -> Result<()>;

    fn get_read_handle(&self) -> Handle;
    fn get_write_handle(&self) -> Handle;

    fn get_options(&self) -> Options;

    fn is_blocking(&self) -> bool {
        self.get_options().contains(Options::BLOCKING)
    }
}

struct State {
    api: Weak<Api>,
    conn_type: ConnectorType,
    options: Options,
    url: Url,
    address: PeerAddress,
    imp: Mutex<Box<dyn ConnectorImpl>>,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("conn_type", &self.conn_type)
            .field("url", &self.url.to_string())
            .finish_non_exhaustive()
    }
}

/// A value-typed, shareable endpoint handle.
///
/// The default value is the uninitialized sentinel: it equals other default
/// connectors, orders before initialized ones, and every operation on it
/// fails with [`Error::Initialization`].
#[derive(Debug, Clone, Default)]
pub struct Connector {
    state: Option<Arc<State>>,
}

impl Connector {
    /// Construct from a URL string, consulting the API's registry.
    pub fn new(api: &Arc<Api>, connect_url: &str) -> Result<Connector> {
        let url = Url::parse(connect_url)?;
        Connector::from_url(api, url)
    }

    pub fn from_url(api: &Arc<Api>, url: Url) -> Result<Connector> {
        let info = api.registry().info_for_scheme(&url.scheme)?;

        // Option validation happens in one place: every factory runs the
        // requested bits through `options::sanitize`.
        let requested = api.registry().options_from_query(&url.query);

        let address = PeerAddress::new(api, &url)?;
        let imp = (info.factory)(api, &url, info.conn_type, requested, &info)?;
        trace!("created connector for {}: {:?}", url, imp);

        Ok(Connector::assemble(api, url, address, imp))
    }

    fn assemble(api: &Arc<Api>, url: Url, address: PeerAddress, imp: Box<dyn ConnectorImpl>) -> Connector {
        let conn_type = address.conn_type();
        let options = imp.get_options();
        Connector {
            state: Some(Arc::new(State {
                api: Arc::downgrade(api),
                conn_type,
                options,
                url,
                address,
                imp: Mutex::new(imp),
            })),
        }
    }

    fn state(&self) -> Result<&Arc<State>> {
        self.state.as_ref().ok_or(Error::Initialization)
    }

    fn with_impl<T>(&self, f: impl FnOnce(&mut Box<dyn ConnectorImpl>) -> Result<T>) -> Result<T> {
        let state = self.state()?;
        let mut imp = state.imp.lock().expect("connector lock poisoned");
        f(&mut imp)
    }

    /// The (narrowed) connector type.
    pub fn conn_type(&self) -> ConnectorType {
        self.state
            .as_ref()
            .map(|s| s.conn_type)
            .unwrap_or(ConnectorType::Unspec)
    }

    pub fn connect_url(&self) -> Result<&Url> {
        self.state().map(|s| &s.url)
    }

    pub fn peer_addr(&self) -> Result<&PeerAddress> {
        self.state().map(|s| &s.address)
    }

    pub fn get_options(&self) -> Options {
        self.state
            .as_ref()
            .map(|s| s.options)
            .unwrap_or(Options::DEFAULT)
    }

    pub fn is_blocking(&self) -> bool {
        self.get_options().contains(Options::BLOCKING)
    }

    pub fn listen(&self) -> Result<()> {
        self.with_impl(|imp| imp.listen())
    }

    pub fn listening(&self) -> bool {
        self.with_impl(|imp| Ok(imp.listening())).unwrap_or(false)
    }

    pub fn connect(&self) -> Result<()> {
        self.with_impl(|imp| imp.connect())
    }

    pub fn connected(&self) -> bool {
        self.with_impl(|imp| Ok(imp.connected())).unwrap_or(false)
    }

    /// Whether the connector can exchange payload: connected for stream
    /// kinds, listening for datagram kinds.
    pub fn communicating(&self) -> bool {
        let options = self.get_options();
        if options.intersects(Options::STREAM) {
            self.connected()
        } else if options.intersects(Options::DATAGRAM) {
            self.listening()
        } else {
            false
        }
    }

    /// Accept a pending connection on a listening connector.
    ///
    /// Kinds without a server/client distinction return a connector sharing
    /// this one's state.
    pub fn accept(&self) -> Result<Connector> {
        let state = self.state()?;
        if !self.listening() {
            return Err(Error::UnsupportedAction);
        }

        let result = {
            let mut imp = state.imp.lock().expect("connector lock poisoned");
            imp.accept()?
        };

        match result {
            AcceptResult::Shared => Ok(self.clone()),
            AcceptResult::New(imp, SocketAddrKind::Unspec) => {
                let api = state.api.upgrade().ok_or(Error::Initialization)?;
                Ok(Connector::assemble(
                    &api,
                    state.url.clone(),
                    state.address.clone(),
                    imp,
                ))
            }
            AcceptResult::New(imp, peer) => {
                let api = state.api.upgrade().ok_or(Error::Initialization)?;
                let address = PeerAddress::from_parts(&api, peer, state.conn_type)?;
                let url = Url::parse(&address.to_string())?;
                Ok(Connector::assemble(&api, url, address, imp))
            }
        }
    }

    /// Connection-oriented read. Returns [`Error::Async`] on a non-blocking
    /// connector with no data.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.with_impl(|imp| imp.read(buf))
    }

    /// Connection-oriented write. Partial writes return the short count
    /// with success.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.with_impl(|imp| imp.write(buf))
    }

    /// Datagram receive, returning the sender's address.
    pub fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketAddrKind)> {
        self.with_impl(|imp| imp.receive(buf))
    }

    /// Datagram send to an explicit destination.
    pub fn send(&self, buf: &[u8], to: &SocketAddrKind) -> Result<usize> {
        self.with_impl(|imp| imp.send(buf, to))
    }

    pub fn peek(&self) -> Result<usize> {
        self.with_impl(|imp| imp.peek())
    }

    pub fn close(&self) -> Result<()> {
        self.with_impl(|imp| imp.close())
    }

    pub fn get_read_handle(&self) -> Handle {
        self.with_impl(|imp| Ok(imp.get_read_handle()))
            .unwrap_or_default()
    }

    pub fn get_write_handle(&self) -> Handle {
        self.with_impl(|imp| Ok(imp.get_write_handle()))
            .unwrap_or_default()
    }
}

impl PartialEq for Connector {
    fn eq(&self, other: &Connector) -> bool {
        match (&self.state, &other.state) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                a.conn_type == b.conn_type
                    && a.url == b.url
                    && self.get_read_handle() == other.get_read_handle()
                    && self.get_write_handle() == other.get_write_handle()
            }
            _ => false,
        }
    }
}

impl Eq for Connector {}

impl Hash for Connector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.state {
            None => 0u8.hash(state),
            Some(s) => {
                1u8.hash(state);
                s.conn_type.hash(state);
                s.url.hash(state);
                self.get_read_handle().hash(state);
                self.get_write_handle().hash(state);
            }
        }
    }
}

impl PartialOrd for Connector {
    fn partial_cmp(&self, other: &Connector) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Connector {
    fn cmp(&self, other: &Connector) -> std::cmp::Ordering {
        match (&self.state, &other.state) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(a), Some(b)) => (a.conn_type, &a.url, self.get_read_handle())
                .cmp(&(b.conn_type, &b.url, other.get_read_handle())),
        }
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            None => write!(f, "connector(uninitialized)"),
            Some(s) => write!(f, "connector({:?}, {})", s.conn_type, s.url),
        }
    }
}

/// Factory for the TCP and UDP schemes; dispatches on the narrowed type.
pub(crate) fn inet_factory(
    api: &Arc<Api>,
    url: &Url,
    _conn_type: ConnectorType,
    requested: Options,
    info: &ConnectorInfo,
) -> Result<Box<dyn ConnectorImpl>> {
    if url.authority.is_empty() {
        return Err(Error::Format);
    }

    let address = PeerAddress::new(api, url)?;
    let opts = options::sanitize(requested, info.default_options, info.possible_options)?;

    match address.conn_type() {
        ConnectorType::Tcp4 | ConnectorType::Tcp6 => {
            Ok(Box::new(tcp::ConnectorTcp::new(address.socket_addr().clone(), opts)))
        }
        ConnectorType::Udp4 | ConnectorType::Udp6 => {
            Ok(Box::new(udp::ConnectorUdp::new(address.socket_addr().clone(), opts)))
        }
        _ => Err(Error::Unexpected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_connectors_compare_equal() {
        let a = Connector::default();
        let b = Connector::default();
        assert_eq!(a, b);
        assert_eq!(a.conn_type(), ConnectorType::Unspec);
    }

    #[test]
    fn default_connector_operations_fail() {
        let conn = Connector::default();
        assert_eq!(conn.listen(), Err(Error::Initialization));
        assert_eq!(conn.connect(), Err(Error::Initialization));
        assert_eq!(conn.read(&mut [0u8; 4]), Err(Error::Initialization));
        assert_eq!(conn.write(b"x"), Err(Error::Initialization));
        assert_eq!(conn.close(), Err(Error::Initialization));
        assert!(!conn.listening());
        assert!(!conn.connected());
        assert!(!conn.communicating());
        assert!(!conn.get_read_handle().valid());
    }

    #[test]
    fn default_orders_before_initialized() {
        let api = Api::new().unwrap();
        let conn = Connector::new(&api, "anon://").unwrap();
        let default = Connector::default();
        assert!(default < conn);
        assert_ne!(default, conn);
    }

    #[test]
    fn separately_constructed_connectors_are_not_equal() {
        let api = Api::new().unwrap();
        let a = Connector::new(&api, "anon://").unwrap();
        let b = Connector::new(&api, "anon://").unwrap();
        // Same URL, but different handles once listening.
        a.listen().unwrap();
        b.listen().unwrap();
        assert_ne!(a, b);

        // A clone shares handles and therefore compares equal.
        let c = a.clone();
        assert_eq!(a, c);
    }

    #[test]
    fn narrowing_is_visible_on_the_connector() {
        let api = Api::new().unwrap();
        let conn = Connector::new(&api, "tcp://127.0.0.1:0").unwrap();
        assert_eq!(conn.conn_type(), ConnectorType::Tcp4);

        let conn = Connector::new(&api, "tcp://[::1]:0").unwrap();
        assert_eq!(conn.conn_type(), ConnectorType::Tcp6);
    }

    #[test]
    fn impossible_options_are_rejected() {
        let api = Api::new().unwrap();
        // Datagram behaviour is not possible for tcp schemes; the factory's
        // sanitize step rejects it.
        let err = Connector::new(&api, "tcp://127.0.0.1:1?behaviour=dgram").unwrap_err();
        assert_eq!(err, Error::InvalidOption);
    }
}
