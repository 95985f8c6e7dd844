//! Scheme and URL parameter registry.
//!
//! The registry maps URL schemes to connector metadata and factories, and
//! query string parameters to option mapping functions. One registry exists
//! per [`Api`] instance; nothing here is process-global.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use crate::api::Api;
use crate::connector::{ConnectorImpl, ConnectorType};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::url::Url;

/// Creates the kind-specific implementation for a scheme.
pub type Factory = Arc<
    dyn Fn(&Arc<Api>, &Url, ConnectorType, Options, &ConnectorInfo) -> Result<Box<dyn ConnectorImpl>>
        + Send
        + Sync,
>;

/// Maps a query parameter value to option bits. The second argument tells
/// the mapper whether the parameter was present at all.
pub type OptionMapper = Arc<dyn Fn(&str, bool) -> Options + Send + Sync>;

/// Everything the registry knows about one scheme.
#[derive(Clone)]
pub struct ConnectorInfo {
    pub conn_type: ConnectorType,
    pub default_options: Options,
    pub possible_options: Options,
    pub scheme: String,
    pub factory: Factory,
}

impl fmt::Debug for ConnectorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorInfo")
            .field("conn_type", &self.conn_type)
            .field("default_options", &self.default_options)
            .field("possible_options", &self.possible_options)
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Inner {
    schemes: BTreeMap<String, ConnectorInfo>,
    params: BTreeMap<String, OptionMapper>,
}

/// Scheme and parameter lookup tables, owned by an [`Api`].
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().expect("registry lock poisoned");
        f.debug_struct("Registry")
            .field("schemes", &inner.schemes.keys().collect::<Vec<_>>())
            .field("parameters", &inner.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry::default()
    }

    /// Register a scheme. Duplicate schemes and an unspecified connector
    /// type are rejected with [`Error::InvalidValue`].
    pub fn add_scheme(&self, scheme: &str, mut info: ConnectorInfo) -> Result<()> {
        if scheme.is_empty() {
            return Err(Error::InvalidValue);
        }
        if info.conn_type == ConnectorType::Unspec {
            return Err(Error::InvalidValue);
        }

        let normalized = scheme.to_ascii_lowercase();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.schemes.contains_key(&normalized) {
            warn!("scheme {} already registered", normalized);
            return Err(Error::InvalidValue);
        }

        debug!("registering scheme {} as {:?}", normalized, info.conn_type);
        info.scheme = normalized.clone();
        inner.schemes.insert(normalized, info);
        Ok(())
    }

    pub fn info_for_scheme(&self, scheme: &str) -> Result<ConnectorInfo> {
        let normalized = scheme.to_ascii_lowercase();
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .schemes
            .get(&normalized)
            .cloned()
            .ok_or(Error::InvalidValue)
    }

    pub fn info_for_type(&self, conn_type: ConnectorType) -> Result<ConnectorInfo> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .schemes
            .values()
            .find(|info| info.conn_type == conn_type)
            .cloned()
            .ok_or(Error::InvalidValue)
    }

    /// The canonical scheme for a connector type. Multiple schemes may map
    /// to one type; the lexicographically first one wins, which makes the
    /// family-specific schemes (`tcp4`, `tcp6`) canonical for their types.
    pub fn scheme_for_type(&self, conn_type: ConnectorType) -> Option<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .schemes
            .values()
            .find(|info| info.conn_type == conn_type)
            .map(|info| info.scheme.clone())
    }

    /// Register a query parameter mapper. Duplicates are rejected.
    pub fn add_parameter(&self, parameter: &str, mapper: OptionMapper) -> Result<()> {
        if parameter.is_empty() {
            return Err(Error::InvalidValue);
        }

        let normalized = parameter.to_ascii_lowercase();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.params.contains_key(&normalized) {
            warn!("URL parameter {} already registered", normalized);
            return Err(Error::InvalidValue);
        }
        inner.params.insert(normalized, mapper);
        Ok(())
    }

    /// Run every registered mapper over the query map and merge the
    /// results. Unknown query keys are ignored.
    pub fn options_from_query(&self, query: &BTreeMap<String, String>) -> Options {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut result = Options::DEFAULT;
        for (name, mapper) in &inner.params {
            let value = query.get(name);
            let mapped = mapper(value.map(String::as_str).unwrap_or(""), value.is_some());
            result |= mapped;
        }
        result
    }
}

/// Install the built-in schemes and query parameters.
pub(crate) fn install_defaults(registry: &Registry) -> Result<()> {
    install_default_params(registry)?;
    install_default_schemes(registry)
}

fn install_default_params(registry: &Registry) -> Result<()> {
    registry.add_parameter(
        "behaviour",
        Arc::new(|value, found| {
            if !found {
                return Options::DEFAULT;
            }
            match value {
                "datagram" | "dgram" => Options::DATAGRAM,
                "stream" => Options::STREAM,
                _ => Options::DEFAULT,
            }
        }),
    )?;

    registry.add_parameter(
        "blocking",
        Arc::new(|value, found| {
            if !found {
                return Options::DEFAULT;
            }
            match value {
                "1" | "true" | "yes" => Options::BLOCKING,
                "0" | "false" | "no" => Options::NON_BLOCKING,
                other => {
                    warn!("unrecognized blocking value {:?}, assuming non-blocking", other);
                    Options::NON_BLOCKING
                }
            }
        }),
    )
}

fn install_default_schemes(registry: &Registry) -> Result<()> {
    let stream_defaults = Options::STREAM | Options::NON_BLOCKING;
    let stream_possible = Options::STREAM | Options::BLOCKING | Options::NON_BLOCKING;
    let dgram_defaults = Options::DATAGRAM | Options::NON_BLOCKING;
    let dgram_possible = Options::DATAGRAM | Options::BLOCKING | Options::NON_BLOCKING;

    let inet: Factory = Arc::new(crate::connector::inet_factory);
    for (scheme, conn_type) in [
        ("tcp", ConnectorType::Tcp),
        ("tcp4", ConnectorType::Tcp4),
        ("tcp6", ConnectorType::Tcp6),
    ] {
        registry.add_scheme(
            scheme,
            ConnectorInfo {
                conn_type,
                default_options: stream_defaults,
                possible_options: stream_possible,
                scheme: String::new(),
                factory: inet.clone(),
            },
        )?;
    }
    for (scheme, conn_type) in [
        ("udp", ConnectorType::Udp),
        ("udp4", ConnectorType::Udp4),
        ("udp6", ConnectorType::Udp6),
    ] {
        registry.add_scheme(
            scheme,
            ConnectorInfo {
                conn_type,
                default_options: dgram_defaults,
                possible_options: dgram_possible,
                scheme: String::new(),
                factory: inet.clone(),
            },
        )?;
    }

    registry.add_scheme(
        "anon",
        ConnectorInfo {
            conn_type: ConnectorType::Anon,
            default_options: stream_defaults,
            possible_options: stream_possible,
            scheme: String::new(),
            factory: Arc::new(crate::connector::anon::factory),
        },
    )?;

    #[cfg(unix)]
    {
        registry.add_scheme(
            "local",
            ConnectorInfo {
                conn_type: ConnectorType::Local,
                default_options: stream_defaults,
                possible_options: Options::STREAM
                    | Options::DATAGRAM
                    | Options::BLOCKING
                    | Options::NON_BLOCKING,
                scheme: String::new(),
                factory: Arc::new(crate::connector::local::factory),
            },
        )?;

        registry.add_scheme(
            "fifo",
            ConnectorInfo {
                conn_type: ConnectorType::Fifo,
                default_options: stream_defaults,
                possible_options: stream_possible,
                scheme: String::new(),
                factory: Arc::new(crate::connector::fifo::factory),
            },
        )?;

        let filedesc: Factory = Arc::new(crate::connector::filedesc::factory);
        for scheme in ["fd", "filedesc"] {
            registry.add_scheme(
                scheme,
                ConnectorInfo {
                    conn_type: ConnectorType::FileDesc,
                    default_options: stream_defaults,
                    possible_options: Options::STREAM
                        | Options::DATAGRAM
                        | Options::BLOCKING
                        | Options::NON_BLOCKING,
                    scheme: String::new(),
                    factory: filedesc.clone(),
                },
            )?;
        }
    }

    #[cfg(windows)]
    {
        registry.add_scheme(
            "local",
            ConnectorInfo {
                conn_type: ConnectorType::Local,
                default_options: stream_defaults,
                possible_options: stream_possible,
                scheme: String::new(),
                factory: Arc::new(crate::connector::local::factory),
            },
        )?;

        registry.add_scheme(
            "pipe",
            ConnectorInfo {
                conn_type: ConnectorType::Pipe,
                default_options: stream_defaults,
                possible_options: stream_possible,
                scheme: String::new(),
                factory: Arc::new(crate::connector::pipe::factory),
            },
        )?;
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        for (scheme, conn_type) in [("tun", ConnectorType::Tun), ("tap", ConnectorType::Tap)] {
            registry.add_scheme(
                scheme,
                ConnectorInfo {
                    conn_type,
                    default_options: dgram_defaults,
                    possible_options: dgram_possible,
                    scheme: String::new(),
                    factory: Arc::new(crate::connector::tuntap::factory),
                },
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> Registry {
        let registry = Registry::new();
        install_defaults(&registry).unwrap();
        registry
    }

    #[test]
    fn default_schemes_present() {
        let registry = test_registry();
        assert_eq!(
            registry.info_for_scheme("tcp4").unwrap().conn_type,
            ConnectorType::Tcp4
        );
        assert_eq!(
            registry.info_for_scheme("UDP6").unwrap().conn_type,
            ConnectorType::Udp6
        );
        assert!(registry.info_for_scheme("gopher").is_err());
    }

    #[test]
    fn canonical_scheme_for_type() {
        let registry = test_registry();
        assert_eq!(
            registry.scheme_for_type(ConnectorType::Tcp4).unwrap(),
            "tcp4"
        );
        assert_eq!(
            registry.scheme_for_type(ConnectorType::Udp6).unwrap(),
            "udp6"
        );
    }

    #[test]
    fn duplicate_scheme_is_rejected() {
        let registry = test_registry();
        let info = registry.info_for_scheme("tcp").unwrap();
        assert_eq!(registry.add_scheme("tcp", info), Err(Error::InvalidValue));
    }

    #[test]
    fn duplicate_parameter_is_rejected() {
        let registry = test_registry();
        let result = registry.add_parameter("blocking", Arc::new(|_, _| Options::DEFAULT));
        assert_eq!(result, Err(Error::InvalidValue));
    }

    #[test]
    fn query_options_merge() {
        let registry = test_registry();
        let url = Url::parse("tcp://127.0.0.1:1234?behaviour=stream&blocking=0").unwrap();
        let opts = registry.options_from_query(&url.query);
        assert!(opts.contains(Options::STREAM | Options::NON_BLOCKING));

        let url = Url::parse("tcp://127.0.0.1:1234").unwrap();
        assert!(registry.options_from_query(&url.query).is_default());

        let url = Url::parse("udp://127.0.0.1:1234?behaviour=dgram").unwrap();
        assert!(registry
            .options_from_query(&url.query)
            .contains(Options::DATAGRAM));
    }
}
