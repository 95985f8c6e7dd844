//! Crossbar is an event-driven I/O multiplexing library. It provides a
//! uniform, URL-driven connector abstraction over heterogeneous endpoint
//! kinds (TCP, UDP, local domain sockets, pipes, FIFOs, adopted
//! descriptors, TUN/TAP devices), a platform-abstract readiness layer over
//! epoll, kqueue, poll, select and IOCP, and a scheduler that dispatches
//! I/O readiness, timed callbacks and user-defined events to a pool of
//! worker threads.
//!
//! # Getting started
//!
//! Everything hangs off an [`Api`] instance:
//!
//! ```no_run
//! use std::sync::Arc;
//! use crossbar::{Api, Callback, Connector, Events, Scheduler};
//!
//! # fn main() -> crossbar::Result<()> {
//! let api = Api::new()?;
//!
//! let server = Connector::new(&api, "udp4://127.0.0.1:4321")?;
//! server.listen()?;
//!
//! let scheduler = Scheduler::new(&api, -1)?;
//! let reader = server.clone();
//! let callback = Callback::new(move |_ctx| {
//!     let mut buf = [0u8; 1500];
//!     let (n, peer) = reader.receive(&mut buf)?;
//!     println!("{} bytes from {:?}", n, peer);
//!     Ok(())
//! });
//! scheduler.register_connector(Events::IO_READ, &server, &callback)?;
//! # Ok(())
//! # }
//! ```
//!
//! Connectors are value types: clones share the underlying endpoint, and
//! the last clone dropped closes it. All operations return [`Result`] with
//! the crate's closed [`Error`] taxonomy; `Error::Async` marks operations
//! in progress on non-blocking connectors, not failures.

#![warn(missing_debug_implementations)]

// Macros used by the sys modules; must come first.
#[macro_use]
mod macros;

mod api;
pub mod callback;
pub mod connector;
pub mod error;
pub mod event;
mod handle;
pub mod mux;
mod options;
mod peer_address;
pub mod registry;
mod resolver;
pub mod scheduler;
mod sys;
pub mod url;

pub use api::Api;
pub use callback::{Callback, CallbackContext};
pub use connector::{AcceptResult, Connector, ConnectorImpl, ConnectorType};
pub use error::{Error, Result};
pub use event::Events;
pub use handle::Handle;
pub use mux::{IoEvent, Multiplexor, MuxType};
pub use options::{sanitize as sanitize_options, Options};
pub use peer_address::{PeerAddress, SocketAddrKind};
pub use registry::{ConnectorInfo, Registry};
pub use resolver::resolve_url;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use url::Url;
