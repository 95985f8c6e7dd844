//! The closed error taxonomy used throughout the crate.
//!
//! Operations return [`Result`] with these kinds. A few variants are not
//! failures at all but normal control-flow returns: [`Error::Async`] and
//! [`Error::RepeatAction`] mean "try again later", and [`Error::Timeout`] is
//! the regular outcome of waiting without events. Everything else indicates a
//! condition the caller has to act upon.

use std::fmt;
use std::io;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds with stable symbolic names.
///
/// The names returned by [`Error::name`] appear in logs and are part of the
/// contract; they do not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Error {
    /// Nonspecific error, usually the result of an unexpected OS error.
    Unexpected,
    /// The operation is in progress; poll for readiness to complete it.
    Async,
    /// The operation should be retried, e.g. after a signal interrupt.
    RepeatAction,
    /// A wait elapsed without producing events.
    Timeout,
    /// The object is not (or already) initialized for this operation.
    Initialization,
    /// A parameter value is not usable.
    InvalidValue,
    /// An option or combination of options is not supported.
    InvalidOption,
    /// A string could not be parsed into the expected shape.
    Format,
    /// Permission was denied, or a bad buffer was passed to the OS.
    AccessViolation,
    AddressInUse,
    AddressNotAvailable,
    NetworkUnreachable,
    ConnectionRefused,
    ConnectionAborted,
    /// The endpoint is not connected.
    NoConnection,
    /// A file descriptor or handle limit was reached.
    NumFiles,
    /// A queue or buffer limit was reached.
    NumItems,
    OutOfMemory,
    /// A filesystem operation failed.
    FsError,
    /// The connector kind does not implement the requested operation.
    UnsupportedAction,
    /// A callback was required, but none was given.
    EmptyCallback,
    /// The operation was cancelled or the peer is shutting down.
    Aborted,
    NotImplemented,
}

impl Error {
    /// The stable symbolic name of this error kind.
    pub fn name(&self) -> &'static str {
        match self {
            Error::Unexpected => "unexpected",
            Error::Async => "async",
            Error::RepeatAction => "repeat_action",
            Error::Timeout => "timeout",
            Error::Initialization => "initialization",
            Error::InvalidValue => "invalid_value",
            Error::InvalidOption => "invalid_option",
            Error::Format => "format",
            Error::AccessViolation => "access_violation",
            Error::AddressInUse => "address_in_use",
            Error::AddressNotAvailable => "address_not_available",
            Error::NetworkUnreachable => "network_unreachable",
            Error::ConnectionRefused => "connection_refused",
            Error::ConnectionAborted => "connection_aborted",
            Error::NoConnection => "no_connection",
            Error::NumFiles => "num_files",
            Error::NumItems => "num_items",
            Error::OutOfMemory => "out_of_memory",
            Error::FsError => "fs_error",
            Error::UnsupportedAction => "unsupported_action",
            Error::EmptyCallback => "empty_callback",
            Error::Aborted => "aborted",
            Error::NotImplemented => "not_implemented",
        }
    }

    /// A stable human-readable description of this error kind.
    pub fn message(&self) -> &'static str {
        match self {
            Error::Unexpected => "nonspecific error in the implementation",
            Error::Async => "operation is in progress",
            Error::RepeatAction => "try the operation again",
            Error::Timeout => "timed out without events",
            Error::Initialization => "object not initialized for this operation",
            Error::InvalidValue => "invalid parameter value",
            Error::InvalidOption => "invalid or unsupported option",
            Error::Format => "string could not be parsed",
            Error::AccessViolation => "access denied",
            Error::AddressInUse => "address is already in use",
            Error::AddressNotAvailable => "address is not available",
            Error::NetworkUnreachable => "network is unreachable",
            Error::ConnectionRefused => "connection attempt refused",
            Error::ConnectionAborted => "connection aborted",
            Error::NoConnection => "endpoint is not connected",
            Error::NumFiles => "file or socket limit reached",
            Error::NumItems => "queue or buffer limit reached",
            Error::OutOfMemory => "out of memory",
            Error::FsError => "filesystem error",
            Error::UnsupportedAction => "operation not supported by this connector",
            Error::EmptyCallback => "no callback provided",
            Error::Aborted => "operation aborted",
            Error::NotImplemented => "not implemented on this platform",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.name(), self.message())
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        #[cfg(unix)]
        if let Some(errno) = err.raw_os_error() {
            return from_errno(errno);
        }

        match err.kind() {
            io::ErrorKind::WouldBlock => Error::Async,
            io::ErrorKind::Interrupted => Error::RepeatAction,
            io::ErrorKind::TimedOut => Error::Timeout,
            io::ErrorKind::PermissionDenied => Error::AccessViolation,
            io::ErrorKind::AddrInUse => Error::AddressInUse,
            io::ErrorKind::AddrNotAvailable => Error::AddressNotAvailable,
            io::ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => Error::ConnectionAborted,
            io::ErrorKind::NotConnected => Error::NoConnection,
            io::ErrorKind::InvalidInput => Error::InvalidValue,
            io::ErrorKind::OutOfMemory => Error::OutOfMemory,
            io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists => Error::FsError,
            io::ErrorKind::Unsupported => Error::UnsupportedAction,
            _ => Error::Unexpected,
        }
    }
}

/// Translate an errno value into the taxonomy.
#[cfg(unix)]
pub(crate) fn from_errno(errno: i32) -> Error {
    match errno {
        libc::EAGAIN | libc::EINPROGRESS | libc::EALREADY => Error::Async,
        libc::EINTR => Error::RepeatAction,
        libc::ETIMEDOUT => Error::Timeout,
        libc::EACCES | libc::EPERM | libc::EFAULT => Error::AccessViolation,
        libc::EADDRINUSE => Error::AddressInUse,
        libc::EADDRNOTAVAIL => Error::AddressNotAvailable,
        libc::ENETUNREACH | libc::EHOSTUNREACH => Error::NetworkUnreachable,
        libc::ECONNREFUSED => Error::ConnectionRefused,
        libc::ECONNRESET | libc::ECONNABORTED | libc::EPIPE => Error::ConnectionAborted,
        libc::ENOTCONN => Error::NoConnection,
        libc::EMFILE | libc::ENFILE => Error::NumFiles,
        libc::ENOBUFS => Error::NumItems,
        libc::ENOMEM => Error::OutOfMemory,
        libc::ENOENT | libc::ENOTDIR | libc::EROFS | libc::ENOSPC | libc::EDQUOT
        | libc::EEXIST | libc::EISDIR | libc::ELOOP => Error::FsError,
        libc::EOPNOTSUPP => Error::UnsupportedAction,
        libc::EBADF | libc::ENOTSOCK | libc::EINVAL | libc::ENAMETOOLONG => Error::InvalidValue,
        libc::EAFNOSUPPORT | libc::EPROTONOSUPPORT => Error::InvalidOption,
        libc::ECANCELED => Error::Aborted,
        _ => Error::Unexpected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        assert_eq!(Error::Async.name(), "async");
        assert_eq!(Error::RepeatAction.name(), "repeat_action");
        assert_eq!(Error::UnsupportedAction.name(), "unsupported_action");
        assert_eq!(Error::EmptyCallback.name(), "empty_callback");
    }

    #[test]
    fn display_includes_name() {
        let rendered = format!("{}", Error::Timeout);
        assert!(rendered.contains("[timeout]"));
    }

    #[cfg(unix)]
    #[test]
    fn errno_translation() {
        assert_eq!(from_errno(libc::EAGAIN), Error::Async);
        assert_eq!(from_errno(libc::ECONNREFUSED), Error::ConnectionRefused);
        assert_eq!(from_errno(libc::EMFILE), Error::NumFiles);
    }

    #[test]
    fn io_error_translation() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(Error::from(err), Error::Async);
    }
}
