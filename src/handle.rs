//! Opaque wrappers around OS I/O resources.

#[cfg(unix)]
use std::os::unix::io::RawFd;

#[cfg(windows)]
pub use crate::sys::windows::Handle;

/// A file descriptor wrapper.
///
/// A handle is either valid, referring to a live descriptor, or the default
/// constructed sentinel. Copies refer to the same descriptor; the lifetime
/// of the descriptor is managed by the owning connector, not by the handle.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    fd: RawFd,
}

#[cfg(unix)]
impl Handle {
    const INVALID_FD: RawFd = -1;

    pub fn new(fd: RawFd) -> Handle {
        Handle { fd }
    }

    pub fn invalid() -> Handle {
        Handle {
            fd: Handle::INVALID_FD,
        }
    }

    pub fn valid(&self) -> bool {
        self.fd != Handle::INVALID_FD
    }

    pub fn raw(&self) -> RawFd {
        self.fd
    }
}

#[cfg(unix)]
impl Default for Handle {
    fn default() -> Handle {
        Handle::invalid()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    #[test]
    fn default_is_invalid() {
        let handle = Handle::default();
        assert!(!handle.valid());
        assert_eq!(handle, Handle::invalid());
    }

    #[test]
    fn equality_is_descriptor_equality() {
        let a = Handle::new(5);
        let b = Handle::new(5);
        let c = Handle::new(6);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let hash = |h: &Handle| {
            let mut hasher = DefaultHasher::new();
            h.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(&a), hash(&b));
    }
}
