//! Library entry point.

use std::sync::Arc;

use log::debug;

use crate::error::Result;
use crate::registry::{self, Registry};

/// Owns the per-instance state of the library: the scheme registry and any
/// process-level OS resources.
///
/// Every connector and scheduler hangs off an `Api` instance. Creating more
/// than one is allowed; they do not share registrations.
pub struct Api {
    registry: Registry,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api").finish_non_exhaustive()
    }
}

impl Api {
    /// Create an instance with the built-in schemes and URL parameters
    /// registered.
    pub fn new() -> Result<Arc<Api>> {
        #[cfg(windows)]
        crate::sys::windows::wsa_startup()?;

        let api = Arc::new(Api {
            registry: Registry::new(),
        });
        registry::install_defaults(&api.registry)?;
        debug!("api instance initialized");
        Ok(api)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(windows)]
impl Drop for Api {
    fn drop(&mut self) {
        crate::sys::windows::wsa_cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_do_not_share_registrations() {
        let a = Api::new().unwrap();
        let b = Api::new().unwrap();

        let info = a.registry().info_for_scheme("tcp").unwrap();
        a.registry()
            .add_scheme("tcp-alias", info.clone())
            .unwrap();

        assert!(a.registry().info_for_scheme("tcp-alias").is_ok());
        assert!(b.registry().info_for_scheme("tcp-alias").is_err());
    }
}
