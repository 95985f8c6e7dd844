//! Connector options.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};

use crate::error::{Error, Result};

/// Behaviour and blocking options for a connector.
///
/// The empty value acts as a sentinel meaning "inherit the connector kind's
/// defaults". Stream/datagram and blocking/non-blocking are mutually
/// exclusive pairs; [`sanitize`] resolves the sentinel and enforces the
/// registered limits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Options(u8);

impl Options {
    /// Inherit defaults.
    pub const DEFAULT: Options = Options(0);
    /// Connection-oriented byte stream behaviour.
    pub const STREAM: Options = Options(1 << 0);
    /// Datagram behaviour.
    pub const DATAGRAM: Options = Options(1 << 1);
    /// Operations block the calling thread.
    pub const BLOCKING: Options = Options(1 << 2);
    /// Operations return [`Error::Async`] instead of blocking.
    pub const NON_BLOCKING: Options = Options(1 << 3);

    pub fn is_default(&self) -> bool {
        self.0 == 0
    }

    pub fn intersects(&self, other: Options) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(&self, other: Options) -> bool {
        self.0 & other.0 == other.0
    }

    /// Both bits of a mutually exclusive pair are requested at once.
    pub fn is_contradictory(&self) -> bool {
        self.contains(Options::STREAM | Options::DATAGRAM)
            || self.contains(Options::BLOCKING | Options::NON_BLOCKING)
    }
}

impl BitOr for Options {
    type Output = Options;
    fn bitor(self, rhs: Options) -> Options {
        Options(self.0 | rhs.0)
    }
}

impl BitOrAssign for Options {
    fn bitor_assign(&mut self, rhs: Options) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Options {
    type Output = Options;
    fn bitand(self, rhs: Options) -> Options {
        Options(self.0 & rhs.0)
    }
}

impl Sub for Options {
    type Output = Options;
    fn sub(self, rhs: Options) -> Options {
        Options(self.0 & !rhs.0)
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            return write!(f, "default");
        }
        let mut parts = Vec::new();
        if self.intersects(Options::STREAM) {
            parts.push("stream");
        }
        if self.intersects(Options::DATAGRAM) {
            parts.push("datagram");
        }
        if self.intersects(Options::BLOCKING) {
            parts.push("blocking");
        }
        if self.intersects(Options::NON_BLOCKING) {
            parts.push("non_blocking");
        }
        write!(f, "{}", parts.join("|"))
    }
}

/// Resolve default bits and validate explicit ones.
///
/// `defaults` and `possible` come from the scheme registration. The result
/// always carries exactly one behaviour bit and one blocking bit. Explicit
/// input bits outside `possible` fail with [`Error::InvalidOption`].
pub fn sanitize(input: Options, defaults: Options, possible: Options) -> Result<Options> {
    if input.is_contradictory() {
        return Err(Error::InvalidOption);
    }
    if !possible.contains(input) {
        return Err(Error::InvalidOption);
    }

    let mut result = defaults;

    if input.intersects(Options::BLOCKING) {
        result = (result - Options::NON_BLOCKING) | Options::BLOCKING;
    } else if input.intersects(Options::NON_BLOCKING) {
        result = (result - Options::BLOCKING) | Options::NON_BLOCKING;
    }

    if input.intersects(Options::STREAM) {
        result = (result - Options::DATAGRAM) | Options::STREAM;
    } else if input.intersects(Options::DATAGRAM) {
        result = (result - Options::STREAM) | Options::DATAGRAM;
    }

    if !result.intersects(Options::STREAM | Options::DATAGRAM)
        || !result.intersects(Options::BLOCKING | Options::NON_BLOCKING)
    {
        // The registration did not supply usable defaults.
        return Err(Error::InvalidValue);
    }
    if result.is_contradictory() {
        return Err(Error::InvalidValue);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: Options = Options(Options::STREAM.0 | Options::NON_BLOCKING.0);
    const POSSIBLE: Options =
        Options(Options::STREAM.0 | Options::BLOCKING.0 | Options::NON_BLOCKING.0);

    #[test]
    fn default_input_yields_defaults() {
        let opts = sanitize(Options::DEFAULT, DEFAULTS, POSSIBLE).unwrap();
        assert_eq!(opts, DEFAULTS);
    }

    #[test]
    fn explicit_blocking_overrides() {
        let opts = sanitize(Options::BLOCKING, DEFAULTS, POSSIBLE).unwrap();
        assert!(opts.contains(Options::STREAM | Options::BLOCKING));
        assert!(!opts.intersects(Options::NON_BLOCKING));
    }

    #[test]
    fn result_is_subset_of_possible() {
        let opts = sanitize(Options::NON_BLOCKING, DEFAULTS, POSSIBLE).unwrap();
        assert!(POSSIBLE.contains(opts));
    }

    #[test]
    fn impossible_bits_are_rejected() {
        assert_eq!(
            sanitize(Options::DATAGRAM, DEFAULTS, POSSIBLE),
            Err(Error::InvalidOption)
        );
    }

    #[test]
    fn contradiction_is_rejected() {
        assert_eq!(
            sanitize(
                Options::BLOCKING | Options::NON_BLOCKING,
                DEFAULTS,
                POSSIBLE
            ),
            Err(Error::InvalidOption)
        );
    }
}
