//! Event masks.
//!
//! [`Events`] is a 64 bit bitset partitioned into built-in bits in the low
//! half and user-defined bits in the high half. Built-in bits describe I/O
//! readiness and scheduler conditions; every bit at or above
//! [`Events::USER_BASE`] is free for applications to use with
//! `Scheduler::fire_events`.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not, Sub, SubAssign};

/// A bitset of event flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Events(u64);

const USER_SHIFT: u32 = 32;

impl Events {
    /// The empty mask.
    pub const NONE: Events = Events(0);
    /// Data can be read from a connector.
    pub const IO_READ: Events = Events(1 << 0);
    /// Data can be written to a connector.
    pub const IO_WRITE: Events = Events(1 << 1);
    /// A connection finished establishing. Only produced on completion
    /// based platforms; readiness based backends fold this into IO_WRITE.
    pub const IO_OPEN: Events = Events(1 << 2);
    /// The peer closed its end of the connection.
    pub const IO_CLOSE: Events = Events(1 << 3);
    /// An error condition exists on the connector.
    pub const IO_ERROR: Events = Events(1 << 4);
    /// A scheduled callback became due.
    pub const TIMEOUT: Events = Events(1 << 5);
    /// Delivered when dispatch itself failed.
    pub const ERROR: Events = Events(1 << 6);

    /// All built-in bits.
    pub const ALL_BUILTIN: Events = Events(
        Events::IO_READ.0
            | Events::IO_WRITE.0
            | Events::IO_OPEN.0
            | Events::IO_CLOSE.0
            | Events::IO_ERROR.0
            | Events::TIMEOUT.0
            | Events::ERROR.0,
    );

    /// The lowest user-defined bit.
    pub const USER_BASE: Events = Events(1 << USER_SHIFT);
    /// All user-defined bits.
    pub const ALL_USER: Events = Events(!((1u64 << USER_SHIFT) - 1));

    /// The `n`th user-defined event bit.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 32 or larger.
    pub fn user(n: u32) -> Events {
        assert!(n < 64 - USER_SHIFT, "user event bit out of range");
        Events(1 << (USER_SHIFT + n))
    }

    pub fn from_bits(bits: u64) -> Events {
        Events(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if any bit of `other` is set in `self`.
    pub fn intersects(&self, other: Events) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if all bits of `other` are set in `self`.
    pub fn contains(&self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if the mask has at least one user-defined bit.
    pub fn has_user_bits(&self) -> bool {
        self.intersects(Events::ALL_USER)
    }
}

impl BitOr for Events {
    type Output = Events;
    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Events {
    type Output = Events;
    fn bitand(self, rhs: Events) -> Events {
        Events(self.0 & rhs.0)
    }
}

impl BitAndAssign for Events {
    fn bitand_assign(&mut self, rhs: Events) {
        self.0 &= rhs.0;
    }
}

impl Sub for Events {
    type Output = Events;
    fn sub(self, rhs: Events) -> Events {
        Events(self.0 & !rhs.0)
    }
}

impl SubAssign for Events {
    fn sub_assign(&mut self, rhs: Events) {
        self.0 &= !rhs.0;
    }
}

impl Not for Events {
    type Output = Events;
    fn not(self) -> Events {
        Events(!self.0)
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }

        let mut first = true;
        let mut write_bit = |name: &str, f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if !first {
                write!(f, " | ")?;
            }
            first = false;
            write!(f, "{}", name)
        };

        if self.intersects(Events::IO_READ) {
            write_bit("IO_READ", f)?;
        }
        if self.intersects(Events::IO_WRITE) {
            write_bit("IO_WRITE", f)?;
        }
        if self.intersects(Events::IO_OPEN) {
            write_bit("IO_OPEN", f)?;
        }
        if self.intersects(Events::IO_CLOSE) {
            write_bit("IO_CLOSE", f)?;
        }
        if self.intersects(Events::IO_ERROR) {
            write_bit("IO_ERROR", f)?;
        }
        if self.intersects(Events::TIMEOUT) {
            write_bit("TIMEOUT", f)?;
        }
        if self.intersects(Events::ERROR) {
            write_bit("ERROR", f)?;
        }
        if self.has_user_bits() {
            let user = (self.0 & Events::ALL_USER.0) >> USER_SHIFT;
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "USER({:#x})", user)?;
        }
        Ok(())
    }
}

impl fmt::Display for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_operations() {
        let mask = Events::IO_READ | Events::IO_WRITE;
        assert!(mask.intersects(Events::IO_READ));
        assert!(mask.contains(Events::IO_READ | Events::IO_WRITE));
        assert!(!mask.contains(Events::IO_READ | Events::IO_CLOSE));

        let removed = mask - Events::IO_WRITE;
        assert_eq!(removed, Events::IO_READ);
        assert!((mask & Events::IO_CLOSE).is_empty());
    }

    #[test]
    fn user_bits() {
        assert_eq!(Events::user(0), Events::USER_BASE);
        assert!(Events::user(5).has_user_bits());
        assert!(!Events::ALL_BUILTIN.has_user_bits());
        assert!(Events::ALL_USER.contains(Events::user(31)));
    }

    #[test]
    #[should_panic]
    fn user_bit_out_of_range() {
        let _ = Events::user(32);
    }

    #[test]
    fn render() {
        let mask = Events::IO_READ | Events::TIMEOUT;
        let rendered = format!("{}", mask);
        assert!(rendered.contains("IO_READ"));
        assert!(rendered.contains("TIMEOUT"));
    }
}
