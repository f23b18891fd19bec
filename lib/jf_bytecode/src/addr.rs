//! Code address representation.

use std::fmt;

/// Offset of an instruction in the bytecode of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(pub usize);

impl Addr {
    #[inline]
    #[must_use]
    pub const fn entry() -> Self {
        Self(0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Addr {
    #[must_use]
    pub const fn from_offset(base_addr: Self, offset: i32) -> Self {
        if offset.is_negative() {
            Self(base_addr.0 - offset.unsigned_abs() as usize)
        } else {
            Self(base_addr.0 + offset.unsigned_abs() as usize)
        }
    }

    #[must_use]
    pub const fn offset(self, offset: i32) -> Self {
        Self::from_offset(self, offset)
    }
}
