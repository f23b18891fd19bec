//! Program points.

use crate::cfg::BlockId;
use jf_bytecode::Addr;
use std::cmp::Ordering;
use std::fmt;

/// An instruction as reached through a given basic block.
///
/// Inlined subroutines duplicate instructions into several blocks, so the same
/// instruction address can appear in distinct locations with distinct facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    block: BlockId,
    position: usize,
    addr: Addr,
}

impl Location {
    #[must_use]
    pub const fn new(block: BlockId, position: usize, addr: Addr) -> Self {
        Self {
            block,
            position,
            addr,
        }
    }

    #[inline]
    #[must_use]
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Index of the instruction in its block.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    #[inline]
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.block.index(), self.position).cmp(&(other.block.index(), other.position))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@B{}", self.addr, self.block.index())
    }
}
