//! Control flow edges.

use bitflags::bitflags;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeKind {
    /// Normal completion of the block, continuing with the next instruction.
    FallThrough,
    /// Taken conditional branch.
    IfTrue,
    /// Switch case target.
    Switch,
    /// Switch default target.
    SwitchDefault,
    /// Jump into an inlined subroutine.
    Jsr,
    /// Return from an inlined subroutine to the instruction following its `jsr`.
    Ret,
    Goto,
    /// Method return, to the exit block.
    Return,
    /// Exception escaping the method, to the exit block.
    UnhandledException,
    /// Exception caught by a handler of the method.
    HandledException,
    /// Synthetic edge from the entry block to the first instruction.
    Start,
    /// Synthetic loop marker: source side of a back edge.
    BackEdgeSource,
    /// Synthetic loop marker: target side of a back edge.
    BackEdgeTarget,
    /// Call to a method that never returns, to the exit block.
    ProcessExit,
}

impl EdgeKind {
    #[must_use]
    pub const fn is_exception(self) -> bool {
        matches!(self, Self::UnhandledException | Self::HandledException)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FallThrough => write!(f, "<seq>"),
            Self::IfTrue => write!(f, "<true>"),
            Self::Switch => write!(f, "<switch>"),
            Self::SwitchDefault => write!(f, "<switch _>"),
            Self::Jsr => write!(f, "<jsr>"),
            Self::Ret => write!(f, "<ret>"),
            Self::Goto => write!(f, "<jmp>"),
            Self::Return => write!(f, "<return>"),
            Self::UnhandledException => write!(f, "<unhandled>"),
            Self::HandledException => write!(f, "<catch>"),
            Self::Start => write!(f, "<start>"),
            Self::BackEdgeSource => write!(f, "<backedge src>"),
            Self::BackEdgeTarget => write!(f, "<backedge dst>"),
            Self::ProcessExit => write!(f, "<exit>"),
        }
    }
}

bitflags! {
    /// Edge properties set by refinement passes.
    pub struct EdgeFlags: u8 {
        /// The edge carries checked exceptions.
        const CHECKED_EXCEPTIONS  = 0x01;
        /// The edge carries explicitly thrown or declared exceptions.
        const EXPLICIT_EXCEPTIONS = 0x02;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    kind: EdgeKind,
    flags: EdgeFlags,
}

impl Edge {
    #[must_use]
    pub const fn new(kind: EdgeKind) -> Self {
        Self {
            kind,
            flags: EdgeFlags::empty(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EdgeKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> EdgeFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: EdgeFlags) {
        self.flags.insert(flags);
    }

    #[inline]
    #[must_use]
    pub const fn is_exception_edge(&self) -> bool {
        self.kind.is_exception()
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.flags.contains(EdgeFlags::CHECKED_EXCEPTIONS) {
            write!(f, "[checked]")?;
        }
        if self.flags.contains(EdgeFlags::EXPLICIT_EXCEPTIONS) {
            write!(f, "[explicit]")?;
        }
        Ok(())
    }
}
