//! Basic blocks.

use jf_bytecode::instrs::LabeledInstr;
use jf_bytecode::Addr;
use std::fmt;

/// Exception class caught by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchType {
    /// Catch-all handler (`finally` blocks).
    Any,
    Class(String),
}

impl fmt::Display for CatchType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Class(c) => write!(f, "{c}"),
        }
    }
}

/// A straight-line run of instructions.
///
/// Entry and exit blocks are empty. Exception thrower blocks are empty too: they
/// precede the block of a throwing instruction and carry its exception edges, so
/// that the state at handler entry is the state before the faulting instruction.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    instrs: Vec<LabeledInstr>,
    exception_thrower: Option<LabeledInstr>,
    catch_type: Option<CatchType>,
}

impl BasicBlock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exception_thrower_of(linstr: LabeledInstr) -> Self {
        Self {
            instrs: Vec::new(),
            exception_thrower: Some(linstr),
            catch_type: None,
        }
    }

    pub(crate) fn push(&mut self, linstr: LabeledInstr) {
        self.instrs.push(linstr);
    }

    #[inline]
    pub fn instructions(&self) -> impl Iterator<Item = &LabeledInstr> {
        self.instrs.iter()
    }

    #[inline]
    #[must_use]
    pub fn instruction(&self, position: usize) -> Option<&LabeledInstr> {
        self.instrs.get(position)
    }

    #[must_use]
    pub fn first_instruction(&self) -> Option<&LabeledInstr> {
        self.instrs.first()
    }

    #[must_use]
    pub fn last_instruction(&self) -> Option<&LabeledInstr> {
        self.instrs.last()
    }

    #[must_use]
    pub fn start_addr(&self) -> Option<Addr> {
        self.instrs.first().map(LabeledInstr::addr)
    }

    #[must_use]
    pub fn position_of(&self, addr: Addr) -> Option<usize> {
        self.instrs.iter().position(|linstr| linstr.addr() == addr)
    }

    #[must_use]
    pub fn contains(&self, addr: Addr) -> bool {
        self.position_of(addr).is_some()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// The instruction whose abnormal completion the outgoing exception edges model.
    #[inline]
    #[must_use]
    pub const fn exception_thrower(&self) -> Option<&LabeledInstr> {
        self.exception_thrower.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn is_exception_thrower(&self) -> bool {
        self.exception_thrower.is_some()
    }

    /// Caught type, when the block starts an exception handler.
    #[inline]
    #[must_use]
    pub const fn catch_type(&self) -> Option<&CatchType> {
        self.catch_type.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn is_handler_start(&self) -> bool {
        self.catch_type.is_some()
    }

    /// Records that a handler starts at this block. A block shared by handlers
    /// catching different types is considered a catch-all.
    pub(crate) fn mark_handler(&mut self, catch_type: CatchType) {
        self.catch_type = match self.catch_type.take() {
            None => Some(catch_type),
            Some(previous) if previous == catch_type => Some(previous),
            Some(_) => Some(CatchType::Any),
        };
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(thrower) = &self.exception_thrower {
            return write!(f, "<ETB {}>", thrower.addr());
        }
        if self.instrs.is_empty() {
            return write!(f, "<empty>");
        }
        if let Some(catch_type) = &self.catch_type {
            writeln!(f, "catch {catch_type}:")?;
        }
        for (i, linstr) in self.instrs.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{linstr}")?;
        }
        Ok(())
    }
}
