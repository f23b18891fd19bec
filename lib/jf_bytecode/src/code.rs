//! JVM method bodies: instruction stream and exception table.

use crate::errors::{BytecodeError, BytecodeResult};
use crate::instrs::LabeledInstr;
use crate::Addr;
use std::collections::BTreeMap;
use std::fmt;

/// An entry of the exception table of a method.
///
/// Instructions in `[start, end)` are protected: an exception thrown by one of them,
/// whose type is a subtype of `catch_type` (any type when `None`), transfers control
/// to `handler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    start: Addr,
    end: Addr,
    handler: Addr,
    catch_type: Option<String>,
}

impl ExceptionHandler {
    #[must_use]
    pub const fn new(start: Addr, end: Addr, handler: Addr, catch_type: Option<String>) -> Self {
        Self {
            start,
            end,
            handler,
            catch_type,
        }
    }

    #[inline]
    #[must_use]
    pub const fn start_addr(&self) -> Addr {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end_addr(&self) -> Addr {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn handler_addr(&self) -> Addr {
        self.handler
    }

    /// Caught class name, `None` for a catch-all (`finally`) handler.
    #[inline]
    #[must_use]
    pub fn catch_type(&self) -> Option<&str> {
        self.catch_type.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn covers(&self, addr: Addr) -> bool {
        addr >= self.start && addr < self.end
    }
}

impl fmt::Display for ExceptionHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "try {} {} {} {}",
            self.start,
            self.end,
            self.handler,
            self.catch_type.as_deref().unwrap_or("any")
        )
    }
}

/// The code of a method: instructions ordered by address, and the exception
/// table ordered by priority (first matching handler wins).
#[derive(Debug, Clone)]
pub struct Code {
    instrs: Vec<LabeledInstr>,
    positions: BTreeMap<Addr, usize>,
    handlers: Vec<ExceptionHandler>,
}

impl Code {
    /// Builds a method body, checking that addresses are strictly increasing and that
    /// exception handlers reference existing instructions.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate or unordered addresses, and on handlers whose
    /// target is not an instruction address.
    pub fn new(instrs: Vec<LabeledInstr>, handlers: Vec<ExceptionHandler>) -> BytecodeResult<Self> {
        let mut positions = BTreeMap::new();
        let mut last: Option<Addr> = None;
        for (i, linstr) in instrs.iter().enumerate() {
            if let Some(prev) = last {
                if linstr.addr() <= prev {
                    return Err(BytecodeError::DuplicateAddress(linstr.addr()));
                }
            }
            last = Some(linstr.addr());
            positions.insert(linstr.addr(), i);
        }
        for h in &handlers {
            if !positions.contains_key(&h.handler_addr()) {
                return Err(BytecodeError::InvalidHandler(format!("{h}")));
            }
            if h.start_addr() >= h.end_addr() {
                return Err(BytecodeError::InvalidHandler(format!("{h}")));
            }
        }
        Ok(Self {
            instrs,
            positions,
            handlers,
        })
    }

    #[inline]
    pub fn iter_instructions(&self) -> impl Iterator<Item = &LabeledInstr> {
        self.instrs.iter()
    }

    #[inline]
    pub fn iter_handlers(&self) -> impl Iterator<Item = &ExceptionHandler> {
        self.handlers.iter()
    }

    #[inline]
    #[must_use]
    pub fn instructions_count(&self) -> usize {
        self.instrs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Retrieves the instruction at given address.
    ///
    /// # Errors
    ///
    /// Returns [`BytecodeError::InstructionNotFound`] if no instruction starts there.
    pub fn instruction_at(&self, addr: Addr) -> BytecodeResult<&LabeledInstr> {
        self.positions
            .get(&addr)
            .map(|i| &self.instrs[*i])
            .ok_or(BytecodeError::InstructionNotFound(addr))
    }

    /// Index of the instruction at given address in the instruction stream.
    #[must_use]
    pub fn position_of(&self, addr: Addr) -> Option<usize> {
        self.positions.get(&addr).copied()
    }

    /// Address of the instruction following the one at `addr`, if any.
    #[must_use]
    pub fn next_addr(&self, addr: Addr) -> Option<Addr> {
        self.position_of(addr)
            .and_then(|i| self.instrs.get(i + 1))
            .map(LabeledInstr::addr)
    }

    /// Handlers protecting the given address, in priority order.
    pub fn handlers_covering(&self, addr: Addr) -> impl Iterator<Item = &ExceptionHandler> {
        self.handlers.iter().filter(move |h| h.covers(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrs::Instr;

    fn code() -> Code {
        Code::new(
            vec![
                LabeledInstr::new(Addr(0), Instr::Iconst(1)),
                LabeledInstr::new(Addr(1), Instr::Istore(0)),
                LabeledInstr::new(Addr(2), Instr::Return),
                LabeledInstr::new(Addr(3), Instr::Astore(1)),
                LabeledInstr::new(Addr(4), Instr::Return),
            ],
            vec![ExceptionHandler::new(Addr(0), Addr(2), Addr(3), None)],
        )
        .unwrap()
    }

    #[test]
    fn code_lookups() {
        let code = code();
        assert_eq!(code.instructions_count(), 5);
        assert_eq!(code.next_addr(Addr(1)), Some(Addr(2)));
        assert_eq!(code.next_addr(Addr(4)), None);
        assert_eq!(code.position_of(Addr(3)), Some(3));
        assert!(code.instruction_at(Addr(7)).is_err());
        assert_eq!(code.handlers_covering(Addr(1)).count(), 1);
        assert_eq!(code.handlers_covering(Addr(2)).count(), 0);
    }

    #[test]
    fn unordered_addresses_are_rejected() {
        let res = Code::new(
            vec![
                LabeledInstr::new(Addr(2), Instr::Nop),
                LabeledInstr::new(Addr(1), Instr::Return),
            ],
            vec![],
        );
        assert!(matches!(res, Err(BytecodeError::DuplicateAddress(Addr(1)))));
    }
}
