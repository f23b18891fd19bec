//! Live local variables analysis.

use crate::cfg::{Cfg, EdgeId};
use crate::dataflow::{Analysis, Dataflow, Direction};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::location::Location;
use fixedbitset::FixedBitSet;
use jf_bytecode::instrs::{Instr, LabeledInstr};
use std::fmt;

/// Set of live locals. The extra bit past the locals marks the top fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveLocals(FixedBitSet);

impl LiveLocals {
    #[must_use]
    pub fn is_live(&self, local: usize) -> bool {
        local + 1 < self.0.len() && self.0.contains(local)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let top = self.0.len() - 1;
        self.0.ones().filter(move |i| *i != top)
    }
}

impl fmt::Display for LiveLocals {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.contains(self.0.len() - 1) {
            return write!(f, "TOP");
        }
        write!(f, "{{")?;
        for (i, local) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{local}")?;
        }
        write!(f, "}}")
    }
}

/// Backward analysis computing the locals whose current value may be read later.
/// Used to find dead stores.
#[derive(Debug, Clone)]
pub struct LiveLocalStoreAnalysis {
    num_locals: usize,
}

impl LiveLocalStoreAnalysis {
    #[must_use]
    pub const fn new(num_locals: usize) -> Self {
        Self { num_locals }
    }

    const fn top_bit(&self) -> usize {
        self.num_locals
    }

    fn set(&self, fact: &mut LiveLocals, local: u16, wide: bool, live: bool) -> AnalysisResult<()> {
        let local = usize::from(local);
        let last = if wide { local + 1 } else { local };
        if last >= self.num_locals {
            return Err(AnalysisError::InvalidLocal(last));
        }
        for i in local..=last {
            fact.0.set(i, live);
        }
        Ok(())
    }
}

impl Analysis for LiveLocalStoreAnalysis {
    type Fact = LiveLocals;

    fn name(&self) -> &'static str {
        "live-locals"
    }

    fn direction(&self) -> Direction {
        Direction::Backward
    }

    fn create_fact(&self) -> LiveLocals {
        LiveLocals(FixedBitSet::with_capacity(self.num_locals + 1))
    }

    fn make_top(&self, fact: &mut LiveLocals) {
        fact.0.clear();
        fact.0.insert(self.top_bit());
    }

    fn is_top(&self, fact: &LiveLocals) -> bool {
        fact.0.contains(self.top_bit())
    }

    fn same(&self, fact1: &LiveLocals, fact2: &LiveLocals) -> bool {
        fact1 == fact2
    }

    fn init_entry_fact(&self, _cfg: &Cfg, fact: &mut LiveLocals) -> AnalysisResult<()> {
        fact.0.clear();
        Ok(())
    }

    fn meet_into(
        &self,
        _cfg: &Cfg,
        _edge: EdgeId,
        fact: &LiveLocals,
        result: &mut LiveLocals,
    ) -> AnalysisResult<()> {
        if self.is_top(fact) {
            return Ok(());
        }
        if self.is_top(result) {
            self.copy(fact, result);
        } else {
            result.0.union_with(&fact.0);
        }
        Ok(())
    }

    fn transfer_instruction(
        &self,
        _cfg: &Cfg,
        _location: Location,
        linstr: &LabeledInstr,
        fact: &mut LiveLocals,
    ) -> AnalysisResult<()> {
        match linstr.instr() {
            Instr::Iload(i) | Instr::Fload(i) | Instr::Aload(i) | Instr::Iinc(i, _) | Instr::Ret(i) => {
                self.set(fact, *i, false, true)
            }
            Instr::Lload(i) | Instr::Dload(i) => self.set(fact, *i, true, true),
            Instr::Istore(i) | Instr::Fstore(i) | Instr::Astore(i) => self.set(fact, *i, false, false),
            Instr::Lstore(i) | Instr::Dstore(i) => self.set(fact, *i, true, false),
            _ => Ok(()),
        }
    }
}

impl Dataflow<LiveLocalStoreAnalysis> {
    /// Returns `true` if the local written by the store at a location is never read
    /// afterwards. Other instructions are never dead stores.
    ///
    /// # Errors
    ///
    /// Propagates failures of the replayed instruction transfers.
    pub fn is_store_dead(&self, location: Location) -> AnalysisResult<bool> {
        let local = match self.cfg().instruction_at(location).map(LabeledInstr::instr) {
            Some(
                Instr::Istore(i)
                | Instr::Fstore(i)
                | Instr::Astore(i)
                | Instr::Lstore(i)
                | Instr::Dstore(i),
            ) => usize::from(*i),
            _ => return Ok(false),
        };
        let live = self.fact_at_location(location)?;
        Ok(!self.analysis().is_top(&live) && !live.is_live(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::DataflowConfig;
    use crate::testing::{cfg_of, program};
    use jf_bytecode::Addr;
    use std::rc::Rc;

    #[test]
    fn dead_stores() {
        let p = program(
            r#"
method Foo.f(I)I static locals 3
  0: iconst 1
  1: istore 1
  2: iconst 2
  3: istore 2
  4: iload 0
  5: ifeq 8
  6: iload 1
  7: ireturn
  8: iconst 2
  9: istore 1
  10: iload 2
  11: ireturn
end
"#,
        );
        let cfg = Rc::new(cfg_of(&p, "Foo.f(I)I"));
        let df = Dataflow::run(
            Rc::clone(&cfg),
            LiveLocalStoreAnalysis::new(3),
            DataflowConfig::new(),
        )
        .unwrap();

        let location = |addr: usize| {
            let block = cfg.block_containing(Addr(addr))[0];
            cfg.location_of(block, Addr(addr)).unwrap()
        };
        assert!(!df.is_store_dead(location(1)).unwrap());
        assert!(!df.is_store_dead(location(3)).unwrap());
        assert!(df.is_store_dead(location(9)).unwrap());
        assert!(!df.is_store_dead(location(4)).unwrap());

        let first = cfg.successor_by_kind(cfg.entry(), crate::edge::EdgeKind::Start).unwrap();
        let live: Vec<usize> = df.result_fact(first).iter().collect();
        assert_eq!(live, vec![0]);
        assert_eq!(df.result_fact(first).to_string(), "{0}");
        assert!(df.fact_before_exit().iter().next().is_none());
    }
}
