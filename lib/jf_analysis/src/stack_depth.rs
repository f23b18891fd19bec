//! Operand stack depth analysis.

use crate::cfg::{Cfg, EdgeId};
use crate::dataflow::{Analysis, Direction};
use crate::edge::EdgeKind;
use crate::errors::{AnalysisError, AnalysisResult};
use crate::location::Location;
use jf_bytecode::instrs::LabeledInstr;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackDepth {
    Top,
    Bottom,
    Depth(i32),
}

impl fmt::Display for StackDepth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Top => write!(f, "TOP"),
            Self::Bottom => write!(f, "BOTTOM"),
            Self::Depth(d) => write!(f, "{d}"),
        }
    }
}

/// Forward analysis computing the operand stack depth, in slots, from the stack
/// effects of the instructions. Paths reaching a block with different depths
/// yield bottom.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackDepthAnalysis;

impl Analysis for StackDepthAnalysis {
    type Fact = StackDepth;

    fn name(&self) -> &'static str {
        "stack-depth"
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn create_fact(&self) -> StackDepth {
        StackDepth::Top
    }

    fn make_top(&self, fact: &mut StackDepth) {
        *fact = StackDepth::Top;
    }

    fn is_top(&self, fact: &StackDepth) -> bool {
        *fact == StackDepth::Top
    }

    fn is_bottom(&self, fact: &StackDepth) -> bool {
        *fact == StackDepth::Bottom
    }

    fn same(&self, fact1: &StackDepth, fact2: &StackDepth) -> bool {
        fact1 == fact2
    }

    fn init_entry_fact(&self, _cfg: &Cfg, fact: &mut StackDepth) -> AnalysisResult<()> {
        *fact = StackDepth::Depth(0);
        Ok(())
    }

    fn meet_into(
        &self,
        _cfg: &Cfg,
        _edge: EdgeId,
        fact: &StackDepth,
        result: &mut StackDepth,
    ) -> AnalysisResult<()> {
        *result = match (*fact, *result) {
            (StackDepth::Top, r) => r,
            (f, StackDepth::Top) => f,
            (StackDepth::Depth(a), StackDepth::Depth(b)) if a == b => StackDepth::Depth(a),
            _ => StackDepth::Bottom,
        };
        Ok(())
    }

    fn edge_transfer(&self, cfg: &Cfg, edge: EdgeId, fact: &mut StackDepth) -> AnalysisResult<()> {
        // handlers start with the exception object alone on the stack
        if cfg.edge(edge).kind() == EdgeKind::HandledException && self.is_fact_valid(fact) {
            *fact = StackDepth::Depth(1);
        }
        Ok(())
    }

    fn transfer_instruction(
        &self,
        _cfg: &Cfg,
        _location: Location,
        linstr: &LabeledInstr,
        fact: &mut StackDepth,
    ) -> AnalysisResult<()> {
        if let StackDepth::Depth(depth) = *fact {
            let depth = depth + linstr.instr().stack_delta();
            if depth < 0 {
                return Err(AnalysisError::StackUnderflow);
            }
            *fact = StackDepth::Depth(depth);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{Dataflow, DataflowConfig};
    use crate::testing::{cfg_of, program};
    use jf_bytecode::Addr;
    use std::rc::Rc;

    fn run(source: &str, method: &str) -> AnalysisResult<Dataflow<StackDepthAnalysis>> {
        let p = program(source);
        let cfg = Rc::new(cfg_of(&p, method));
        Dataflow::run(cfg, StackDepthAnalysis, DataflowConfig::new())
    }

    #[test]
    fn push_then_return() {
        let df = run(
            "method Foo.one()I static\n  0: iconst 1\n  1: ireturn\nend\n",
            "Foo.one()I",
        )
        .unwrap();
        let cfg = df.cfg();
        let block = cfg.successor_by_kind(cfg.entry(), EdgeKind::Start).unwrap();
        assert_eq!(*df.start_fact(block), StackDepth::Depth(0));
        assert_eq!(*df.result_fact(block), StackDepth::Depth(0));
        let push = cfg.location_of(block, Addr(0)).unwrap();
        assert_eq!(df.fact_after_location(push).unwrap(), StackDepth::Depth(1));
        assert_eq!(*df.fact_before_exit(), StackDepth::Depth(0));
    }

    #[test]
    fn handlers_start_with_one_value() {
        let df = run(
            r#"
method Foo.guarded(II)I static locals 3
  0: iload 0
  1: iload 1
  2: idiv
  3: ireturn
  4: astore 2
  5: iconst 0
  6: ireturn
  try 0 4 4 java/lang/ArithmeticException
end
"#,
            "Foo.guarded(II)I",
        )
        .unwrap();
        let handler = df.cfg().block_containing(Addr(4))[0];
        assert_eq!(*df.start_fact(handler), StackDepth::Depth(1));
        // the thrower block sees the stack before the division
        let etb = df.cfg().exception_thrower_block_of(df.cfg().block_containing(Addr(2))[0]);
        assert_eq!(*df.result_fact(etb.unwrap()), StackDepth::Depth(2));
    }

    #[test]
    fn subroutine_copies_have_their_own_facts() {
        let df = run(
            r#"
method Foo.subroutines()V static locals 2
  0: iconst 1
  1: jsr 5
  2: pop
  3: jsr 5
  4: return
  5: astore 1
  6: ret 1
end
"#,
            "Foo.subroutines()V",
        )
        .unwrap();
        let cfg = df.cfg();
        let copies = cfg.block_containing(Addr(5));
        let first = cfg.location_of(copies[0], Addr(5)).unwrap();
        let second = cfg.location_of(copies[1], Addr(5)).unwrap();
        assert_ne!(first, second);
        assert_eq!(df.fact_at_location(first).unwrap(), StackDepth::Depth(2));
        assert_eq!(df.fact_at_location(second).unwrap(), StackDepth::Depth(1));
    }

    #[test]
    fn underflow_and_mismatch() {
        assert!(matches!(
            run("method Foo.f()V static\n  0: pop\n  1: return\nend\n", "Foo.f()V"),
            Err(AnalysisError::StackUnderflow)
        ));
        let df = run(
            r#"
method Foo.g(I)V static locals 1
  0: iload 0
  1: ifeq 4
  2: iconst 1
  3: goto 5
  4: nop
  5: return
end
"#,
            "Foo.g(I)V",
        )
        .unwrap();
        let join = df.cfg().block_containing(Addr(5))[0];
        assert_eq!(*df.start_fact(join), StackDepth::Bottom);
    }
}
