//! Type inference on frames of JVM types, with exception sets computed for every
//! exception thrower block.

pub mod errors;
pub mod exceptions;
pub mod types;

mod transfer;

pub use exceptions::{CachedExceptionSet, ExceptionSet};
pub use types::JvmType;

use crate::block::CatchType;
use crate::cfg::{BlockId, Cfg, EdgeId};
use crate::dataflow::{Analysis, Dataflow, Direction};
use crate::edge::EdgeKind;
use crate::errors::AnalysisResult;
use crate::frame::{merge_frames, Frame, FrameMerger};
use crate::hierarchy::{ClassResolver, LookupFailureCallback};
use crate::location::Location;
use jf_bytecode::instrs::LabeledInstr;
use jf_bytecode::methods::Method;
use jf_bytecode::types::MethodDescriptor;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::convert::TryFrom;

pub type TypeFrame = Frame<JvmType>;

pub type TypeDataflow<'a> = Dataflow<TypeAnalysis<'a>>;

#[derive(Debug, Clone, Copy)]
pub struct TypeAnalysisConfig {
    /// Computes the exception sets of thrower blocks, and uses them for the values
    /// entering exception handlers.
    pub compute_exception_sets: bool,
}

impl Default for TypeAnalysisConfig {
    fn default() -> Self {
        Self {
            compute_exception_sets: true,
        }
    }
}

/// Forward analysis computing the type of every local variable and operand stack
/// slot.
pub struct TypeAnalysis<'a> {
    class_name: String,
    descriptor: MethodDescriptor,
    is_static: bool,
    num_locals: usize,
    resolver: &'a dyn ClassResolver,
    callback: &'a dyn LookupFailureCallback,
    config: TypeAnalysisConfig,
    // bumped each time the result fact of a block changes
    generations: Vec<u64>,
    exception_sets: RefCell<BTreeMap<BlockId, CachedExceptionSet>>,
}

impl<'a> TypeAnalysis<'a> {
    #[must_use]
    pub fn new(
        method: &Method,
        resolver: &'a dyn ClassResolver,
        callback: &'a dyn LookupFailureCallback,
        config: TypeAnalysisConfig,
    ) -> Self {
        Self {
            class_name: method.class_name().to_string(),
            descriptor: method.descriptor().clone(),
            is_static: method.is_static(),
            num_locals: method.max_locals(),
            resolver,
            callback,
            config,
            generations: Vec::new(),
            exception_sets: RefCell::new(BTreeMap::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &'a dyn ClassResolver {
        self.resolver
    }

    #[inline]
    #[must_use]
    pub fn callback(&self) -> &'a dyn LookupFailureCallback {
        self.callback
    }

    fn generation(&self, block: BlockId) -> u64 {
        self.generations.get(block.index()).copied().unwrap_or(0)
    }

    /// Runs `f` on the exception sets of an exception thrower block whose result
    /// fact is `fact`, computing them if the cached ones are out of date.
    fn with_exception_sets<R>(
        &self,
        cfg: &Cfg,
        etb: BlockId,
        fact: &TypeFrame,
        f: impl FnOnce(&CachedExceptionSet) -> R,
    ) -> Option<R> {
        if !fact.is_valid() || !cfg.is_exception_thrower(etb) {
            return None;
        }
        let generation = self.generation(etb);
        if let Some(cached) = self.exception_sets.borrow().get(&etb) {
            if cached.generation == generation {
                return Some(f(cached));
            }
        }
        let computed =
            CachedExceptionSet::compute(cfg, etb, fact, generation, self.resolver, self.callback)?;
        log::trace!(
            "exception set of B{} (generation {generation}): {}",
            etb.index(),
            computed.thrown()
        );
        let res = f(&computed);
        self.exception_sets.borrow_mut().insert(etb, computed);
        Some(res)
    }

    /// Exceptions flowing along an exception edge, given the result fact of its
    /// source block.
    #[must_use]
    pub fn edge_exception_set(&self, cfg: &Cfg, edge: EdgeId, fact: &TypeFrame) -> Option<ExceptionSet> {
        self.with_exception_sets(cfg, cfg.source(edge), fact, |sets| {
            sets.edge_set(edge).cloned()
        })
        .flatten()
    }

    /// Exceptions raised by the thrower of an exception thrower block, given its
    /// result fact.
    #[must_use]
    pub fn thrown_exception_set(&self, cfg: &Cfg, etb: BlockId, fact: &TypeFrame) -> Option<ExceptionSet> {
        self.with_exception_sets(cfg, etb, fact, |sets| sets.thrown().clone())
    }

    fn catch_type_value(cfg: &Cfg, edge: EdgeId) -> JvmType {
        match cfg.block(cfg.target(edge)).catch_type() {
            Some(CatchType::Class(class)) => JvmType::Object(class.clone()),
            _ => types::THROWABLE.clone(),
        }
    }
}

impl FrameMerger<JvmType> for TypeAnalysis<'_> {
    fn merge_values(&self, _slot: usize, a: &JvmType, b: &JvmType) -> AnalysisResult<JvmType> {
        Ok(a.merge(b, self.resolver, self.callback))
    }
}

impl Analysis for TypeAnalysis<'_> {
    type Fact = TypeFrame;

    fn name(&self) -> &'static str {
        "types"
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn create_fact(&self) -> TypeFrame {
        Frame::top(self.num_locals)
    }

    fn make_top(&self, fact: &mut TypeFrame) {
        fact.set_top();
    }

    fn is_top(&self, fact: &TypeFrame) -> bool {
        fact.is_top()
    }

    fn is_bottom(&self, fact: &TypeFrame) -> bool {
        fact.is_bottom()
    }

    fn same(&self, fact1: &TypeFrame, fact2: &TypeFrame) -> bool {
        fact1 == fact2
    }

    /// Receiver first, then the parameters. Other locals are bottom.
    fn init_entry_fact(&self, _cfg: &Cfg, fact: &mut TypeFrame) -> AnalysisResult<()> {
        *fact = Frame::valid(self.num_locals, JvmType::Bottom);
        let mut slot = 0;
        if !self.is_static {
            fact.set_local(slot, JvmType::Object(self.class_name.clone()))?;
            slot += 1;
        }
        for param in self.descriptor.parameters_types() {
            let value = JvmType::try_from(param)?;
            if let Some(extra) = value.wide_extra() {
                fact.set_local(slot, extra)?;
                slot += 1;
            }
            fact.set_local(slot, value)?;
            slot += 1;
        }
        Ok(())
    }

    fn meet_into(
        &self,
        _cfg: &Cfg,
        _edge: EdgeId,
        fact: &TypeFrame,
        result: &mut TypeFrame,
    ) -> AnalysisResult<()> {
        merge_frames(self, fact, result)
    }

    /// Handlers are entered with the exception object alone on the stack. No value
    /// flows along a handled exception edge carrying no exception.
    fn edge_transfer(&self, cfg: &Cfg, edge: EdgeId, fact: &mut TypeFrame) -> AnalysisResult<()> {
        if cfg.edge(edge).kind() != EdgeKind::HandledException || !fact.is_valid() {
            return Ok(());
        }
        let exception = if self.config.compute_exception_sets {
            match self.edge_exception_set(cfg, edge, fact) {
                Some(set) if set.is_empty() => {
                    log::trace!("no exception along {edge:?}");
                    fact.set_top();
                    return Ok(());
                }
                Some(set) => JvmType::Exception(set),
                None => Self::catch_type_value(cfg, edge),
            }
        } else {
            Self::catch_type_value(cfg, edge)
        };
        fact.clear_stack();
        fact.push(exception);
        Ok(())
    }

    fn transfer_instruction(
        &self,
        _cfg: &Cfg,
        _location: Location,
        linstr: &LabeledInstr,
        fact: &mut TypeFrame,
    ) -> AnalysisResult<()> {
        transfer::model_instruction(linstr, fact)
    }

    fn on_result_changed(&mut self, _cfg: &Cfg, block: BlockId, _fact: &TypeFrame) {
        let index = block.index();
        if self.generations.len() <= index {
            self.generations.resize(index + 1, 0);
        }
        self.generations[index] += 1;
    }
}

impl<'a> Dataflow<TypeAnalysis<'a>> {
    /// Exceptions flowing along an exception edge at the fixed point.
    #[must_use]
    pub fn edge_exception_set(&self, edge: EdgeId) -> Option<ExceptionSet> {
        let source = self.cfg().source(edge);
        self.analysis()
            .edge_exception_set(self.cfg(), edge, self.result_fact(source))
    }

    /// Exceptions raised by the thrower of an exception thrower block at the fixed
    /// point.
    #[must_use]
    pub fn thrown_exception_set(&self, etb: BlockId) -> Option<ExceptionSet> {
        self.analysis()
            .thrown_exception_set(self.cfg(), etb, self.result_fact(etb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::DataflowConfig;
    use crate::errors::AnalysisError;
    use crate::hierarchy::{Hierarchy, LogLookupFailures};
    use crate::testing::{cfg_of, program, Failures};
    use crate::typing::errors::TypeError;
    use jf_bytecode::{Addr, Program};
    use std::rc::Rc;

    fn run<'a>(
        p: &Program,
        h: &'a Hierarchy,
        callback: &'a dyn LookupFailureCallback,
        name: &str,
        config: TypeAnalysisConfig,
    ) -> TypeDataflow<'a> {
        let method = p.get_method(name).unwrap();
        let cfg = Rc::new(cfg_of(p, name));
        let analysis = TypeAnalysis::new(method, h, callback, config);
        Dataflow::run(cfg, analysis, DataflowConfig::new()).unwrap()
    }

    fn object(class: &str) -> JvmType {
        JvmType::Object(class.to_string())
    }

    #[test]
    fn entry_frame() {
        let p = program("method Foo.f(JI)V locals 5\n  0: return\nend\n");
        let h = Hierarchy::from_program(&p);
        let df = run(&p, &h, &LogLookupFailures, "Foo.f(JI)V", TypeAnalysisConfig::default());
        let first = df.cfg().successor_by_kind(df.cfg().entry(), EdgeKind::Start).unwrap();
        let frame = df.start_fact(first);
        assert_eq!(frame.to_string(), "[Foo long_ long int ⊥ |]");
        assert_eq!(*frame.local(2).unwrap(), JvmType::Long);
    }

    #[test]
    fn references_merge_at_joins() {
        let p = program(
            r#"
method Foo.pick(I)Ljava/lang/Object; static locals 1
  0: iload 0
  1: ifeq 4
  2: new java/lang/ArithmeticException
  3: goto 5
  4: new java/lang/NullPointerException
  5: areturn
end
"#,
        );
        let h = Hierarchy::from_program(&p);
        let df = run(
            &p,
            &h,
            &LogLookupFailures,
            "Foo.pick(I)Ljava/lang/Object;",
            TypeAnalysisConfig::default(),
        );
        let join = df.cfg().block_containing(Addr(5))[0];
        assert_eq!(
            df.start_fact(join).top_value().unwrap(),
            &object("java/lang/RuntimeException")
        );
    }

    #[test]
    fn wide_locals() {
        let p = program(
            r#"
method Foo.w()I static locals 3
  0: lconst 1
  1: lstore 0
  2: iconst 0
  3: istore 1
  4: dconst 2.0
  5: dstore 1
  6: iload 1
  7: ireturn
end
"#,
        );
        let h = Hierarchy::from_program(&p);
        let df = run(&p, &h, &LogLookupFailures, "Foo.w()I", TypeAnalysisConfig::default());
        let block = df.cfg().block_containing(Addr(0))[0];
        let at = |addr: usize| {
            let location = df.cfg().location_of(block, Addr(addr)).unwrap();
            df.fact_at_location(location).unwrap()
        };
        assert_eq!(at(2).to_string(), "[long_ long ⊥ |]");
        // the int store breaks the long
        assert_eq!(at(4).to_string(), "[⊥ int ⊥ |]");
        assert_eq!(at(6).to_string(), "[⊥ double_ double |]");
    }

    const THROWING: &str = r#"
class java/io/IOException extends java/lang/Exception
end
class java/lang/IllegalStateException extends java/lang/RuntimeException
end
class Foo
  declares open()V throws java/io/IOException
end
method Foo.read()V static locals 1
  0: invokestatic Foo.open()V
  1: return
  2: astore 0
  3: return
  try 0 1 2 java/io/IOException
end
method Foo.fail()V static locals 1
  0: new java/lang/IllegalStateException
  1: dup
  2: invokespecial java/lang/IllegalStateException.<init>()V
  3: athrow
  4: astore 0
  5: return
  try 3 4 4 java/io/IOException
end
method Foo.divide(II)I static locals 3
  0: iload 0
  1: iload 1
  2: idiv
  3: ireturn
  4: astore 2
  5: iconst 0
  6: ireturn
  try 0 4 4 any
end
method Foo.poll(I)I static locals 2
  0: iconst 0
  1: istore 1
  2: iload 0
  3: ifle 9
  4: invokestatic Foo.open()V
  5: iinc 1 1
  6: iinc 0 -1
  7: goto 2
  8: pop
  9: iload 1
  10: ireturn
  try 4 5 8 java/io/IOException
end
"#;

    #[test]
    fn handlers_receive_exception_sets() {
        let p = program(THROWING);
        let h = Hierarchy::from_program(&p);
        let df = run(&p, &h, &LogLookupFailures, "Foo.read()V", TypeAnalysisConfig::default());
        let handler = df.cfg().block_containing(Addr(2))[0];
        let JvmType::Exception(set) = df.start_fact(handler).top_value().unwrap().clone() else {
            panic!("exception value expected");
        };
        assert_eq!(set.len(), 1);
        assert!(set.is_explicit("java/io/IOException"));

        let df = run(&p, &h, &LogLookupFailures, "Foo.divide(II)I", TypeAnalysisConfig::default());
        let handler = df.cfg().block_containing(Addr(4))[0];
        assert_eq!(
            df.start_fact(handler).top_value().unwrap().to_string(),
            "EXC{java/lang/ArithmeticException}"
        );
        let etb = df
            .cfg()
            .exception_thrower_block_of(df.cfg().block_containing(Addr(2))[0])
            .unwrap();
        let thrown = df.thrown_exception_set(etb).unwrap();
        assert!(thrown.contains("java/lang/ArithmeticException"));
        // a catch-all handler leaves nothing to the method caller
        let unhandled = df.cfg().first_outgoing_edge_of_kind(etb, EdgeKind::UnhandledException);
        assert!(unhandled.is_none());
    }

    #[test]
    fn infeasible_handlers_are_not_entered() {
        let p = program(THROWING);
        let h = Hierarchy::from_program(&p);
        let df = run(&p, &h, &LogLookupFailures, "Foo.fail()V", TypeAnalysisConfig::default());
        let cfg = df.cfg();
        let handler = cfg.block_containing(Addr(4))[0];
        assert!(df.start_fact(handler).is_top());

        let etb = cfg
            .exception_thrower_block_of(cfg.block_containing(Addr(3))[0])
            .unwrap();
        let edge = cfg.lookup_edge(etb, handler).unwrap();
        assert!(df.edge_exception_set(edge).unwrap().is_empty());
        let unhandled = cfg.lookup_edge(etb, cfg.exit()).unwrap();
        let set = df.edge_exception_set(unhandled).unwrap();
        assert!(set.is_explicit("java/lang/IllegalStateException"));

        // without exception sets, the handler gets its catch type
        let df = run(
            &p,
            &h,
            &LogLookupFailures,
            "Foo.fail()V",
            TypeAnalysisConfig {
                compute_exception_sets: false,
            },
        );
        let handler = df.cfg().block_containing(Addr(4))[0];
        assert_eq!(
            df.start_fact(handler).top_value().unwrap(),
            &object("java/io/IOException")
        );
    }

    #[test]
    fn loops_in_try_blocks_reach_the_same_fixed_point() {
        let p = program(THROWING);
        let h = Hierarchy::from_program(&p);
        let name = "Foo.poll(I)I";
        let method = p.get_method(name).unwrap();
        let cfg = Rc::new(cfg_of(&p, name));
        let analysis =
            || TypeAnalysis::new(method, &h, &LogLookupFailures, TypeAnalysisConfig::default());
        let skipping = Dataflow::run(Rc::clone(&cfg), analysis(), DataflowConfig::new()).unwrap();
        let full = Dataflow::run(
            Rc::clone(&cfg),
            analysis(),
            DataflowConfig::new().skip_unchanged_blocks(false),
        )
        .unwrap();

        for block in cfg.blocks() {
            assert_eq!(skipping.start_fact(block), full.start_fact(block));
            assert_eq!(skipping.result_fact(block), full.result_fact(block));
            // results are the transfer of the start facts
            let mut result = skipping.analysis().create_fact();
            skipping
                .analysis()
                .transfer(&cfg, block, skipping.start_fact(block), &mut result)
                .unwrap();
            assert_eq!(&result, skipping.result_fact(block));
        }

        let handler = cfg.block_containing(Addr(8))[0];
        assert_eq!(
            skipping.start_fact(handler).to_string(),
            "[int int | EXC{java/io/IOException!}]"
        );
        let exit_block = cfg.block_containing(Addr(9))[0];
        assert_eq!(skipping.start_fact(exit_block).to_string(), "[int int |]");
    }

    #[test]
    fn wide_loads_need_both_halves() {
        let p = program(
            "method Foo.bad()J static locals 2\n  0: iconst 0\n  1: istore 1\n  2: lload 0\n  3: lreturn\nend\n",
        );
        let h = Hierarchy::from_program(&p);
        let method = p.get_method("Foo.bad()J").unwrap();
        let analysis =
            TypeAnalysis::new(method, &h, &LogLookupFailures, TypeAnalysisConfig::default());
        let cfg = Rc::new(cfg_of(&p, "Foo.bad()J"));
        assert!(matches!(
            Dataflow::run(cfg, analysis, DataflowConfig::new()),
            Err(AnalysisError::Type(TypeError::BrokenWideValue(0)))
        ));
    }

    #[test]
    fn unknown_callees_throw_anything() {
        let p = program(
            r#"
method Foo.g()V static locals 1
  0: invokestatic Missing.run()V
  1: return
  2: astore 0
  3: return
  try 0 1 2 java/lang/Exception
end
"#,
        );
        let h = Hierarchy::from_program(&p);
        let failures = Failures::default();
        let df = run(&p, &h, &failures, "Foo.g()V", TypeAnalysisConfig::default());
        assert!(failures.classes().contains(&"Missing".to_string()));
        let handler = df.cfg().block_containing(Addr(2))[0];
        assert_eq!(
            df.start_fact(handler).top_value().unwrap().to_string(),
            "EXC{java/lang/Exception}"
        );
    }
}
