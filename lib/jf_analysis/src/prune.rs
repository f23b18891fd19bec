//! CFG refinement passes, removing edges that control can never follow.

use crate::cfg::Cfg;
use crate::edge::{EdgeFlags, EdgeKind};
use crate::errors::AnalysisResult;
use crate::hierarchy::{ClassResolver, LookupFailureCallback};
use crate::typing::TypeDataflow;
use std::collections::BTreeSet;

/// Removes the handled exception edges along which no exception can flow, as
/// computed by a type analysis run with exception sets, and flags the remaining
/// exception edges with the kind of exceptions they carry.
pub struct PruneInfeasibleExceptionEdges<'d, 'a> {
    types: &'d TypeDataflow<'a>,
}

impl<'d, 'a> PruneInfeasibleExceptionEdges<'d, 'a> {
    #[must_use]
    pub const fn new(types: &'d TypeDataflow<'a>) -> Self {
        Self { types }
    }

    /// Builds the pruned copy of the CFG the type analysis was run on.
    ///
    /// Blocks whose exceptions cannot be classified, because they are unreachable
    /// or because of a class lookup failure, are left untouched.
    ///
    /// # Errors
    ///
    /// Currently never fails.
    pub fn execute(&self) -> AnalysisResult<Cfg> {
        let cfg = self.types.cfg();
        let resolver = self.types.analysis().resolver();
        let callback = self.types.analysis().callback();
        let mut doomed = BTreeSet::new();
        let mut flagged = Vec::new();

        'blocks: for etb in cfg.blocks().filter(|b| cfg.is_exception_thrower(*b)) {
            let mut block_doomed = Vec::new();
            let mut block_flags = Vec::new();
            for edge in cfg.outgoing_edges(etb) {
                let kind = cfg.edge(edge).kind();
                if !kind.is_exception() {
                    continue;
                }
                let Some(set) = self.types.edge_exception_set(edge) else {
                    continue 'blocks;
                };
                if set.is_empty() {
                    if kind == EdgeKind::HandledException {
                        block_doomed.push(edge);
                    }
                    continue;
                }
                let mut flags = EdgeFlags::empty();
                if set.has_explicit() {
                    flags |= EdgeFlags::EXPLICIT_EXCEPTIONS;
                }
                match set.has_checked(resolver) {
                    Ok(true) => flags |= EdgeFlags::CHECKED_EXCEPTIONS,
                    Ok(false) => (),
                    Err(failure) => {
                        callback.report(&failure);
                        continue 'blocks;
                    }
                }
                block_flags.push((edge, flags));
            }
            doomed.extend(block_doomed);
            flagged.extend(block_flags);
        }

        let mut pruned = cfg.clone();
        let removed = pruned.remove_edges(&doomed);
        for (edge, flags) in flagged {
            pruned.set_edge_flags(edge, flags);
        }
        pruned.check_integrity();
        log::debug!(
            "{}: {removed} infeasible exception edge(s) removed",
            cfg.method_name()
        );
        Ok(pruned)
    }
}

/// Cuts the normal continuation of calls to methods declared as never returning.
pub struct PruneUnconditionalExceptionThrowerEdges<'a> {
    resolver: &'a dyn ClassResolver,
    callback: &'a dyn LookupFailureCallback,
}

impl<'a> PruneUnconditionalExceptionThrowerEdges<'a> {
    #[must_use]
    pub fn new(resolver: &'a dyn ClassResolver, callback: &'a dyn LookupFailureCallback) -> Self {
        Self { resolver, callback }
    }

    /// Removes the fall-through edges following the calls, in place, and links
    /// the calling blocks to the exit block when no other edge does. Returns the
    /// number of removed edges.
    ///
    /// # Errors
    ///
    /// Fails if an exit edge cannot be created.
    pub fn execute(&self, cfg: &mut Cfg) -> AnalysisResult<usize> {
        let exit = cfg.exit();
        let mut doomed = BTreeSet::new();
        let mut to_exit = Vec::new();

        for etb in cfg.blocks() {
            let Some(mref) = cfg
                .block(etb)
                .exception_thrower()
                .and_then(|thrower| thrower.instr().invoked_method())
            else {
                continue;
            };
            match self
                .resolver
                .method_decl(&mref.class, &mref.name, &mref.descriptor)
            {
                Ok(Some(decl)) if decl.unconditional_thrower => {
                    log::debug!("{}: {mref} never returns", cfg.method_name());
                    if let Some(edge) = cfg.first_outgoing_edge_of_kind(etb, EdgeKind::FallThrough) {
                        doomed.insert(edge);
                    }
                    if cfg.lookup_edge(etb, exit).is_none() {
                        to_exit.push(etb);
                    }
                }
                Ok(_) => (),
                Err(failure) => self.callback.report(&failure),
            }
        }

        let removed = cfg.remove_edges(&doomed);
        for etb in to_exit {
            cfg.create_edge(etb, exit, EdgeKind::ProcessExit)?;
        }
        cfg.check_integrity();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{Dataflow, DataflowConfig};
    use crate::hierarchy::{Hierarchy, LogLookupFailures};
    use crate::testing::{cfg_of, program, Failures};
    use crate::typing::{TypeAnalysis, TypeAnalysisConfig};
    use jf_bytecode::Addr;
    use std::rc::Rc;

    const SOURCE: &str = r#"
class java/io/IOException extends java/lang/Exception
end
class java/lang/IllegalStateException extends java/lang/RuntimeException
end
class Foo
  declares open()V throws java/io/IOException
  declares exit()V noreturn
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
method Foo.read()V static locals 1
  0: invokestatic Foo.open()V
  1: return
  2: astore 0
  3: return
  try 0 1 2 java/io/IOException
end
method Foo.stop()I static
  0: invokestatic Foo.exit()V
  1: iconst 0
  2: ireturn
end
method Foo.guarded()V static locals 1
  0: invokestatic Foo.exit()V
  1: return
  2: astore 0
  3: return
  try 0 1 2 any
end
method Foo.unknown()V static
  0: invokestatic Missing.exit()V
  1: return
end
"#;

    fn prune_infeasible(p: &jf_bytecode::Program, h: &Hierarchy, name: &str) -> Cfg {
        let cfg = Rc::new(cfg_of(p, name));
        let analysis = TypeAnalysis::new(
            p.get_method(name).unwrap(),
            h,
            &LogLookupFailures,
            TypeAnalysisConfig::default(),
        );
        let types = Dataflow::run(cfg, analysis, DataflowConfig::new()).unwrap();
        PruneInfeasibleExceptionEdges::new(&types).execute().unwrap()
    }

    #[test]
    fn infeasible_handler_edges() {
        let p = program(SOURCE);
        let h = Hierarchy::from_program(&p);
        let raw = cfg_of(&p, "Foo.fail()V");
        let pruned = prune_infeasible(&p, &h, "Foo.fail()V");
        assert_eq!(pruned.num_edges(), raw.num_edges() - 1);

        let etb = pruned
            .exception_thrower_block_of(pruned.block_containing(Addr(3))[0])
            .unwrap();
        let handler = pruned.block_containing(Addr(4))[0];
        assert!(raw.lookup_edge(etb, handler).is_some());
        assert!(pruned.lookup_edge(etb, handler).is_none());
        let unhandled = pruned.lookup_edge(etb, pruned.exit()).unwrap();
        assert_eq!(
            pruned.edge(unhandled).flags(),
            EdgeFlags::EXPLICIT_EXCEPTIONS
        );
    }

    #[test]
    fn checked_exception_edges_are_flagged() {
        let p = program(SOURCE);
        let h = Hierarchy::from_program(&p);
        let pruned = prune_infeasible(&p, &h, "Foo.read()V");
        let etb = pruned
            .exception_thrower_block_of(pruned.block_containing(Addr(0))[0])
            .unwrap();
        let handled = pruned
            .first_outgoing_edge_of_kind(etb, EdgeKind::HandledException)
            .unwrap();
        assert_eq!(pruned.edge(handled).flags(), EdgeFlags::all());
        // runtime exceptions and errors only
        let unhandled = pruned
            .first_outgoing_edge_of_kind(etb, EdgeKind::UnhandledException)
            .unwrap();
        assert!(pruned.edge(unhandled).flags().is_empty());
        assert_eq!(pruned.edge(handled).to_string(), "<catch>[checked][explicit]");
    }

    #[test]
    fn calls_that_never_return() {
        let p = program(SOURCE);
        let h = Hierarchy::from_program(&p);
        let pass = PruneUnconditionalExceptionThrowerEdges::new(&h, &LogLookupFailures);

        let mut cfg = cfg_of(&p, "Foo.stop()I");
        let etb = cfg
            .exception_thrower_block_of(cfg.block_containing(Addr(0))[0])
            .unwrap();
        assert_eq!(pass.execute(&mut cfg).unwrap(), 1);
        assert!(cfg.first_outgoing_edge_of_kind(etb, EdgeKind::FallThrough).is_none());
        // already linked to exit by its unhandled exception edge
        assert!(cfg.successor_by_kind(etb, EdgeKind::ProcessExit).is_none());
        let call = cfg.block_containing(Addr(0))[0];
        assert!(cfg.predecessors(call).is_empty());

        let mut cfg = cfg_of(&p, "Foo.guarded()V");
        let etb = cfg
            .exception_thrower_block_of(cfg.block_containing(Addr(0))[0])
            .unwrap();
        assert_eq!(pass.execute(&mut cfg).unwrap(), 1);
        assert_eq!(cfg.successor_by_kind(etb, EdgeKind::ProcessExit), Some(cfg.exit()));
    }

    #[test]
    fn unknown_callees_are_kept() {
        let p = program(SOURCE);
        let h = Hierarchy::from_program(&p);
        let failures = Failures::default();
        let pass = PruneUnconditionalExceptionThrowerEdges::new(&h, &failures);
        let mut cfg = cfg_of(&p, "Foo.unknown()V");
        let edges = cfg.num_edges();
        assert_eq!(pass.execute(&mut cfg).unwrap(), 0);
        assert_eq!(cfg.num_edges(), edges);
        assert_eq!(failures.classes(), vec!["Missing".to_string()]);
    }
}
