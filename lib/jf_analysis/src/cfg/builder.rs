use super::{BlockId, Cfg};
use crate::block::{BasicBlock, CatchType};
use crate::edge::{Edge, EdgeKind};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::graph::Graph;
use jf_bytecode::code::Code;
use jf_bytecode::instrs::{Instr, Instruction, LabeledInstr};
use jf_bytecode::methods::Method;
use jf_bytecode::Addr;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// Subroutines are inlined: every `jsr` call site gets its own context, and the
// blocks of a subroutine are duplicated per context. Context 0 is the method body.
struct Context {
    parent: Option<usize>,
    entry: Addr,
    continuation: Option<Addr>,
}

/// Builds the [`Cfg`] of a method from its bytecode.
pub struct CfgBuilder<'m> {
    method_name: String,
    code: &'m Code,
    leaders: BTreeSet<Addr>,
    graph: Graph<BasicBlock, Edge>,
    entry: BlockId,
    exit: BlockId,
    contexts: Vec<Context>,
    subroutines: BTreeMap<(usize, Addr), usize>,
    // first block reached at a leader, the exception thrower block when there is one
    heads: BTreeMap<(usize, Addr), BlockId>,
    worklist: VecDeque<(usize, Addr, BlockId)>,
}

impl<'m> CfgBuilder<'m> {
    /// Builds the control flow graph of a method.
    ///
    /// # Errors
    ///
    /// Fails when the method has no code, or when its bytecode is malformed: branch
    /// to a non-existent instruction, execution falling off the end of the code,
    /// recursive subroutine or `ret` outside of any subroutine.
    pub fn build(method: &'m Method) -> AnalysisResult<Cfg> {
        let method_name = method.full_name();
        log::debug!("building CFG of {method_name}");

        let code = method.code().ok_or(AnalysisError::NoCode)?;
        let first = code
            .iter_instructions()
            .next()
            .ok_or(AnalysisError::NoCode)?
            .addr();

        let mut graph = Graph::new();
        let entry = graph.allocate(BasicBlock::new());
        let exit = graph.allocate(BasicBlock::new());
        let mut builder = Self {
            method_name,
            code,
            leaders: compute_leaders(code)?,
            graph,
            entry,
            exit,
            contexts: vec![Context {
                parent: None,
                entry: first,
                continuation: None,
            }],
            subroutines: BTreeMap::new(),
            heads: BTreeMap::new(),
            worklist: VecDeque::new(),
        };

        let start = builder.block_at(0, first)?;
        builder.graph.create_edge(entry, start, Edge::new(EdgeKind::Start))?;
        while let Some((ctx, leader, block)) = builder.worklist.pop_front() {
            builder.fill_block(ctx, leader, block)?;
        }

        let cfg = Cfg {
            graph: builder.graph,
            entry,
            exit,
            method_name: builder.method_name,
            code: code.clone(),
        };
        cfg.check_integrity();
        log::debug!(
            "CFG of {}: {} blocks, {} edges, {} subroutine contexts",
            cfg.method_name,
            cfg.num_basic_blocks(),
            cfg.num_edges(),
            builder.contexts.len() - 1
        );
        Ok(cfg)
    }

    /// Returns the block reached when control enters `addr` in context `ctx`,
    /// creating it (and its exception thrower block) on first request.
    fn block_at(&mut self, ctx: usize, addr: Addr) -> AnalysisResult<BlockId> {
        if let Some(id) = self.heads.get(&(ctx, addr)) {
            return Ok(*id);
        }
        let linstr = self
            .code
            .instruction_at(addr)
            .map_err(|_| AnalysisError::InvalidBranchTarget(addr))?
            .clone();

        let block = self.graph.allocate(BasicBlock::new());
        if linstr.instr().can_throw() {
            let etb = self
                .graph
                .allocate(BasicBlock::exception_thrower_of(linstr));
            self.graph
                .create_edge(etb, block, Edge::new(EdgeKind::FallThrough))?;
            self.heads.insert((ctx, addr), etb);
            self.worklist.push_back((ctx, addr, block));
            self.add_exception_edges(ctx, etb, addr)?;
            Ok(etb)
        } else {
            self.heads.insert((ctx, addr), block);
            self.worklist.push_back((ctx, addr, block));
            Ok(block)
        }
    }

    fn add_exception_edges(&mut self, ctx: usize, etb: BlockId, addr: Addr) -> AnalysisResult<()> {
        let handlers: Vec<(Addr, CatchType)> = self
            .code
            .handlers_covering(addr)
            .map(|h| {
                let catch_type = h
                    .catch_type()
                    .map_or(CatchType::Any, |c| CatchType::Class(c.to_string()));
                (h.handler_addr(), catch_type)
            })
            .collect();

        let mut caught_all = false;
        for (handler, catch_type) in handlers {
            let target = self.block_at(ctx, handler)?;
            let any = catch_type == CatchType::Any;
            self.graph[target].mark_handler(catch_type);
            self.unique_edge(etb, target, EdgeKind::HandledException)?;
            if any {
                caught_all = true;
                break;
            }
        }
        if !caught_all {
            self.graph
                .create_edge(etb, self.exit, Edge::new(EdgeKind::UnhandledException))?;
        }
        Ok(())
    }

    fn fill_block(&mut self, ctx: usize, leader: Addr, block: BlockId) -> AnalysisResult<()> {
        let mut addr = leader;
        loop {
            let linstr = self.code.instruction_at(addr)?.clone();
            self.graph[block].push(linstr.clone());
            if linstr.instr().ends_block() {
                return self.add_branch_edges(ctx, block, &linstr);
            }
            let next = self
                .code
                .next_addr(addr)
                .ok_or(AnalysisError::FallsOffCode(addr))?;
            if self.leaders.contains(&next) {
                let target = self.block_at(ctx, next)?;
                self.unique_edge(block, target, EdgeKind::FallThrough)?;
                return Ok(());
            }
            addr = next;
        }
    }

    fn add_branch_edges(&mut self, ctx: usize, block: BlockId, linstr: &LabeledInstr) -> AnalysisResult<()> {
        let instr = linstr.instr();
        match instr {
            // exception edges hang off the thrower block
            Instr::Athrow => Ok(()),
            Instr::Goto(target) => {
                let target = self.block_at(ctx, *target)?;
                self.unique_edge(block, target, EdgeKind::Goto)
            }
            Instr::Jsr(target) => {
                let sub = self.subroutine_context(ctx, linstr.addr(), *target)?;
                let target = self.block_at(sub, *target)?;
                self.unique_edge(block, target, EdgeKind::Jsr)
            }
            Instr::Ret(_) => {
                let context = &self.contexts[ctx];
                let (parent, continuation) = match (context.parent, context.continuation) {
                    (Some(parent), Some(continuation)) => (parent, continuation),
                    _ => {
                        return Err(AnalysisError::MalformedSubroutine(format!(
                            "ret outside of any subroutine at {}",
                            linstr.addr()
                        )))
                    }
                };
                let target = self.block_at(parent, continuation)?;
                self.unique_edge(block, target, EdgeKind::Ret)
            }
            Instr::TableSwitch(_, targets, default) => {
                for target in targets {
                    let target = self.block_at(ctx, *target)?;
                    self.unique_edge(block, target, EdgeKind::Switch)?;
                }
                let default = self.block_at(ctx, *default)?;
                self.unique_edge(block, default, EdgeKind::SwitchDefault)
            }
            Instr::LookupSwitch(pairs, default) => {
                for (_, target) in pairs {
                    let target = self.block_at(ctx, *target)?;
                    self.unique_edge(block, target, EdgeKind::Switch)?;
                }
                let default = self.block_at(ctx, *default)?;
                self.unique_edge(block, default, EdgeKind::SwitchDefault)
            }
            _ if instr.is_return() => self.unique_edge(block, self.exit, EdgeKind::Return),
            _ if instr.is_conditional_branch() => {
                for target in instr.branch_targets() {
                    let target = self.block_at(ctx, target)?;
                    self.unique_edge(block, target, EdgeKind::IfTrue)?;
                }
                let next = self
                    .code
                    .next_addr(linstr.addr())
                    .ok_or_else(|| AnalysisError::FallsOffCode(linstr.addr()))?;
                let next = self.block_at(ctx, next)?;
                self.unique_edge(block, next, EdgeKind::FallThrough)
            }
            _ => Err(AnalysisError::Internal(format!(
                "unexpected end of block at {linstr}"
            ))),
        }
    }

    /// Context of the subroutine called by the `jsr` at `call_site` from context `ctx`.
    fn subroutine_context(&mut self, ctx: usize, call_site: Addr, target: Addr) -> AnalysisResult<usize> {
        if let Some(id) = self.subroutines.get(&(ctx, call_site)) {
            return Ok(*id);
        }
        let mut current = Some(ctx);
        while let Some(c) = current {
            if c != 0 && self.contexts[c].entry == target {
                return Err(AnalysisError::MalformedSubroutine(format!(
                    "recursive call to subroutine {target} at {call_site}"
                )));
            }
            current = self.contexts[c].parent;
        }
        let continuation = self
            .code
            .next_addr(call_site)
            .ok_or(AnalysisError::FallsOffCode(call_site))?;

        let id = self.contexts.len();
        self.contexts.push(Context {
            parent: Some(ctx),
            entry: target,
            continuation: Some(continuation),
        });
        self.subroutines.insert((ctx, call_site), id);
        log::trace!("{}: inlining subroutine {target} called at {call_site}", self.method_name);
        Ok(id)
    }

    /// Creates an edge unless the blocks are already linked, as happens with a branch
    /// to the next instruction or switch cases sharing a target.
    fn unique_edge(&mut self, source: BlockId, target: BlockId, kind: EdgeKind) -> AnalysisResult<()> {
        if self.graph.lookup_edge(source, target).is_none() {
            self.graph.create_edge(source, target, Edge::new(kind))?;
        }
        Ok(())
    }
}

fn compute_leaders(code: &Code) -> AnalysisResult<BTreeSet<Addr>> {
    let mut leaders = BTreeSet::new();
    for linstr in code.iter_instructions() {
        let instr = linstr.instr();
        for target in instr.branch_targets() {
            if code.position_of(target).is_none() {
                return Err(AnalysisError::InvalidBranchTarget(target));
            }
            leaders.insert(target);
        }
        if instr.ends_block() {
            if let Some(next) = code.next_addr(linstr.addr()) {
                leaders.insert(next);
            }
        }
        if instr.can_throw() {
            leaders.insert(linstr.addr());
        }
    }
    for handler in code.iter_handlers() {
        leaders.insert(handler.start_addr());
        leaders.insert(handler.end_addr());
        leaders.insert(handler.handler_addr());
    }
    Ok(leaders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::program;

    fn build(source: &str) -> AnalysisResult<Cfg> {
        let p = program(source);
        let method = p.iter_methods().next().unwrap();
        CfgBuilder::build(method)
    }

    #[test]
    fn malformed_code() {
        assert!(matches!(
            build("method Foo.f()V static\n  0: iconst 0\n  1: pop\nend"),
            Err(AnalysisError::FallsOffCode(Addr(1)))
        ));
        assert!(matches!(
            build("method Foo.f()V static abstract\nend"),
            Err(AnalysisError::NoCode)
        ));
        assert!(matches!(
            build("method Foo.f()V static locals 1\n  0: astore 0\n  1: ret 0\nend"),
            Err(AnalysisError::MalformedSubroutine(_))
        ));
        assert!(matches!(
            build("method Foo.f()V static locals 1\n  0: jsr 1\n  1: jsr 1\nend"),
            Err(AnalysisError::MalformedSubroutine(_))
        ));
    }

    #[test]
    fn handler_priority() {
        let cfg = build(
            r#"
method Foo.f(II)I static locals 3
  0: iload 0
  1: iload 1
  2: idiv
  3: ireturn
  4: astore 2
  5: iconst 1
  6: ireturn
  7: astore 2
  8: iconst 2
  9: ireturn
  try 2 3 4 java/lang/ArithmeticException
  try 2 3 7 java/lang/RuntimeException
end
"#,
        )
        .unwrap();
        let idiv = cfg.block_containing(Addr(2))[0];
        let etb = cfg.exception_thrower_block_of(idiv).unwrap();
        let targets: Vec<(EdgeKind, Option<Addr>)> = cfg
            .outgoing_edges(etb)
            .into_iter()
            .map(|e| (cfg.edge(e).kind(), cfg.block(cfg.target(e)).start_addr()))
            .collect();
        assert_eq!(
            targets,
            vec![
                (EdgeKind::FallThrough, Some(Addr(2))),
                (EdgeKind::HandledException, Some(Addr(4))),
                (EdgeKind::HandledException, Some(Addr(7))),
                (EdgeKind::UnhandledException, None),
            ]
        );
        let handler = cfg.successor_by_kind(etb, EdgeKind::HandledException).unwrap();
        assert_eq!(
            cfg.block(handler).catch_type(),
            Some(&CatchType::Class("java/lang/ArithmeticException".to_string()))
        );
    }
}
