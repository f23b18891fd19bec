//! Control flow graph representation.

mod builder;

pub use builder::CfgBuilder;

use crate::block::BasicBlock;
use crate::edge::{Edge, EdgeFlags, EdgeKind};
use crate::errors::AnalysisResult;
use crate::graph::{Graph, VertexId};
use crate::location::Location;
use jf_bytecode::code::Code;
use jf_bytecode::instrs::LabeledInstr;
use jf_bytecode::Addr;
use petgraph::dot::{Config, Dot};
use petgraph::stable_graph::StableDiGraph;
use std::collections::BTreeSet;
use std::fmt;

pub use crate::graph::EdgeId;

pub type BlockId = VertexId;

/// The control flow graph of one method.
///
/// Entry and exit are empty sentinel blocks allocated up front: the entry block has a
/// single [`EdgeKind::Start`] edge to the first instruction, and every return or
/// escaping exception reaches the exit block.
#[derive(Debug, Clone)]
pub struct Cfg {
    graph: Graph<BasicBlock, Edge>,
    entry: BlockId,
    exit: BlockId,
    method_name: String,
    code: Code,
}

impl Cfg {
    #[inline]
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        self.entry
    }

    #[inline]
    #[must_use]
    pub const fn exit(&self) -> BlockId {
        self.exit
    }

    #[inline]
    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// The method body the graph was built from.
    #[inline]
    #[must_use]
    pub const fn code(&self) -> &Code {
        &self.code
    }

    pub(crate) const fn graph(&self) -> &StableDiGraph<BasicBlock, Edge> {
        self.graph.inner()
    }

    #[inline]
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.graph[id]
    }

    #[inline]
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.graph[id]
    }

    #[inline]
    #[must_use]
    pub fn source(&self, edge: EdgeId) -> BlockId {
        self.graph.endpoints(edge).0
    }

    #[inline]
    #[must_use]
    pub fn target(&self, edge: EdgeId) -> BlockId {
        self.graph.endpoints(edge).1
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.graph.vertices()
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.graph.edges()
    }

    #[must_use]
    pub fn incoming_edges(&self, block: BlockId) -> Vec<EdgeId> {
        self.graph.incoming_edges(block)
    }

    /// Outgoing edges in creation order. Handled exception edges of a block are
    /// created in handler priority order.
    #[must_use]
    pub fn outgoing_edges(&self, block: BlockId) -> Vec<EdgeId> {
        self.graph.outgoing_edges(block)
    }

    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.graph.successors(block)
    }

    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.graph.predecessors(block)
    }

    #[must_use]
    pub fn lookup_edge(&self, source: BlockId, target: BlockId) -> Option<EdgeId> {
        self.graph.lookup_edge(source, target)
    }

    #[must_use]
    pub fn contains_edge(&self, edge: EdgeId) -> bool {
        self.graph.contains_edge(edge)
    }

    #[must_use]
    pub fn num_basic_blocks(&self) -> usize {
        self.graph.num_vertices()
    }

    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.graph.num_edges()
    }

    /// Upper bound of block ids, to size arrays indexed by block.
    #[must_use]
    pub fn block_bound(&self) -> usize {
        self.graph.vertex_bound()
    }

    #[must_use]
    pub fn first_outgoing_edge_of_kind(&self, block: BlockId, kind: EdgeKind) -> Option<EdgeId> {
        self.outgoing_edges(block)
            .into_iter()
            .find(|e| self.edge(*e).kind() == kind)
    }

    #[must_use]
    pub fn successor_by_kind(&self, block: BlockId, kind: EdgeKind) -> Option<BlockId> {
        self.first_outgoing_edge_of_kind(block, kind)
            .map(|e| self.target(e))
    }

    /// All the blocks holding an instruction. Inlined subroutines may duplicate an
    /// instruction into several blocks.
    #[must_use]
    pub fn block_containing(&self, addr: Addr) -> Vec<BlockId> {
        self.blocks()
            .filter(|b| self.block(*b).contains(addr))
            .collect()
    }

    #[must_use]
    pub fn is_exception_thrower(&self, block: BlockId) -> bool {
        self.block(block).is_exception_thrower()
    }

    /// The exception thrower block preceding a block whose first instruction can throw.
    #[must_use]
    pub fn exception_thrower_block_of(&self, block: BlockId) -> Option<BlockId> {
        self.predecessors(block)
            .into_iter()
            .find(|p| self.is_exception_thrower(*p))
    }

    /// Every (block, instruction) pair of the graph, empty blocks contributing nothing.
    pub fn locations(&self) -> impl Iterator<Item = Location> + '_ {
        self.blocks().flat_map(move |b| {
            self.block(b)
                .instructions()
                .enumerate()
                .map(move |(i, linstr)| Location::new(b, i, linstr.addr()))
        })
    }

    #[must_use]
    pub fn location_of(&self, block: BlockId, addr: Addr) -> Option<Location> {
        self.block(block)
            .position_of(addr)
            .map(|i| Location::new(block, i, addr))
    }

    #[must_use]
    pub fn instruction_at(&self, location: Location) -> Option<&LabeledInstr> {
        self.block(location.block()).instruction(location.position())
    }

    pub(crate) fn create_edge(
        &mut self,
        source: BlockId,
        target: BlockId,
        kind: EdgeKind,
    ) -> AnalysisResult<EdgeId> {
        self.graph.create_edge(source, target, Edge::new(kind))
    }

    pub(crate) fn remove_edges(&mut self, edges: &BTreeSet<EdgeId>) -> usize {
        self.graph.remove_edges(edges)
    }

    pub(crate) fn set_edge_flags(&mut self, edge: EdgeId, flags: EdgeFlags) {
        self.graph[edge].set_flags(flags);
    }

    /// Verifies that the instructions of every block are contiguous in the bytecode
    /// stream, and that sentinel and thrower blocks are empty.
    ///
    /// # Panics
    ///
    /// Panics on violation, which can only result from a construction bug.
    pub fn check_integrity(&self) {
        for id in self.blocks() {
            let block = self.block(id);
            if id == self.entry || id == self.exit || block.is_exception_thrower() {
                assert!(
                    block.is_empty(),
                    "{}: B{} should be empty",
                    self.method_name,
                    id.index()
                );
            }
            let instrs: Vec<&LabeledInstr> = block.instructions().collect();
            for pair in instrs.windows(2) {
                assert_eq!(
                    self.code.next_addr(pair[0].addr()),
                    Some(pair[1].addr()),
                    "{}: non-contiguous instructions in B{}",
                    self.method_name,
                    id.index()
                );
            }
        }
        assert!(
            self.outgoing_edges(self.exit).is_empty(),
            "{}: exit block has successors",
            self.method_name
        );
    }

    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut res = String::new();
        res.push_str("digraph {\n");
        res.push_str("  nodesep=1;\n");
        res.push_str(&format!(
            "{}",
            Dot::with_attr_getters(
                self.graph(),
                &[Config::GraphContentOnly, Config::EdgeNoLabel],
                &|_, edge| {
                    let color = match edge.weight().kind() {
                        EdgeKind::IfTrue => "green",
                        EdgeKind::Switch | EdgeKind::SwitchDefault => "purple",
                        EdgeKind::Goto => "blue",
                        EdgeKind::Jsr | EdgeKind::Ret => "brown",
                        EdgeKind::HandledException | EdgeKind::UnhandledException => "orchid",
                        EdgeKind::Start
                        | EdgeKind::BackEdgeSource
                        | EdgeKind::BackEdgeTarget
                        | EdgeKind::ProcessExit => "gray",
                        EdgeKind::FallThrough | EdgeKind::Return => "black",
                    };
                    format!("color={},xlabel=\"{}\"", color, edge.weight())
                },
                &|_, (_, block)| if block.is_exception_thrower() {
                    String::from("shape=box,color=orchid")
                } else {
                    String::from("shape=box,color=black")
                }
            )
        ));
        res.push('}');
        res
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.method_name)?;
        for id in self.blocks() {
            let marker = if id == self.entry {
                " (entry)"
            } else if id == self.exit {
                " (exit)"
            } else {
                ""
            };
            writeln!(f, "  B{}{marker}:", id.index())?;
            for line in format!("{}", self.block(id)).lines() {
                writeln!(f, "      {line}")?;
            }
            for e in self.outgoing_edges(id) {
                writeln!(f, "    -> B{} {}", self.target(e).index(), self.edge(e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cfg_of, program};

    const METHODS: &str = r#"
method Foo.branch(I)I static locals 1
  0: iload 0
  1: ifeq 4
  2: iconst 1
  3: goto 5
  4: iconst 2
  5: ireturn
end
method Foo.degenerate(I)V static locals 1
  0: iload 0
  1: ifeq 2
  2: iload 0
  3: tableswitch 0 5 5 default 6
  5: return
  6: return
end
method Foo.guarded(II)I static locals 3
  0: iload 0
  1: iload 1
  2: idiv
  3: ireturn
  4: astore 2
  5: iconst 0
  6: ireturn
  try 0 4 4 java/lang/ArithmeticException
  try 0 4 4 any
end
method Foo.subroutines()V static locals 2
  0: iconst 1
  1: jsr 5
  2: pop
  3: jsr 5
  4: return
  5: astore 1
  6: ret 1
end
"#;

    #[test]
    fn branches() {
        let p = program(METHODS);
        let cfg = cfg_of(&p, "Foo.branch(I)I");
        // entry, exit, [0-1], [2-3], [4], [5]
        assert_eq!(cfg.num_basic_blocks(), 6);
        let first = cfg.successor_by_kind(cfg.entry(), EdgeKind::Start).unwrap();
        assert_eq!(cfg.block(first).len(), 2);
        let taken = cfg.successor_by_kind(first, EdgeKind::IfTrue).unwrap();
        assert_eq!(cfg.block(taken).start_addr(), Some(Addr(4)));
        let not_taken = cfg.successor_by_kind(first, EdgeKind::FallThrough).unwrap();
        let join = cfg.successor_by_kind(not_taken, EdgeKind::Goto).unwrap();
        assert_eq!(cfg.successor_by_kind(join, EdgeKind::Return), Some(cfg.exit()));
        assert_eq!(cfg.locations().count(), 6);
        cfg.check_integrity();
    }

    #[test]
    fn degenerate_branches_are_collapsed() {
        let p = program(METHODS);
        let cfg = cfg_of(&p, "Foo.degenerate(I)V");
        let first = cfg.successor_by_kind(cfg.entry(), EdgeKind::Start).unwrap();
        assert_eq!(cfg.outgoing_edges(first).len(), 1);
        let switch = cfg.successors(first)[0];
        let kinds: Vec<EdgeKind> = cfg
            .outgoing_edges(switch)
            .into_iter()
            .map(|e| cfg.edge(e).kind())
            .collect();
        assert_eq!(kinds, vec![EdgeKind::Switch, EdgeKind::SwitchDefault]);
    }

    #[test]
    fn exception_thrower_blocks() {
        let p = program(METHODS);
        let cfg = cfg_of(&p, "Foo.guarded(II)I");
        let idiv = cfg.block_containing(Addr(2));
        assert_eq!(idiv.len(), 1);
        let etb = cfg.exception_thrower_block_of(idiv[0]).unwrap();
        assert!(cfg.block(etb).is_empty());
        assert_eq!(cfg.block(etb).exception_thrower().unwrap().addr(), Addr(2));

        // both handlers share the same target: a single edge, and no unhandled
        // edge since a catch-all handler covers the instruction
        let out = cfg.outgoing_edges(etb);
        let kinds: Vec<EdgeKind> = out.iter().map(|e| cfg.edge(*e).kind()).collect();
        assert_eq!(kinds, vec![EdgeKind::FallThrough, EdgeKind::HandledException]);
        let handler = cfg.target(out[1]);
        assert_eq!(
            cfg.block(handler).catch_type(),
            Some(&crate::block::CatchType::Any)
        );
        cfg.check_integrity();
    }

    #[test]
    fn subroutines_are_inlined_per_call_site() {
        let p = program(METHODS);
        let cfg = cfg_of(&p, "Foo.subroutines()V");
        let copies = cfg.block_containing(Addr(5));
        assert_eq!(copies.len(), 2);
        let l1 = cfg.location_of(copies[0], Addr(5)).unwrap();
        let l2 = cfg.location_of(copies[1], Addr(5)).unwrap();
        assert_eq!(l1.addr(), l2.addr());
        assert_ne!(l1, l2);
        assert_eq!(l1, cfg.location_of(copies[0], Addr(5)).unwrap());
        for copy in copies {
            let ret = cfg.successor_by_kind(copy, EdgeKind::Ret).unwrap();
            assert!(!cfg.block(ret).is_empty());
        }
        assert!(cfg.to_dot().starts_with("digraph {"));
    }
}
