//! Dominators and post-dominators.

use crate::cfg::{BlockId, Cfg, EdgeId};
use crate::dataflow::{Analysis, Dataflow, DataflowConfig, Direction};
use crate::errors::AnalysisResult;
use crate::location::Location;
use fixedbitset::FixedBitSet;
use jf_bytecode::instrs::LabeledInstr;
use petgraph::graph::NodeIndex;
use std::fmt;
use std::rc::Rc;

/// Selects the edges taken into account by the dominance computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeChooser {
    All,
    /// Ignores exception edges, for "normal" control flow dominance.
    NonException,
}

impl EdgeChooser {
    fn choose(self, cfg: &Cfg, edge: EdgeId) -> bool {
        match self {
            Self::All => true,
            Self::NonException => !cfg.edge(edge).is_exception_edge(),
        }
    }
}

/// Set of blocks, as block ids. The extra bit past the block ids marks the top fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSet(FixedBitSet);

impl BlockSet {
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        block.index() + 1 < self.0.len() && self.0.contains(block.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        let top = self.0.len() - 1;
        self.0
            .ones()
            .filter(move |i| *i != top)
            .map(NodeIndex::new)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl fmt::Display for BlockSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.contains(self.0.len() - 1) {
            return write!(f, "TOP");
        }
        write!(f, "{{")?;
        for (i, b) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "B{}", b.index())?;
        }
        write!(f, "}}")
    }
}

/// Bitset analysis computing, for every block, the set of blocks dominating it
/// (forward) or post-dominating it (backward). Every block dominates itself.
#[derive(Debug, Clone)]
pub struct DominatorsAnalysis {
    direction: Direction,
    chooser: EdgeChooser,
    num_bits: usize,
}

impl DominatorsAnalysis {
    #[must_use]
    pub fn dominators(cfg: &Cfg, chooser: EdgeChooser) -> Self {
        Self {
            direction: Direction::Forward,
            chooser,
            num_bits: cfg.block_bound() + 1,
        }
    }

    #[must_use]
    pub fn post_dominators(cfg: &Cfg, chooser: EdgeChooser) -> Self {
        Self {
            direction: Direction::Backward,
            chooser,
            num_bits: cfg.block_bound() + 1,
        }
    }

    const fn top_bit(&self) -> usize {
        self.num_bits - 1
    }
}

impl Analysis for DominatorsAnalysis {
    type Fact = BlockSet;

    fn name(&self) -> &'static str {
        match self.direction {
            Direction::Forward => "dominators",
            Direction::Backward => "post-dominators",
        }
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn create_fact(&self) -> BlockSet {
        BlockSet(FixedBitSet::with_capacity(self.num_bits))
    }

    fn make_top(&self, fact: &mut BlockSet) {
        fact.0.clear();
        fact.0.insert(self.top_bit());
    }

    fn is_top(&self, fact: &BlockSet) -> bool {
        fact.0.contains(self.top_bit())
    }

    fn same(&self, fact1: &BlockSet, fact2: &BlockSet) -> bool {
        fact1 == fact2
    }

    fn init_entry_fact(&self, _cfg: &Cfg, fact: &mut BlockSet) -> AnalysisResult<()> {
        fact.0.clear();
        Ok(())
    }

    fn meet_into(
        &self,
        cfg: &Cfg,
        edge: EdgeId,
        fact: &BlockSet,
        result: &mut BlockSet,
    ) -> AnalysisResult<()> {
        if !self.chooser.choose(cfg, edge) || self.is_top(fact) {
            return Ok(());
        }
        if self.is_top(result) {
            self.copy(fact, result);
        } else {
            result.0.intersect_with(&fact.0);
        }
        Ok(())
    }

    fn transfer_instruction(
        &self,
        _cfg: &Cfg,
        _location: Location,
        _linstr: &LabeledInstr,
        _fact: &mut BlockSet,
    ) -> AnalysisResult<()> {
        Ok(())
    }

    fn transfer(
        &self,
        _cfg: &Cfg,
        block: BlockId,
        start: &BlockSet,
        result: &mut BlockSet,
    ) -> AnalysisResult<()> {
        self.copy(start, result);
        if !self.is_top(result) {
            result.0.insert(block.index());
        }
        Ok(())
    }
}

/// Result of a dominators or post-dominators analysis.
pub struct Dominators {
    dataflow: Dataflow<DominatorsAnalysis>,
}

impl Dominators {
    /// Computes the dominators of every block.
    ///
    /// # Errors
    ///
    /// Fails when the solver does not converge.
    pub fn dominators(cfg: Rc<Cfg>, chooser: EdgeChooser, config: DataflowConfig) -> AnalysisResult<Self> {
        let analysis = DominatorsAnalysis::dominators(&cfg, chooser);
        Ok(Self {
            dataflow: Dataflow::run(cfg, analysis, config)?,
        })
    }

    /// Computes the post-dominators of every block.
    ///
    /// # Errors
    ///
    /// Fails when the solver does not converge.
    pub fn post_dominators(cfg: Rc<Cfg>, chooser: EdgeChooser, config: DataflowConfig) -> AnalysisResult<Self> {
        let analysis = DominatorsAnalysis::post_dominators(&cfg, chooser);
        Ok(Self {
            dataflow: Dataflow::run(cfg, analysis, config)?,
        })
    }

    #[inline]
    #[must_use]
    pub const fn dataflow(&self) -> &Dataflow<DominatorsAnalysis> {
        &self.dataflow
    }

    /// Blocks (post-)dominating a block, the block included. Top for blocks not
    /// connected to the entry (exit for post-dominators).
    #[must_use]
    pub fn dominators_of(&self, block: BlockId) -> &BlockSet {
        self.dataflow.result_fact(block)
    }

    /// Blocks (post-)dominated by a block, the block included.
    #[must_use]
    pub fn all_dominated_by(&self, dominator: BlockId) -> Vec<BlockId> {
        self.dataflow
            .result_facts()
            .filter(|(_, fact)| !self.dataflow.analysis().is_top(fact) && fact.contains(dominator))
            .map(|(b, _)| b)
            .collect()
    }

    #[must_use]
    pub fn dominates(&self, dominator: BlockId, block: BlockId) -> bool {
        let fact = self.dominators_of(block);
        !self.dataflow.analysis().is_top(fact) && fact.contains(dominator)
    }
}
