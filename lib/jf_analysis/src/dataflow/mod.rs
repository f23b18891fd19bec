//! Dataflow analysis framework.
//!
//! A concrete analysis implements [`Analysis`] (its lattice and transfer functions),
//! and the generic [`Dataflow`] solver iterates it to a fixed point over a [`Cfg`].

mod engine;
mod printer;

pub use engine::{Dataflow, DataflowConfig};
pub use printer::{Annotator, DataflowPrinter, FactAnnotator};

use crate::cfg::{BlockId, Cfg, EdgeId};
use crate::errors::AnalysisResult;
use crate::location::Location;
use crate::order::BlockOrder;
use jf_bytecode::instrs::LabeledInstr;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    #[inline]
    #[must_use]
    pub const fn is_forward(self) -> bool {
        matches!(self, Self::Forward)
    }
}

/// The contract every dataflow analysis implements.
///
/// Facts are elements of a lattice with a top element (identity of the meet, the
/// value of not yet computed facts) and an optional bottom element (absorbing).
/// Each block owns a *start* fact, at its logical entry (before the block for
/// forward analyses, after it for backward ones) and a *result* fact at its
/// logical exit.
pub trait Analysis {
    type Fact: Clone + fmt::Debug;

    /// Analysis name, for logs and error reports.
    fn name(&self) -> &'static str;

    fn direction(&self) -> Direction;

    /// Creates an uninitialized fact.
    fn create_fact(&self) -> Self::Fact;

    fn make_top(&self, fact: &mut Self::Fact);

    fn is_top(&self, fact: &Self::Fact) -> bool;

    fn is_bottom(&self, _fact: &Self::Fact) -> bool {
        false
    }

    /// Instruction transfer functions are only applied on valid facts.
    fn is_fact_valid(&self, fact: &Self::Fact) -> bool {
        !self.is_top(fact) && !self.is_bottom(fact)
    }

    /// Equality test used to detect convergence.
    fn same(&self, fact1: &Self::Fact, fact2: &Self::Fact) -> bool;

    fn copy(&self, source: &Self::Fact, dest: &mut Self::Fact) {
        dest.clone_from(source);
    }

    /// Initializes the fact at the logical entry of the method.
    ///
    /// # Errors
    ///
    /// Fails when no meaningful initial fact can be computed for the method.
    fn init_entry_fact(&self, cfg: &Cfg, fact: &mut Self::Fact) -> AnalysisResult<()>;

    fn init_result_fact(&self, fact: &mut Self::Fact) {
        self.make_top(fact);
    }

    /// Merges the fact flowing along an edge into the start fact of a block.
    ///
    /// # Errors
    ///
    /// Fails when the two facts cannot be combined.
    fn meet_into(
        &self,
        cfg: &Cfg,
        edge: EdgeId,
        fact: &Self::Fact,
        result: &mut Self::Fact,
    ) -> AnalysisResult<()>;

    /// Adjusts a predecessor's result fact before it is merged through an edge.
    ///
    /// # Errors
    ///
    /// Fails when the fact cannot flow along the edge.
    fn edge_transfer(&self, _cfg: &Cfg, _edge: EdgeId, _fact: &mut Self::Fact) -> AnalysisResult<()> {
        Ok(())
    }

    /// Applies the effect of one instruction.
    ///
    /// # Errors
    ///
    /// Fails when the instruction cannot be modeled on the fact (stack underflow,
    /// missing class, ...).
    fn transfer_instruction(
        &self,
        cfg: &Cfg,
        location: Location,
        linstr: &LabeledInstr,
        fact: &mut Self::Fact,
    ) -> AnalysisResult<()>;

    /// Computes the result fact of a block from its start fact, folding the
    /// instructions in the analysis direction. Nothing is folded when the start
    /// fact is not valid.
    ///
    /// # Errors
    ///
    /// Fails when an instruction transfer fails.
    fn transfer(
        &self,
        cfg: &Cfg,
        block: BlockId,
        start: &Self::Fact,
        result: &mut Self::Fact,
    ) -> AnalysisResult<()> {
        self.copy(start, result);
        if !self.is_fact_valid(result) {
            return Ok(());
        }
        let bb = cfg.block(block);
        let mut positions: Vec<usize> = (0..bb.len()).collect();
        if !self.direction().is_forward() {
            positions.reverse();
        }
        for position in positions {
            if let Some(linstr) = bb.instruction(position) {
                let location = Location::new(block, position, linstr.addr());
                log::trace!("{}: transfer {linstr} at {location}", self.name());
                self.transfer_instruction(cfg, location, linstr, result)?;
            }
        }
        Ok(())
    }

    /// Order in which blocks are visited at each iteration.
    fn block_order(&self, cfg: &Cfg) -> BlockOrder {
        match self.direction() {
            Direction::Forward => BlockOrder::forward(cfg),
            Direction::Backward => BlockOrder::backward(cfg),
        }
    }

    /// Called by the solver whenever the result fact of a block changes.
    fn on_result_changed(&mut self, _cfg: &Cfg, _block: BlockId, _fact: &Self::Fact) {}
}
