use super::{Analysis, Direction};
use crate::cfg::{BlockId, Cfg, EdgeId};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::location::Location;
use crate::order::BlockOrder;
use lazy_static::lazy_static;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

lazy_static! {
    static ref DEFAULT_MAX_ITERATIONS: usize = std::env::var("JF_MAX_ITERATIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10_000);
}

/// Solver configuration.
#[derive(Debug, Clone)]
pub struct DataflowConfig {
    max_iterations: usize,
    skip_unchanged_blocks: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for DataflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: *DEFAULT_MAX_ITERATIONS,
            skip_unchanged_blocks: true,
            cancel: None,
        }
    }
}

impl DataflowConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of solver iterations after which the analysis is declared divergent.
    #[must_use]
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Whether blocks whose predecessors did not change since the last visit are
    /// skipped. Disabling it recomputes every block at every iteration.
    #[must_use]
    pub fn skip_unchanged_blocks(mut self, skip: bool) -> Self {
        self.skip_unchanged_blocks = skip;
        self
    }

    /// Flag checked before each iteration; the run fails with
    /// [`AnalysisError::Cancelled`] once it is set.
    #[must_use]
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

/// A dataflow analysis run over one CFG.
///
/// Start and result facts are stored in arrays indexed by block id. Every change of
/// a result fact bumps a global timestamp and stamps the block, so that blocks none
/// of whose predecessors changed since their last visit can be skipped.
pub struct Dataflow<A: Analysis> {
    cfg: Rc<Cfg>,
    analysis: A,
    config: DataflowConfig,
    start_facts: Vec<A::Fact>,
    result_facts: Vec<A::Fact>,
    result_stamps: Vec<u64>,
    // timestamp at which the start fact was last computed
    start_stamps: Vec<Option<u64>>,
    timestamp: u64,
    iterations: usize,
}

impl<A: Analysis> Dataflow<A> {
    pub fn new(cfg: Rc<Cfg>, analysis: A, config: DataflowConfig) -> Self {
        let bound = cfg.block_bound();
        let mut start_facts = Vec::with_capacity(bound);
        let mut result_facts = Vec::with_capacity(bound);
        let logical_entry = logical_entry(&cfg, analysis.direction());

        for id in 0..bound {
            let mut start = analysis.create_fact();
            analysis.make_top(&mut start);
            start_facts.push(start);

            let mut result = analysis.create_fact();
            if id == logical_entry.index() {
                if let Err(err) = analysis.init_entry_fact(&cfg, &mut result) {
                    log::warn!(
                        "{}: cannot initialize entry fact of {}: {err}",
                        analysis.name(),
                        cfg.method_name()
                    );
                    analysis.init_result_fact(&mut result);
                }
            } else {
                analysis.init_result_fact(&mut result);
            }
            result_facts.push(result);
        }

        Self {
            cfg,
            analysis,
            config,
            start_facts,
            result_facts,
            result_stamps: vec![0; bound],
            start_stamps: vec![None; bound],
            timestamp: 0,
            iterations: 0,
        }
    }

    /// Creates and runs an analysis until it reaches its fixed point.
    ///
    /// # Errors
    ///
    /// See [`Dataflow::execute`].
    pub fn run(cfg: Rc<Cfg>, analysis: A, config: DataflowConfig) -> AnalysisResult<Self> {
        let mut dataflow = Self::new(cfg, analysis, config);
        dataflow.execute()?;
        Ok(dataflow)
    }

    /// Iterates the analysis until no result fact changes anymore.
    ///
    /// # Errors
    ///
    /// Propagates transfer failures, and fails when the iteration cap is exceeded
    /// or the run is cancelled.
    pub fn execute(&mut self) -> AnalysisResult<()> {
        let order = self.analysis.block_order(&self.cfg);
        log::debug!(
            "{}: analyzing {} ({} blocks)",
            self.analysis.name(),
            self.cfg.method_name(),
            order.len()
        );
        loop {
            if self.config.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            self.iterations += 1;
            if self.iterations > self.config.max_iterations {
                log::error!(
                    "{}: no fixed point after {} iterations on {}",
                    self.analysis.name(),
                    self.config.max_iterations,
                    self.cfg.method_name()
                );
                return Err(AnalysisError::MaxIterations {
                    analysis: self.analysis.name().to_string(),
                    method: self.cfg.method_name().to_string(),
                    iterations: self.config.max_iterations,
                });
            }
            let changed = self.iterate(&order)?;
            log::debug!(
                "{}: iteration {} on {}, {changed} block(s) changed",
                self.analysis.name(),
                self.iterations,
                self.cfg.method_name()
            );
            if changed == 0 {
                return Ok(());
            }
        }
    }

    /// One pass over all the blocks, returns the number of changed result facts.
    fn iterate(&mut self, order: &BlockOrder) -> AnalysisResult<usize> {
        let direction = self.analysis.direction();
        let entry = logical_entry(&self.cfg, direction);
        let mut changed = 0;

        for block in order.iter() {
            let b = block.index();
            if block == entry {
                let start = &mut self.start_facts[b];
                self.analysis.make_top(start);
                self.analysis.init_entry_fact(&self.cfg, start)?;
            } else {
                let edges = logical_predecessor_edges(&self.cfg, direction, block);
                if !self.needs_update(block, &edges) {
                    continue;
                }
                let mut start = self.analysis.create_fact();
                self.analysis.make_top(&mut start);
                for edge in edges {
                    let pred = logical_predecessor(&self.cfg, direction, edge);
                    let mut fact = self.analysis.create_fact();
                    self.analysis.copy(&self.result_facts[pred.index()], &mut fact);
                    self.analysis.edge_transfer(&self.cfg, edge, &mut fact)?;
                    self.analysis.meet_into(&self.cfg, edge, &fact, &mut start)?;
                }
                self.start_facts[b] = start;
            }
            self.start_stamps[b] = Some(self.timestamp);
            log::debug!("  B{} start: {:?}", b, self.start_facts[b]);

            let mut result = self.analysis.create_fact();
            self.analysis
                .transfer(&self.cfg, block, &self.start_facts[b], &mut result)?;
            log::debug!("  B{} result: {:?}", b, result);

            if !self.analysis.same(&result, &self.result_facts[b]) {
                self.timestamp += 1;
                self.result_stamps[b] = self.timestamp;
                self.result_facts[b] = result;
                self.analysis
                    .on_result_changed(&self.cfg, block, &self.result_facts[b]);
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn needs_update(&self, block: BlockId, edges: &[EdgeId]) -> bool {
        let Some(computed_at) = self.start_stamps[block.index()] else {
            return true;
        };
        if !self.config.skip_unchanged_blocks || edges.is_empty() {
            return true;
        }
        let direction = self.analysis.direction();
        let preds: Vec<usize> = edges
            .iter()
            .map(|e| logical_predecessor(&self.cfg, direction, *e).index())
            .collect();
        preds.iter().all(|p| self.analysis.is_top(&self.result_facts[*p]))
            || preds.iter().any(|p| self.result_stamps[*p] > computed_at)
    }

    #[inline]
    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    /// Shared handle on the analyzed CFG.
    pub fn cfg_handle(&self) -> Rc<Cfg> {
        Rc::clone(&self.cfg)
    }

    #[inline]
    pub const fn analysis(&self) -> &A {
        &self.analysis
    }

    /// Number of iterations performed so far, the last one being the pass that
    /// observed no change.
    #[inline]
    pub const fn num_iterations(&self) -> usize {
        self.iterations
    }

    pub fn start_fact(&self, block: BlockId) -> &A::Fact {
        &self.start_facts[block.index()]
    }

    pub fn result_fact(&self, block: BlockId) -> &A::Fact {
        &self.result_facts[block.index()]
    }

    /// Result facts of all the blocks, in block id order.
    pub fn result_facts(&self) -> impl Iterator<Item = (BlockId, &A::Fact)> + '_ {
        self.cfg
            .blocks()
            .map(move |b| (b, &self.result_facts[b.index()]))
    }

    /// Fact at the logical entry of the instruction at a location: before it for
    /// forward analyses, after it for backward ones.
    ///
    /// # Errors
    ///
    /// Propagates failures of the replayed instruction transfers.
    pub fn fact_at_location(&self, location: Location) -> AnalysisResult<A::Fact> {
        self.replay(location, false)
    }

    /// Fact at the logical exit of the instruction at a location.
    ///
    /// # Errors
    ///
    /// Propagates failures of the replayed instruction transfers.
    pub fn fact_after_location(&self, location: Location) -> AnalysisResult<A::Fact> {
        let block = self.cfg.block(location.block());
        let last = if self.analysis.direction().is_forward() {
            block.len().checked_sub(1)
        } else {
            Some(0)
        };
        if last == Some(location.position()) {
            Ok(self.result_fact(location.block()).clone())
        } else {
            self.replay(location, true)
        }
    }

    fn replay(&self, location: Location, inclusive: bool) -> AnalysisResult<A::Fact> {
        let id = location.block();
        let block = self.cfg.block(id);
        let mut fact = self.analysis.create_fact();
        self.analysis.copy(self.start_fact(id), &mut fact);
        if !self.analysis.is_fact_valid(&fact) {
            return Ok(fact);
        }

        let mut positions: Vec<usize> = (0..block.len()).collect();
        if !self.analysis.direction().is_forward() {
            positions.reverse();
        }
        for position in positions {
            let reached = position == location.position();
            if reached && !inclusive {
                break;
            }
            if let Some(linstr) = block.instruction(position) {
                let here = Location::new(id, position, linstr.addr());
                self.analysis
                    .transfer_instruction(&self.cfg, here, linstr, &mut fact)?;
            }
            if reached {
                break;
            }
        }
        Ok(fact)
    }

    /// Fact flowing along an edge: the logical predecessor's result fact passed
    /// through the edge transfer function.
    ///
    /// # Errors
    ///
    /// Propagates edge transfer failures.
    pub fn fact_on_edge(&self, edge: EdgeId) -> AnalysisResult<A::Fact> {
        let pred = logical_predecessor(&self.cfg, self.analysis.direction(), edge);
        let mut fact = self.analysis.create_fact();
        self.analysis.copy(self.result_fact(pred), &mut fact);
        self.analysis.edge_transfer(&self.cfg, edge, &mut fact)?;
        Ok(fact)
    }

    /// Fact merged from all the paths reaching the exit block.
    pub fn fact_before_exit(&self) -> &A::Fact {
        self.start_fact(self.cfg.exit())
    }
}

fn logical_entry(cfg: &Cfg, direction: Direction) -> BlockId {
    match direction {
        Direction::Forward => cfg.entry(),
        Direction::Backward => cfg.exit(),
    }
}

fn logical_predecessor_edges(cfg: &Cfg, direction: Direction, block: BlockId) -> Vec<EdgeId> {
    match direction {
        Direction::Forward => cfg.incoming_edges(block),
        Direction::Backward => cfg.outgoing_edges(block),
    }
}

fn logical_predecessor(cfg: &Cfg, direction: Direction, edge: EdgeId) -> BlockId {
    match direction {
        Direction::Forward => cfg.source(edge),
        Direction::Backward => cfg.target(edge),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack_depth::{StackDepth, StackDepthAnalysis};
    use crate::testing::{cfg_of, program};
    use jf_bytecode::Addr;

    const LOOP: &str = r#"
method Foo.loop(I)I static locals 2
  0: iconst 0
  1: istore 1
  2: iload 0
  3: ifle 10
  4: iload 1
  5: iload 0
  6: iadd
  7: istore 1
  8: iinc 0 -1
  9: goto 2
  10: iload 1
  11: ireturn
end
"#;

    fn loop_cfg() -> Rc<Cfg> {
        let p = program(LOOP);
        Rc::new(cfg_of(&p, "Foo.loop(I)I"))
    }

    #[test]
    fn fixed_point_is_idempotent() {
        let cfg = loop_cfg();
        let mut df = Dataflow::new(cfg, StackDepthAnalysis, DataflowConfig::new());
        df.execute().unwrap();
        let iterations = df.num_iterations();
        let results: Vec<StackDepth> = df.result_facts().map(|(_, f)| *f).collect();
        df.execute().unwrap();
        assert_eq!(df.num_iterations(), iterations + 1);
        let again: Vec<StackDepth> = df.result_facts().map(|(_, f)| *f).collect();
        assert_eq!(results, again);
    }

    #[test]
    fn skipping_does_not_change_the_fixed_point() {
        let cfg = loop_cfg();
        let skipping = Dataflow::run(Rc::clone(&cfg), StackDepthAnalysis, DataflowConfig::new()).unwrap();
        let full = Dataflow::run(
            cfg,
            StackDepthAnalysis,
            DataflowConfig::new().skip_unchanged_blocks(false),
        )
        .unwrap();
        for (block, fact) in skipping.result_facts() {
            assert_eq!(fact, full.result_fact(block));
            assert_eq!(skipping.start_fact(block), full.start_fact(block));
        }
    }

    #[test]
    fn iteration_cap_and_cancellation() {
        let cfg = loop_cfg();
        assert!(matches!(
            Dataflow::run(
                Rc::clone(&cfg),
                StackDepthAnalysis,
                DataflowConfig::new().max_iterations(1)
            ),
            Err(AnalysisError::MaxIterations { iterations: 1, .. })
        ));
        let flag = Arc::new(AtomicBool::new(true));
        assert!(matches!(
            Dataflow::run(cfg, StackDepthAnalysis, DataflowConfig::new().cancel_flag(flag)),
            Err(AnalysisError::Cancelled)
        ));
    }

    #[test]
    fn point_queries() {
        let cfg = loop_cfg();
        let df = Dataflow::run(Rc::clone(&cfg), StackDepthAnalysis, DataflowConfig::new()).unwrap();
        let block = cfg.block_containing(Addr(6))[0];
        let at = cfg.location_of(block, Addr(6)).unwrap();
        assert_eq!(df.fact_at_location(at).unwrap(), StackDepth::Depth(2));
        assert_eq!(df.fact_after_location(at).unwrap(), StackDepth::Depth(1));
        let last = cfg.location_of(block, Addr(9)).unwrap();
        assert_eq!(&df.fact_after_location(last).unwrap(), df.result_fact(block));

        for edge in cfg.incoming_edges(block) {
            assert_eq!(df.fact_on_edge(edge).unwrap(), StackDepth::Depth(0));
        }
    }
}
