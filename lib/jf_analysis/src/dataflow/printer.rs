use super::{Analysis, Dataflow};
use crate::cfg::{BlockId, EdgeId};
use crate::location::Location;
use std::fmt;

/// Provides the annotations printed next to blocks, instructions and edges in a
/// [`DataflowPrinter`] dump. Returning `None` omits the annotation.
pub trait Annotator<A: Analysis> {
    fn block_start(&self, _dataflow: &Dataflow<A>, _block: BlockId) -> Option<String> {
        None
    }

    fn block_result(&self, _dataflow: &Dataflow<A>, _block: BlockId) -> Option<String> {
        None
    }

    fn instruction(&self, _dataflow: &Dataflow<A>, _location: Location) -> Option<String> {
        None
    }

    fn edge(&self, _dataflow: &Dataflow<A>, _edge: EdgeId) -> Option<String> {
        None
    }
}

/// Annotates blocks and instructions with the facts themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactAnnotator {
    pub edges: bool,
}

impl<A> Annotator<A> for FactAnnotator
where
    A: Analysis,
    A::Fact: fmt::Display,
{
    fn block_start(&self, dataflow: &Dataflow<A>, block: BlockId) -> Option<String> {
        Some(dataflow.start_fact(block).to_string())
    }

    fn block_result(&self, dataflow: &Dataflow<A>, block: BlockId) -> Option<String> {
        Some(dataflow.result_fact(block).to_string())
    }

    fn instruction(&self, dataflow: &Dataflow<A>, location: Location) -> Option<String> {
        match dataflow.fact_at_location(location) {
            Ok(fact) => Some(fact.to_string()),
            Err(err) => Some(format!("<{err}>")),
        }
    }

    fn edge(&self, dataflow: &Dataflow<A>, edge: EdgeId) -> Option<String> {
        if !self.edges {
            return None;
        }
        match dataflow.fact_on_edge(edge) {
            Ok(fact) => Some(fact.to_string()),
            Err(err) => Some(format!("<{err}>")),
        }
    }
}

/// Text dump of a dataflow result.
pub struct DataflowPrinter<'d, A: Analysis, N> {
    dataflow: &'d Dataflow<A>,
    annotator: N,
}

impl<'d, A: Analysis, N: Annotator<A>> DataflowPrinter<'d, A, N> {
    pub const fn new(dataflow: &'d Dataflow<A>, annotator: N) -> Self {
        Self {
            dataflow,
            annotator,
        }
    }
}

impl<'d, A: Analysis, N: Annotator<A>> fmt::Display for DataflowPrinter<'d, A, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let df = self.dataflow;
        let cfg = df.cfg();
        writeln!(
            f,
            "{} ({}, {} iterations)",
            cfg.method_name(),
            df.analysis().name(),
            df.num_iterations()
        )?;
        for id in cfg.blocks() {
            let block = cfg.block(id);
            write!(f, "  B{}", id.index())?;
            if id == cfg.entry() {
                write!(f, " (entry)")?;
            } else if id == cfg.exit() {
                write!(f, " (exit)")?;
            } else if let Some(thrower) = block.exception_thrower() {
                write!(f, " (thrower {})", thrower.addr())?;
            }
            if let Some(catch_type) = block.catch_type() {
                write!(f, " catch {catch_type}")?;
            }
            writeln!(f)?;

            if let Some(s) = self.annotator.block_start(df, id) {
                writeln!(f, "    start:  {s}")?;
            }
            for (position, linstr) in block.instructions().enumerate() {
                let location = Location::new(id, position, linstr.addr());
                match self.annotator.instruction(df, location) {
                    Some(s) => writeln!(f, "      {:<32} {s}", linstr.to_string())?,
                    None => writeln!(f, "      {linstr}")?,
                }
            }
            if let Some(s) = self.annotator.block_result(df, id) {
                writeln!(f, "    result: {s}")?;
            }
            for edge in cfg.outgoing_edges(id) {
                write!(f, "    -> B{} {}", cfg.target(edge).index(), cfg.edge(edge))?;
                if let Some(s) = self.annotator.edge(df, edge) {
                    write!(f, " {s}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::DataflowConfig;
    use crate::stack_depth::StackDepthAnalysis;
    use crate::testing::{cfg_of, program};
    use std::rc::Rc;

    #[test]
    fn dump() {
        let p = program("method Foo.one()I static\n  0: iconst 1\n  1: ireturn\nend\n");
        let cfg = Rc::new(cfg_of(&p, "Foo.one()I"));
        let df = Dataflow::run(cfg, StackDepthAnalysis, DataflowConfig::new()).unwrap();
        let dump = DataflowPrinter::new(&df, FactAnnotator { edges: true }).to_string();
        assert!(dump.starts_with("Foo.one()I (stack-depth, "));
        assert!(dump.contains("(entry)"));
        assert!(dump.contains("iconst 1"));
        assert!(dump.contains("-> B1 <return> 0"));

        struct Silent;
        impl Annotator<StackDepthAnalysis> for Silent {}
        let bare = DataflowPrinter::new(&df, Silent).to_string();
        assert!(!bare.contains("start:"));
    }
}
