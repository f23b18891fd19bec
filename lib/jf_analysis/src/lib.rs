//! This crate provides the control flow graphs and dataflow analyses of JVM
//! method bytecode for the `JFlow` project.
//!
//! Analyses implement the [`dataflow::Analysis`] contract and are solved by the
//! [`dataflow::Dataflow`] fixed-point engine over a [`cfg::Cfg`]. Results of a
//! method are best obtained through a [`context::MethodAnalysisCache`], which
//! builds, prunes and analyzes the CFG on demand.

pub mod block;
pub mod cfg;
pub mod context;
pub mod dataflow;
pub mod dominators;
pub mod edge;
pub mod errors;
pub mod frame;
pub mod graph;
pub mod hierarchy;
pub mod live_locals;
pub mod location;
pub mod order;
pub mod prune;
pub mod stack_depth;
pub mod typing;

#[cfg(test)]
pub(crate) mod testing {
    use crate::cfg::{Cfg, CfgBuilder};
    use crate::hierarchy::{LookupFailure, LookupFailureCallback};
    use jf_bytecode::Program;
    use std::cell::RefCell;

    pub fn program(source: &str) -> Program {
        jf_bytecode::parse(source).unwrap()
    }

    pub fn cfg_of(program: &Program, method: &str) -> Cfg {
        CfgBuilder::build(program.get_method(method).unwrap()).unwrap()
    }

    /// Records the classes whose lookup failed.
    #[derive(Debug, Default)]
    pub struct Failures(RefCell<Vec<String>>);

    impl Failures {
        pub fn classes(&self) -> Vec<String> {
            self.0.borrow().clone()
        }
    }

    impl LookupFailureCallback for Failures {
        fn report(&self, failure: &LookupFailure) {
            self.0.borrow_mut().push(failure.class.clone());
        }
    }
}
