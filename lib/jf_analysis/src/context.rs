//! Per-method memoization of the CFGs and analyses, with the state of each request
//! tracked explicitly.

use crate::cfg::{Cfg, CfgBuilder};
use crate::dataflow::{Dataflow, DataflowConfig};
use crate::dominators::{Dominators, EdgeChooser};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::hierarchy::{ClassResolver, LookupFailureCallback};
use crate::live_locals::LiveLocalStoreAnalysis;
use crate::order::DepthFirstSearch;
use crate::prune::{PruneInfeasibleExceptionEdges, PruneUnconditionalExceptionThrowerEdges};
use crate::stack_depth::StackDepthAnalysis;
use crate::typing::{TypeAnalysis, TypeAnalysisConfig, TypeDataflow};
use jf_bytecode::methods::Method;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

/// State of a memoized request.
#[derive(Debug)]
pub enum Slot<T> {
    NotStarted,
    InProgress,
    Done(Rc<T>),
    Failed(Arc<AnalysisError>),
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::NotStarted
    }
}

/// Lazily computed analyses of one method. Each result, or failure, is computed
/// at most once.
pub struct MethodAnalysisCache<'a> {
    method: &'a Method,
    resolver: &'a dyn ClassResolver,
    callback: &'a dyn LookupFailureCallback,
    config: DataflowConfig,
    type_config: TypeAnalysisConfig,
    raw_cfg: RefCell<Slot<Cfg>>,
    dfs: RefCell<Slot<DepthFirstSearch>>,
    raw_types: RefCell<Slot<TypeDataflow<'a>>>,
    pruned_cfg: RefCell<Slot<Cfg>>,
    types: RefCell<Slot<TypeDataflow<'a>>>,
    dominators: RefCell<Slot<Dominators>>,
    post_dominators: RefCell<Slot<Dominators>>,
    stack_depth: RefCell<Slot<Dataflow<StackDepthAnalysis>>>,
    live_locals: RefCell<Slot<Dataflow<LiveLocalStoreAnalysis>>>,
}

impl<'a> MethodAnalysisCache<'a> {
    #[must_use]
    pub fn new(
        method: &'a Method,
        resolver: &'a dyn ClassResolver,
        callback: &'a dyn LookupFailureCallback,
        config: DataflowConfig,
    ) -> Self {
        Self {
            method,
            resolver,
            callback,
            config,
            type_config: TypeAnalysisConfig::default(),
            raw_cfg: RefCell::default(),
            dfs: RefCell::default(),
            raw_types: RefCell::default(),
            pruned_cfg: RefCell::default(),
            types: RefCell::default(),
            dominators: RefCell::default(),
            post_dominators: RefCell::default(),
            stack_depth: RefCell::default(),
            live_locals: RefCell::default(),
        }
    }

    #[must_use]
    pub fn with_type_config(mut self, type_config: TypeAnalysisConfig) -> Self {
        self.type_config = type_config;
        self
    }

    #[inline]
    #[must_use]
    pub const fn method(&self) -> &'a Method {
        self.method
    }

    fn memoize<T>(
        &self,
        slot: &RefCell<Slot<T>>,
        what: &'static str,
        compute: impl FnOnce() -> AnalysisResult<T>,
    ) -> AnalysisResult<Rc<T>> {
        match &*slot.borrow() {
            Slot::Done(value) => return Ok(Rc::clone(value)),
            Slot::Failed(cause) => {
                return Err(AnalysisError::Unavailable {
                    what,
                    method: self.method.full_name(),
                    cause: Arc::clone(cause),
                })
            }
            Slot::InProgress => {
                return Err(AnalysisError::Reentrant {
                    what,
                    method: self.method.full_name(),
                })
            }
            Slot::NotStarted => (),
        }

        *slot.borrow_mut() = Slot::InProgress;
        log::debug!("computing {what} of {}", self.method.full_name());
        match compute() {
            Ok(value) => {
                let value = Rc::new(value);
                *slot.borrow_mut() = Slot::Done(Rc::clone(&value));
                Ok(value)
            }
            Err(err) => {
                log::warn!("{what} of {}: {err}", self.method.full_name());
                let cause = Arc::new(err);
                *slot.borrow_mut() = Slot::Failed(Arc::clone(&cause));
                Err(AnalysisError::Unavailable {
                    what,
                    method: self.method.full_name(),
                    cause,
                })
            }
        }
    }

    /// The CFG as built from the bytecode.
    ///
    /// # Errors
    ///
    /// Fails on malformed code, or for methods without code.
    pub fn raw_cfg(&self) -> AnalysisResult<Rc<Cfg>> {
        self.memoize(&self.raw_cfg, "raw CFG", || CfgBuilder::build(self.method))
    }

    /// Depth-first search of the pruned CFG.
    ///
    /// # Errors
    ///
    /// Fails when the CFG is unavailable.
    pub fn depth_first_search(&self) -> AnalysisResult<Rc<DepthFirstSearch>> {
        self.memoize(&self.dfs, "depth-first search", || {
            Ok(DepthFirstSearch::new(&*self.cfg()?))
        })
    }

    /// Type analysis of the raw CFG, computing the exception sets used for pruning.
    ///
    /// # Errors
    ///
    /// Fails when the CFG is unavailable or when the analysis fails.
    pub fn raw_type_dataflow(&self) -> AnalysisResult<Rc<TypeDataflow<'a>>> {
        self.memoize(&self.raw_types, "raw type analysis", || {
            let analysis = TypeAnalysis::new(
                self.method,
                self.resolver,
                self.callback,
                TypeAnalysisConfig {
                    compute_exception_sets: true,
                },
            );
            Dataflow::run(self.raw_cfg()?, analysis, self.config.clone())
        })
    }

    /// The CFG with its infeasible edges removed.
    ///
    /// A request made while the pruned CFG is being computed gets the raw CFG.
    ///
    /// # Errors
    ///
    /// Fails when the raw CFG or its type analysis is unavailable.
    pub fn cfg(&self) -> AnalysisResult<Rc<Cfg>> {
        if matches!(*self.pruned_cfg.borrow(), Slot::InProgress) {
            log::debug!(
                "pruned CFG of {} requested while pruning, using the raw one",
                self.method.full_name()
            );
            return self.raw_cfg();
        }
        self.memoize(&self.pruned_cfg, "CFG", || {
            let types = self.raw_type_dataflow()?;
            let mut cfg = PruneInfeasibleExceptionEdges::new(&types).execute()?;
            PruneUnconditionalExceptionThrowerEdges::new(self.resolver, self.callback)
                .execute(&mut cfg)?;
            Ok(cfg)
        })
    }

    /// Type analysis of the pruned CFG.
    ///
    /// # Errors
    ///
    /// Fails when the CFG is unavailable or when the analysis fails.
    pub fn type_dataflow(&self) -> AnalysisResult<Rc<TypeDataflow<'a>>> {
        self.memoize(&self.types, "type analysis", || {
            let analysis =
                TypeAnalysis::new(self.method, self.resolver, self.callback, self.type_config);
            Dataflow::run(self.cfg()?, analysis, self.config.clone())
        })
    }

    /// # Errors
    ///
    /// Fails when the CFG is unavailable or when the analysis fails.
    pub fn dominators(&self) -> AnalysisResult<Rc<Dominators>> {
        self.memoize(&self.dominators, "dominators", || {
            Dominators::dominators(self.cfg()?, EdgeChooser::All, self.config.clone())
        })
    }

    /// # Errors
    ///
    /// Fails when the CFG is unavailable or when the analysis fails.
    pub fn post_dominators(&self) -> AnalysisResult<Rc<Dominators>> {
        self.memoize(&self.post_dominators, "post-dominators", || {
            Dominators::post_dominators(self.cfg()?, EdgeChooser::All, self.config.clone())
        })
    }

    /// # Errors
    ///
    /// Fails when the CFG is unavailable or when the analysis fails.
    pub fn stack_depth(&self) -> AnalysisResult<Rc<Dataflow<StackDepthAnalysis>>> {
        self.memoize(&self.stack_depth, "stack depth analysis", || {
            Dataflow::run(self.cfg()?, StackDepthAnalysis, self.config.clone())
        })
    }

    /// # Errors
    ///
    /// Fails when the CFG is unavailable or when the analysis fails.
    pub fn live_locals(&self) -> AnalysisResult<Rc<Dataflow<LiveLocalStoreAnalysis>>> {
        self.memoize(&self.live_locals, "live locals analysis", || {
            let analysis = LiveLocalStoreAnalysis::new(self.method.max_locals());
            Dataflow::run(self.cfg()?, analysis, self.config.clone())
        })
    }
}

/// Analysis caches of the methods of a program, keyed by method full name.
pub struct ClassContext<'a> {
    resolver: &'a dyn ClassResolver,
    callback: &'a dyn LookupFailureCallback,
    config: DataflowConfig,
    caches: BTreeMap<String, MethodAnalysisCache<'a>>,
}

impl<'a> ClassContext<'a> {
    #[must_use]
    pub fn new(
        resolver: &'a dyn ClassResolver,
        callback: &'a dyn LookupFailureCallback,
        config: DataflowConfig,
    ) -> Self {
        Self {
            resolver,
            callback,
            config,
            caches: BTreeMap::new(),
        }
    }

    /// The cache of a method, created on first use.
    pub fn method_cache(&mut self, method: &'a Method) -> &MethodAnalysisCache<'a> {
        let (resolver, callback, config) = (self.resolver, self.callback, &self.config);
        self.caches
            .entry(method.full_name())
            .or_insert_with(|| MethodAnalysisCache::new(method, resolver, callback, config.clone()))
    }

    #[must_use]
    pub fn num_cached_methods(&self) -> usize {
        self.caches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeKind;
    use crate::hierarchy::{Hierarchy, LogLookupFailures};
    use crate::testing::program;
    use jf_bytecode::Addr;

    const SOURCE: &str = r#"
class java/io/IOException extends java/lang/Exception
end
class java/lang/IllegalStateException extends java/lang/RuntimeException
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
method Foo.f(I)I static locals 1
  0: iload 0
  1: ireturn
end
method Foo.abs()V static abstract
end
"#;

    #[test]
    fn results_are_memoized() {
        let p = program(SOURCE);
        let h = Hierarchy::from_program(&p);
        let method = p.get_method("Foo.fail()V").unwrap();
        let cache = MethodAnalysisCache::new(method, &h, &LogLookupFailures, DataflowConfig::new());

        let cfg = cache.cfg().unwrap();
        assert!(Rc::ptr_eq(&cfg, &cache.cfg().unwrap()));
        let raw = cache.raw_cfg().unwrap();
        assert_eq!(cfg.num_edges(), raw.num_edges() - 1);

        let types = cache.type_dataflow().unwrap();
        assert!(Rc::ptr_eq(&types.cfg_handle(), &cfg));
        assert!(Rc::ptr_eq(&types, &cache.type_dataflow().unwrap()));
        let handler = cfg.block_containing(Addr(4))[0];
        assert!(!cache.depth_first_search().unwrap().is_reachable(handler));
        assert!(cache.dominators().unwrap().dominates(cfg.entry(), cfg.exit()));
        assert!(cache
            .post_dominators()
            .unwrap()
            .dominates(cfg.exit(), cfg.entry()));
    }

    #[test]
    fn failures_are_memoized() {
        let p = program(SOURCE);
        let h = Hierarchy::from_program(&p);
        let method = p.get_method("Foo.abs()V").unwrap();
        let cache = MethodAnalysisCache::new(method, &h, &LogLookupFailures, DataflowConfig::new());

        let Err(first) = cache.stack_depth() else {
            panic!("stack depth of a method without code");
        };
        let AnalysisError::Unavailable { cause, .. } = &first else {
            panic!("unexpected error {first}");
        };
        assert!(matches!(**cause, AnalysisError::Unavailable { .. }));
        let err = cache.raw_cfg().unwrap_err();
        let AnalysisError::Unavailable { what, cause, .. } = &err else {
            panic!("unexpected error {err}");
        };
        assert_eq!(*what, "raw CFG");
        assert!(matches!(**cause, AnalysisError::NoCode));
        assert!(matches!(*cache.raw_cfg.borrow(), Slot::Failed(_)));
    }

    #[test]
    fn reentrant_pruning_gets_the_raw_cfg() {
        let p = program(SOURCE);
        let h = Hierarchy::from_program(&p);
        let method = p.get_method("Foo.fail()V").unwrap();
        let cache = MethodAnalysisCache::new(method, &h, &LogLookupFailures, DataflowConfig::new());

        *cache.pruned_cfg.borrow_mut() = Slot::InProgress;
        let cfg = cache.cfg().unwrap();
        assert!(Rc::ptr_eq(&cfg, &cache.raw_cfg().unwrap()));
        // other requests on a CFG being built are reported
        assert!(matches!(
            cache.memoize(&cache.pruned_cfg, "CFG", || cache.raw_cfg().map(|c| (*c).clone())),
            Err(AnalysisError::Reentrant { what: "CFG", .. })
        ));
    }

    #[test]
    fn class_context() {
        let p = program(SOURCE);
        let h = Hierarchy::from_program(&p);
        let mut context = ClassContext::new(&h, &LogLookupFailures, DataflowConfig::new());
        for method in p.iter_methods() {
            let cache = context.method_cache(method);
            assert_eq!(cache.raw_cfg().is_ok(), method.code().is_some());
        }
        assert_eq!(context.num_cached_methods(), 3);

        let method = p.get_method("Foo.f(I)I").unwrap();
        let live = context.method_cache(method).live_locals().unwrap();
        let first = live
            .cfg()
            .successor_by_kind(live.cfg().entry(), EdgeKind::Start)
            .unwrap();
        assert!(live.result_fact(first).is_live(0));
        assert_eq!(context.num_cached_methods(), 3);
    }
}
