//! Block orderings used to drive the dataflow solver.

use crate::cfg::{BlockId, Cfg};
use fixedbitset::FixedBitSet;
use petgraph::visit::{DfsPostOrder, Reversed};

/// Depth first search of the CFG from its entry block.
#[derive(Debug, Clone)]
pub struct DepthFirstSearch {
    postorder: Vec<BlockId>,
    reachable: FixedBitSet,
}

impl DepthFirstSearch {
    #[must_use]
    pub fn new(cfg: &Cfg) -> Self {
        let graph = cfg.graph();
        let mut postorder = Vec::new();
        let mut dfs = DfsPostOrder::new(graph, cfg.entry());
        while let Some(id) = dfs.next(graph) {
            postorder.push(id);
        }
        Self::from_postorder(cfg, postorder)
    }

    fn from_postorder(cfg: &Cfg, postorder: Vec<BlockId>) -> Self {
        let mut reachable = FixedBitSet::with_capacity(cfg.block_bound());
        for id in &postorder {
            reachable.insert(id.index());
        }
        Self {
            postorder,
            reachable,
        }
    }

    #[must_use]
    pub fn postorder(&self) -> &[BlockId] {
        &self.postorder
    }

    /// Reverse postorder of the reachable blocks, followed by the unreachable ones
    /// in id order.
    #[must_use]
    pub fn reverse_postorder(&self, cfg: &Cfg) -> Vec<BlockId> {
        let mut order: Vec<BlockId> = self.postorder.iter().rev().copied().collect();
        order.extend(cfg.blocks().filter(|b| !self.is_reachable(*b)));
        order
    }

    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable.contains(block.index())
    }
}

/// Depth first search of the reversed CFG from its exit block.
#[derive(Debug, Clone)]
pub struct ReverseDepthFirstSearch(DepthFirstSearch);

impl ReverseDepthFirstSearch {
    #[must_use]
    pub fn new(cfg: &Cfg) -> Self {
        let graph = Reversed(cfg.graph());
        let mut postorder = Vec::new();
        let mut dfs = DfsPostOrder::new(graph, cfg.exit());
        while let Some(id) = dfs.next(graph) {
            postorder.push(id);
        }
        Self(DepthFirstSearch::from_postorder(cfg, postorder))
    }

    #[must_use]
    pub fn postorder(&self) -> &[BlockId] {
        self.0.postorder()
    }

    #[must_use]
    pub fn reverse_postorder(&self, cfg: &Cfg) -> Vec<BlockId> {
        self.0.reverse_postorder(cfg)
    }

    /// Returns `true` if the exit block can be reached from the block.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.0.is_reachable(block)
    }
}

/// Order in which the solver visits blocks at each iteration.
#[derive(Debug, Clone)]
pub struct BlockOrder {
    blocks: Vec<BlockId>,
}

impl BlockOrder {
    /// Reverse postorder, the best order for forward analyses.
    #[must_use]
    pub fn forward(cfg: &Cfg) -> Self {
        Self {
            blocks: DepthFirstSearch::new(cfg).reverse_postorder(cfg),
        }
    }

    /// Reverse postorder on the reversed graph, for backward analyses.
    #[must_use]
    pub fn backward(cfg: &Cfg) -> Self {
        Self {
            blocks: ReverseDepthFirstSearch::new(cfg).reverse_postorder(cfg),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cfg_of, program};

    #[test]
    fn orders() {
        let p = program(
            r#"
method Foo.loop(I)V static locals 1
  0: iload 0
  1: ifle 4
  2: iinc 0 -1
  3: goto 0
  4: return
end
"#,
        );
        let cfg = cfg_of(&p, "Foo.loop(I)V");
        let forward = BlockOrder::forward(&cfg);
        assert_eq!(forward.len(), cfg.num_basic_blocks());
        assert_eq!(forward.iter().next(), Some(cfg.entry()));

        let backward = BlockOrder::backward(&cfg);
        assert_eq!(backward.iter().next(), Some(cfg.exit()));

        let dfs = DepthFirstSearch::new(&cfg);
        assert!(cfg.blocks().all(|b| dfs.is_reachable(b)));
        let rdfs = ReverseDepthFirstSearch::new(&cfg);
        assert!(rdfs.is_reachable(cfg.entry()));
    }

    #[test]
    fn dead_code_is_not_materialized() {
        let p = program(
            r#"
method Foo.dead()V static
  0: return
  1: nop
  2: return
end
"#,
        );
        let cfg = cfg_of(&p, "Foo.dead()V");
        assert_eq!(cfg.num_basic_blocks(), 3);
        let dfs = DepthFirstSearch::new(&cfg);
        let order = dfs.reverse_postorder(&cfg);
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], cfg.entry());
        assert_eq!(order[2], cfg.exit());
    }
}
