//! Generic directed graph with labeled edges.
//!
//! Vertices are never removed, so vertex ids stay dense and can index parallel arrays.
//! Edge ids stay stable when other edges are removed.

use crate::errors::{AnalysisError, AnalysisResult};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, NodeIndexable};
use petgraph::Direction;
use std::collections::BTreeSet;
use std::ops::{Index, IndexMut};

pub type VertexId = NodeIndex;
pub type EdgeId = EdgeIndex;

#[derive(Debug, Clone)]
pub struct Graph<V, E> {
    inner: StableDiGraph<V, E>,
}

impl<V, E> Default for Graph<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Graph<V, E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: StableDiGraph::new(),
        }
    }

    pub(crate) const fn inner(&self) -> &StableDiGraph<V, E> {
        &self.inner
    }

    /// Creates and registers a fresh vertex.
    pub fn allocate(&mut self, vertex: V) -> VertexId {
        self.inner.add_node(vertex)
    }

    /// Creates an edge between two vertices.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::DuplicateEdge`] if the two vertices are already linked
    /// in this direction.
    pub fn create_edge(&mut self, source: VertexId, target: VertexId, edge: E) -> AnalysisResult<EdgeId> {
        if self.inner.find_edge(source, target).is_some() {
            return Err(AnalysisError::DuplicateEdge {
                src: source.index(),
                dst: target.index(),
            });
        }
        Ok(self.inner.add_edge(source, target, edge))
    }

    #[must_use]
    pub fn lookup_edge(&self, source: VertexId, target: VertexId) -> Option<EdgeId> {
        self.inner.find_edge(source, target)
    }

    /// Removes a batch of edges, returning how many were actually removed.
    ///
    /// Removal is applied after the caller's scan over edges is complete: passes
    /// collect the edges to delete in a set and hand it over here.
    pub fn remove_edges(&mut self, edges: &BTreeSet<EdgeId>) -> usize {
        edges
            .iter()
            .filter(|id| self.inner.remove_edge(**id).is_some())
            .count()
    }

    /// Source and target of an edge.
    ///
    /// # Panics
    ///
    /// Panics if the edge has been removed.
    #[must_use]
    pub fn endpoints(&self, edge: EdgeId) -> (VertexId, VertexId) {
        self.inner
            .edge_endpoints(edge)
            .unwrap_or_else(|| panic!("edge {} does not exist", edge.index()))
    }

    #[must_use]
    pub fn contains_edge(&self, edge: EdgeId) -> bool {
        self.inner.edge_weight(edge).is_some()
    }

    /// Vertices, in allocation order.
    pub fn vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.inner.node_indices()
    }

    /// Edges, in creation order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.inner.edge_indices()
    }

    /// Incoming edges of a vertex, in creation order.
    #[must_use]
    pub fn incoming_edges(&self, vertex: VertexId) -> Vec<EdgeId> {
        self.directed_edges(vertex, Direction::Incoming)
    }

    /// Outgoing edges of a vertex, in creation order.
    #[must_use]
    pub fn outgoing_edges(&self, vertex: VertexId) -> Vec<EdgeId> {
        self.directed_edges(vertex, Direction::Outgoing)
    }

    fn directed_edges(&self, vertex: VertexId, dir: Direction) -> Vec<EdgeId> {
        let mut edges: Vec<EdgeId> = self
            .inner
            .edges_directed(vertex, dir)
            .map(|edge| edge.id())
            .collect();
        edges.sort_unstable();
        edges
    }

    #[must_use]
    pub fn successors(&self, vertex: VertexId) -> Vec<VertexId> {
        self.outgoing_edges(vertex)
            .into_iter()
            .map(|e| self.endpoints(e).1)
            .collect()
    }

    #[must_use]
    pub fn predecessors(&self, vertex: VertexId) -> Vec<VertexId> {
        self.incoming_edges(vertex)
            .into_iter()
            .map(|e| self.endpoints(e).0)
            .collect()
    }

    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.inner.node_count()
    }

    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.inner.edge_count()
    }

    /// Upper bound of vertex ids, to size arrays indexed by vertex.
    #[must_use]
    pub fn vertex_bound(&self) -> usize {
        self.inner.node_bound()
    }
}

impl<V, E> Index<VertexId> for Graph<V, E> {
    type Output = V;

    fn index(&self, id: VertexId) -> &V {
        &self.inner[id]
    }
}

impl<V, E> IndexMut<VertexId> for Graph<V, E> {
    fn index_mut(&mut self, id: VertexId) -> &mut V {
        &mut self.inner[id]
    }
}

impl<V, E> Index<EdgeId> for Graph<V, E> {
    type Output = E;

    fn index(&self, id: EdgeId) -> &E {
        &self.inner[id]
    }
}

impl<V, E> IndexMut<EdgeId> for Graph<V, E> {
    fn index_mut(&mut self, id: EdgeId) -> &mut E {
        &mut self.inner[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_edges_are_rejected() {
        let mut g: Graph<&str, u8> = Graph::new();
        let a = g.allocate("a");
        let b = g.allocate("b");
        g.create_edge(a, b, 0).unwrap();
        assert!(matches!(
            g.create_edge(a, b, 1),
            Err(AnalysisError::DuplicateEdge { src: 0, dst: 1 })
        ));
        assert!(g.create_edge(b, a, 1).is_ok());
        assert_eq!(g.num_edges(), 2);
    }

    #[test]
    fn batched_removal_keeps_ids() {
        let mut g: Graph<u8, char> = Graph::new();
        let v: Vec<VertexId> = (0..4).map(|i| g.allocate(i)).collect();
        let e01 = g.create_edge(v[0], v[1], 'x').unwrap();
        let e02 = g.create_edge(v[0], v[2], 'y').unwrap();
        let e03 = g.create_edge(v[0], v[3], 'z').unwrap();

        let doomed: BTreeSet<EdgeId> = g
            .edges()
            .filter(|e| g[*e] != 'y')
            .collect();
        assert_eq!(g.remove_edges(&doomed), 2);
        assert_eq!(g.outgoing_edges(v[0]), vec![e02]);
        assert!(!g.contains_edge(e01));
        assert!(!g.contains_edge(e03));
        assert_eq!(g[e02], 'y');
        assert_eq!(g.successors(v[0]), vec![v[2]]);
        assert_eq!(g.predecessors(v[2]), vec![v[0]]);
        assert_eq!(g.vertex_bound(), 4);
    }
}
