// src/graph/mod.rs
pub mod builder;
pub mod spatial;

use ahash::AHashMap;
use bit_vec::BitVec;
use serde::{Serialize, Deserialize};
use std::collections::VecDeque;

use crate::types::PixelId;

pub use builder::AdjacencyGraphBuilder;

/// Undirected contiguity graph over pixels, stored in CSR form.
///
/// Nodes are dense indices in pixel input order. Neighbor lists are sorted
/// ascending, contain no self-loops and no duplicates.
#[derive(Debug, Clone)]
pub struct AdjacencyGraph {
    ids: Vec<PixelId>,
    index: AHashMap<PixelId, usize>,
    offsets: Vec<usize>,
    neighbors: Vec<usize>,
    weights: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub isolated: usize,
    pub components: usize,
}

impl AdjacencyGraph {
    /// Builds the graph from node ids and an undirected edge list.
    /// Self-loops are dropped; duplicate pairs keep their first weight.
    pub fn from_edges(ids: Vec<PixelId>, edges: impl IntoIterator<Item = (usize, usize, f64)>) -> Self {
        let n = ids.len();
        let mut lists: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for (a, b, w) in edges {
            if a == b || a >= n || b >= n {
                continue;
            }
            lists[a].push((b, w));
            lists[b].push((a, w));
        }

        let mut offsets = Vec::with_capacity(n + 1);
        let mut neighbors = Vec::new();
        let mut weights = Vec::new();
        offsets.push(0);
        for list in lists.iter_mut() {
            // Stable sort keeps the first weight of a duplicate pair in front
            list.sort_by_key(|&(v, _)| v);
            list.dedup_by_key(|&mut (v, _)| v);
            for &(v, w) in list.iter() {
                neighbors.push(v);
                weights.push(w);
            }
            offsets.push(neighbors.len());
        }

        let index = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Self { ids, index, offsets, neighbors, weights }
    }

    /// The number of vertices in the graph.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn neighbors(&self, vertex: usize) -> &[usize] {
        &self.neighbors[self.offsets[vertex]..self.offsets[vertex + 1]]
    }

    /// Neighbors paired with edge weights (shared boundary length or inverse distance).
    pub fn weighted_neighbors(&self, vertex: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.offsets[vertex]..self.offsets[vertex + 1];
        self.neighbors[range.clone()].iter().copied().zip(self.weights[range].iter().copied())
    }

    pub fn degree(&self, vertex: usize) -> usize {
        self.offsets[vertex + 1] - self.offsets[vertex]
    }

    pub fn edge_count(&self) -> usize {
        self.neighbors.len() / 2
    }

    /// Every undirected edge once, as `(i, j, weight)` with `i < j`, sorted.
    pub fn edges(&self) -> Vec<(usize, usize, f64)> {
        (0..self.len())
            .flat_map(|i| {
                self.weighted_neighbors(i)
                    .filter(move |&(j, _)| j > i)
                    .map(move |(j, w)| (i, j, w))
            })
            .collect()
    }

    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.neighbors(a).binary_search(&b).is_ok()
    }

    pub fn index_of(&self, id: PixelId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn pixel_id(&self, vertex: usize) -> PixelId {
        self.ids[vertex]
    }

    pub fn pixel_ids(&self) -> &[PixelId] {
        &self.ids
    }

    /// Connected components, each sorted ascending, ordered by their lowest vertex.
    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut seen = BitVec::from_elem(self.len(), false);
        let mut components = Vec::new();
        for start in 0..self.len() {
            if seen[start] {
                continue;
            }
            let mut component = self.flood(start, &mut seen, |_| true);
            component.sort_unstable();
            components.push(component);
        }
        components
    }

    /// Component label per vertex, labels numbered as in `connected_components`.
    pub fn component_labels(&self) -> Vec<usize> {
        let mut labels = vec![0; self.len()];
        for (c, component) in self.connected_components().iter().enumerate() {
            for &v in component {
                labels[v] = c;
            }
        }
        labels
    }

    /// Whether the subgraph induced by `members` is connected. Empty sets are not.
    pub fn is_connected_subset(&self, members: &[usize]) -> bool {
        let Some(&start) = members.first() else {
            return false;
        };
        let mut mask = BitVec::from_elem(self.len(), false);
        for &m in members {
            mask.set(m, true);
        }
        self.is_connected_where(start, members.len(), |v| mask[v])
    }

    /// Breadth-first reachability from `start` restricted to vertices accepted by
    /// `member`; true when it reaches `size` vertices.
    pub fn is_connected_where<F: Fn(usize) -> bool>(&self, start: usize, size: usize, member: F) -> bool {
        let mut seen = BitVec::from_elem(self.len(), false);
        self.flood(start, &mut seen, member).len() == size
    }

    /// Vertices reachable from `start` through vertices accepted by `member`.
    pub fn flood<F: Fn(usize) -> bool>(&self, start: usize, seen: &mut BitVec, member: F) -> Vec<usize> {
        let mut reached = vec![start];
        let mut queue = VecDeque::from([start]);
        seen.set(start, true);
        while let Some(v) = queue.pop_front() {
            for &u in self.neighbors(v) {
                if !seen[u] && member(u) {
                    seen.set(u, true);
                    reached.push(u);
                    queue.push_back(u);
                }
            }
        }
        reached
    }

    /// Vertices in breadth-first order, components visited by lowest vertex.
    pub fn bfs_order(&self) -> Vec<usize> {
        let mut seen = BitVec::from_elem(self.len(), false);
        let mut order = Vec::with_capacity(self.len());
        for start in 0..self.len() {
            if !seen[start] {
                order.extend(self.flood(start, &mut seen, |_| true));
            }
        }
        order
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.len(),
            edges: self.edge_count(),
            isolated: (0..self.len()).filter(|&v| self.degree(v) == 0).count(),
            components: self.connected_components().len(),
        }
    }
}
