//! Per-layer directed graph.
//!
//! Each abstraction layer of a situation graph is a small DAG over node
//! ids. The structure keeps vertices in insertion order so that sorts and
//! iterations are deterministic across runs.

use std::collections::{HashMap, HashSet};

use crate::error::TopologyError;

/// A directed graph over `i64` vertex ids.
#[derive(Debug, Clone, Default)]
pub struct DirectedGraph {
    vertices: Vec<i64>,
    vertex_set: HashSet<i64>,
    adjacency: HashMap<i64, Vec<i64>>,
    // vertices that appear as an endpoint of at least one edge
    touched: HashSet<i64>,
}

impl DirectedGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex. Idempotent.
    pub fn add_vertex(&mut self, id: i64) {
        if self.vertex_set.insert(id) {
            self.vertices.push(id);
        }
    }

    /// Adds a directed edge. Duplicate edges are ignored; endpoints are
    /// registered as vertices if they are not already present.
    pub fn add_edge(&mut self, src: i64, dest: i64) {
        self.add_vertex(src);
        self.add_vertex(dest);
        let successors = self.adjacency.entry(src).or_default();
        if !successors.contains(&dest) {
            successors.push(dest);
        }
        self.touched.insert(src);
        self.touched.insert(dest);
    }

    /// The vertex set in insertion order.
    #[must_use]
    pub fn vertices(&self) -> &[i64] {
        &self.vertices
    }

    /// Successors of a vertex, in edge-insertion order.
    #[must_use]
    pub fn successors(&self, id: i64) -> &[i64] {
        self.adjacency.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Number of vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Returns true if the graph has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Orders all vertices so that every edge points forward.
    ///
    /// The order is the reverse of a DFS postorder over the vertices that
    /// participate in edges, with orphan vertices prepended in insertion
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `TopologyError::CycleDetected` if the graph contains a
    /// directed cycle.
    pub fn topological_sort(&self) -> Result<Vec<i64>, TopologyError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        fn visit(
            graph: &DirectedGraph,
            vertex: i64,
            marks: &mut HashMap<i64, Mark>,
            postorder: &mut Vec<i64>,
        ) -> Result<(), TopologyError> {
            marks.insert(vertex, Mark::InProgress);
            for &next in graph.successors(vertex) {
                match marks.get(&next) {
                    None => visit(graph, next, marks, postorder)?,
                    Some(Mark::InProgress) => {
                        return Err(TopologyError::CycleDetected { vertex: next });
                    }
                    Some(Mark::Done) => {}
                }
            }
            marks.insert(vertex, Mark::Done);
            postorder.push(vertex);
            Ok(())
        }

        let mut marks: HashMap<i64, Mark> = HashMap::new();
        let mut postorder = Vec::with_capacity(self.touched.len());
        for &vertex in &self.vertices {
            if self.touched.contains(&vertex) && !marks.contains_key(&vertex) {
                visit(self, vertex, &mut marks, &mut postorder)?;
            }
        }

        let mut order: Vec<i64> = self
            .vertices
            .iter()
            .copied()
            .filter(|v| !self.touched.contains(v))
            .collect();
        order.extend(postorder.into_iter().rev());
        Ok(order)
    }
}
