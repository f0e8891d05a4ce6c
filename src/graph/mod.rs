//! The layered situation graph.
//!
//! A situation graph is an ordered stack of per-layer DAGs: layer 0 holds
//! the most abstract situations and the last layer holds the operational
//! situations observable through sensors. Horizontal relations connect
//! causes to effects within a layer; vertical relations connect a parent
//! to the children that serve as its evidence one layer down. The graph
//! is immutable once loaded and shared by reference.

pub mod directed;
pub mod loader;
pub mod node;
pub mod reachability;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::GraphLoadError;
use crate::graph::directed::DirectedGraph;
use crate::graph::node::{SituationNode, SituationRelation};
use crate::graph::reachability::BitMatrix;

pub use loader::{from_json_str, from_path, LoadedModel};

/// The multi-layer causal graph over situations.
#[derive(Debug)]
pub struct SituationGraph {
    layers: Vec<DirectedGraph>,
    // topological order per layer, fixed at load
    layer_order: Vec<Vec<i64>>,
    nodes: BTreeMap<i64, SituationNode>,
    relations: BTreeMap<(i64, i64), SituationRelation>,
    reach: BitMatrix,
}

impl SituationGraph {
    /// Maximum fan-in of any node. CPT rows are enumerated as
    /// `2^parents`, so the bound keeps inference tables addressable.
    pub const MAX_PARENTS: usize = 32;

    pub(crate) fn assemble(
        layers: Vec<DirectedGraph>,
        nodes: BTreeMap<i64, SituationNode>,
        relations: BTreeMap<(i64, i64), SituationRelation>,
        reach: BitMatrix,
    ) -> Result<Self, GraphLoadError> {
        let mut layer_order = Vec::with_capacity(layers.len());
        for (layer_no, layer) in layers.iter().enumerate() {
            let order = layer
                .topological_sort()
                .map_err(|source| GraphLoadError::LayerCycle {
                    layer: layer_no,
                    source,
                })?;
            layer_order.push(order);
        }
        Ok(Self {
            layers,
            layer_order,
            nodes,
            relations,
            reach,
        })
    }

    /// Number of layers.
    #[must_use]
    pub fn height(&self) -> usize {
        self.layers.len()
    }

    /// The DAG of a single layer. Layer 0 is the top.
    #[must_use]
    pub fn layer(&self, index: usize) -> &DirectedGraph {
        &self.layers[index]
    }

    /// The fixed topological order of a layer's vertices.
    #[must_use]
    pub fn layer_order(&self, index: usize) -> &[i64] {
        &self.layer_order[index]
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: i64) -> Option<&SituationNode> {
        self.nodes.get(&id)
    }

    /// Number of nodes across all layers.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &SituationNode> {
        self.nodes.values()
    }

    /// Looks up the relation on the edge `src -> dest`.
    #[must_use]
    pub fn relation(&self, src: i64, dest: i64) -> Option<&SituationRelation> {
        self.relations.get(&(src, dest))
    }

    /// All relations, ordered by `(src, dest)`.
    pub fn relations(&self) -> impl Iterator<Item = &SituationRelation> {
        self.relations.values()
    }

    /// All relations leaving `id`, keyed by destination.
    #[must_use]
    pub fn outgoing_relations(&self, id: i64) -> BTreeMap<i64, SituationRelation> {
        self.relations
            .range((id, i64::MIN)..=(id, i64::MAX))
            .map(|(&(_, dest), relation)| (dest, *relation))
            .collect()
    }

    /// Ids of every operational situation (the bottom layer), in that
    /// layer's topological order.
    #[must_use]
    pub fn operational_situations(&self) -> Vec<i64> {
        match self.layer_order.last() {
            Some(order) => order.clone(),
            None => Vec::new(),
        }
    }

    /// Ids of the operational situations reachable from `top_id` by
    /// walking evidences down to the leaves.
    #[must_use]
    pub fn operational_situations_under(&self, top_id: i64) -> Vec<i64> {
        let mut leaves = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![top_id];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            match self.nodes.get(&id) {
                Some(node) if !node.evidences.is_empty() => {
                    stack.extend(node.evidences.iter().copied());
                }
                Some(node) => leaves.push(node.id),
                None => {}
            }
        }
        leaves
    }

    /// Returns true if a directed path `src -> ... -> dest` exists in
    /// the combined horizontal-plus-vertical edge set.
    #[must_use]
    pub fn is_reachable(&self, src: i64, dest: i64) -> bool {
        match (self.nodes.get(&src), self.nodes.get(&dest)) {
            (Some(s), Some(d)) => self.reach.is_set(s.index as usize, d.index as usize),
            _ => false,
        }
    }
}

impl fmt::Display for SituationGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "situation graph ({} layers):", self.height())?;
        for node in self.nodes.values() {
            writeln!(f, "  {node}")?;
        }
        for relation in self.relations.values() {
            writeln!(f, "  {relation}")?;
        }
        Ok(())
    }
}
