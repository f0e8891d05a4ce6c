//! Binary Bayesian network built from a situation graph.
//!
//! The network is an arena of binary nodes with index-based parent
//! lists. Every situation becomes one node; every relation `u -> v`
//! becomes an arc. A node's conditional-probability table is derived
//! from the AND/OR/SOLE semantics of its incoming relations, with a
//! fresh pair of gate nodes introduced when a node mixes conjunctive
//! and disjunctive parents.
//!
//! Tables store `P(v = 1 | parent assignment)` only; the complementary
//! row is implied. Row `r` assigns parent `i` the value of bit `i` of
//! `r`, so the full `2^parents` assignment space is enumerated exactly
//! once.

use std::collections::HashMap;
use std::fmt;

use crate::graph::node::RelationLogic;
use crate::graph::SituationGraph;

/// Probabilities are clamped into `[EPS, 1 - EPS]` so that downstream
/// divisions stay finite.
pub const EPS: f64 = 1e-6;

fn clamp_prob(p: f64) -> f64 {
    p.clamp(EPS, 1.0 - EPS)
}

/// What an arena node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    /// A situation from the graph.
    Situation(i64),
    /// Conjunctive gate collecting a situation's And parents.
    AndGate(i64),
    /// Disjunctive gate collecting a situation's Or parents.
    OrGate(i64),
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Situation(id) => write!(f, "s{id}"),
            Self::AndGate(id) => write!(f, "and_{id}"),
            Self::OrGate(id) => write!(f, "or_{id}"),
        }
    }
}

/// One binary node of the network.
#[derive(Debug, Clone)]
pub struct BnNode {
    /// What this node stands for.
    pub variable: Variable,
    /// Arena indices of the node's parents, in CPT bit order.
    pub parents: Vec<usize>,
    /// `P(v = 1 | assignment)` for each of the `2^parents` rows.
    pub cpt: Vec<f64>,
}

impl BnNode {
    /// `P(v = 1)` under parent assignment `row`.
    #[must_use]
    pub fn p_true(&self, row: usize) -> f64 {
        self.cpt[row]
    }
}

/// The compiled network.
#[derive(Debug, Clone)]
pub struct BayesianNetwork {
    nodes: Vec<BnNode>,
    by_situation: HashMap<i64, usize>,
}

impl BayesianNetwork {
    /// Compiles the network for a situation graph.
    ///
    /// Structure and tables depend only on the graph, so the network is
    /// built once per model and reused across reasoning cycles.
    #[must_use]
    pub fn from_graph(graph: &SituationGraph) -> Self {
        let mut nodes: Vec<BnNode> = Vec::with_capacity(graph.node_count());
        let mut by_situation: HashMap<i64, usize> = HashMap::with_capacity(graph.node_count());

        // Every situation gets its arena slot before any arc is wired,
        // so parent lookups never depend on declaration order.
        for node in graph.nodes() {
            by_situation.insert(node.id, nodes.len());
            nodes.push(BnNode {
                variable: Variable::Situation(node.id),
                parents: Vec::new(),
                cpt: vec![clamp_prob(0.0)],
            });
        }

        for node in graph.nodes() {
            let slot = by_situation[&node.id];

            let mut and_bag: Vec<(usize, f64)> = Vec::new();
            let mut or_bag: Vec<(usize, f64)> = Vec::new();
            let mut soles: Vec<(usize, f64)> = Vec::new();
            let mut incoming = 0usize;

            for relation in graph.relations().filter(|r| r.dest == node.id) {
                let Some(&parent_slot) = by_situation.get(&relation.src) else {
                    continue;
                };
                incoming += 1;
                match relation.logic {
                    RelationLogic::And => and_bag.push((parent_slot, relation.weight)),
                    RelationLogic::Or => or_bag.push((parent_slot, relation.weight)),
                    RelationLogic::Sole => soles.push((parent_slot, relation.weight)),
                }
            }

            if incoming == 0 {
                // unconditioned leaves stay off by default
                continue;
            }

            if incoming == 1 && soles.len() == 1 {
                let (parent_slot, weight) = soles[0];
                nodes[slot].parents = vec![parent_slot];
                nodes[slot].cpt = vec![clamp_prob(0.0), clamp_prob(weight)];
                continue;
            }
            // A Sole relation inside a larger parent set behaves as a
            // one-element conjunction.
            and_bag.extend(soles);

            match (and_bag.is_empty(), or_bag.is_empty()) {
                (false, true) => {
                    let (parents, cpt) = conjunctive_table(&and_bag);
                    nodes[slot].parents = parents;
                    nodes[slot].cpt = cpt;
                }
                (true, false) => {
                    let (parents, cpt) = disjunctive_table(&or_bag);
                    nodes[slot].parents = parents;
                    nodes[slot].cpt = cpt;
                }
                (false, false) => {
                    // Mixed parents: route each bag through its own gate
                    // and conjoin the gates.
                    let (and_parents, and_cpt) = conjunctive_table(&and_bag);
                    let and_gate = nodes.len();
                    nodes.push(BnNode {
                        variable: Variable::AndGate(node.id),
                        parents: and_parents,
                        cpt: and_cpt,
                    });

                    let (or_parents, or_cpt) = disjunctive_table(&or_bag);
                    let or_gate = nodes.len();
                    nodes.push(BnNode {
                        variable: Variable::OrGate(node.id),
                        parents: or_parents,
                        cpt: or_cpt,
                    });

                    nodes[slot].parents = vec![and_gate, or_gate];
                    nodes[slot].cpt = vec![
                        clamp_prob(0.0),
                        clamp_prob(0.0),
                        clamp_prob(0.0),
                        clamp_prob(1.0),
                    ];
                }
                (true, true) => {}
            }
        }

        Self { nodes, by_situation }
    }

    /// All arena nodes.
    #[must_use]
    pub fn nodes(&self) -> &[BnNode] {
        &self.nodes
    }

    /// Number of arena nodes, gates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the network has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Arena index of a situation node.
    #[must_use]
    pub fn situation_index(&self, id: i64) -> Option<usize> {
        self.by_situation.get(&id).copied()
    }
}

/// Table for an all-And parent bag: only the all-ones assignment can
/// switch the child on, with probability `prod(weights)`.
fn conjunctive_table(bag: &[(usize, f64)]) -> (Vec<usize>, Vec<f64>) {
    let parents: Vec<usize> = bag.iter().map(|&(p, _)| p).collect();
    let rows = 1usize << parents.len();
    let product: f64 = bag.iter().map(|&(_, w)| w).product();
    let mut cpt = Vec::with_capacity(rows);
    for row in 0..rows {
        let p = if row == rows - 1 { product } else { 0.0 };
        cpt.push(clamp_prob(p));
    }
    (parents, cpt)
}

/// Table for an all-Or parent bag: any active parent contributes a
/// noisy-or term over exactly the parents set in that assignment.
fn disjunctive_table(bag: &[(usize, f64)]) -> (Vec<usize>, Vec<f64>) {
    let parents: Vec<usize> = bag.iter().map(|&(p, _)| p).collect();
    let rows = 1usize << parents.len();
    let mut cpt = Vec::with_capacity(rows);
    for row in 0..rows {
        let p = if row == 0 {
            0.0
        } else {
            let miss: f64 = bag
                .iter()
                .enumerate()
                .filter(|(bit, _)| row & (1 << bit) != 0)
                .map(|(_, &(_, w))| 1.0 - w)
                .product();
            1.0 - miss
        };
        cpt.push(clamp_prob(p));
    }
    (parents, cpt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph;

    fn load(text: &str) -> SituationGraph {
        graph::from_json_str(text).unwrap().graph
    }

    #[test]
    fn test_orphan_node_is_off_by_default() {
        let g = load(
            r#"{ "layers": [ [
                { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 }
            ] ] }"#,
        );
        let bn = BayesianNetwork::from_graph(&g);
        let idx = bn.situation_index(1).unwrap();
        let node = &bn.nodes()[idx];
        assert!(node.parents.is_empty());
        assert!(node.p_true(0) <= EPS);
    }

    #[test]
    fn test_sole_parent_table() {
        let g = load(
            r#"{ "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Children": [ { "ID": 2, "Relation": 0, "Weight-y": 0.9 } ] } ],
                [ { "ID": 2, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 } ]
            ] }"#,
        );
        let bn = BayesianNetwork::from_graph(&g);
        let child = &bn.nodes()[bn.situation_index(2).unwrap()];
        assert_eq!(child.parents, vec![bn.situation_index(1).unwrap()]);
        assert!((child.p_true(1) - 0.9).abs() < 1e-9);
        assert!(child.p_true(0) <= EPS);
    }

    #[test]
    fn test_all_and_table_enumerates_every_row() {
        let g = load(
            r#"{ "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 2, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 3, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Predecessors": [ { "ID": 1, "Relation": 1, "Weight-x": 0.9 },
                                      { "ID": 2, "Relation": 1, "Weight-x": 0.8 } ] } ]
            ] }"#,
        );
        let bn = BayesianNetwork::from_graph(&g);
        let effect = &bn.nodes()[bn.situation_index(3).unwrap()];
        assert_eq!(effect.cpt.len(), 4);
        assert!((effect.p_true(0b11) - 0.72).abs() < 1e-9);
        assert!(effect.p_true(0b00) <= EPS);
        assert!(effect.p_true(0b01) <= EPS);
        assert!(effect.p_true(0b10) <= EPS);
    }

    #[test]
    fn test_all_or_table_uses_active_parents_only() {
        let g = load(
            r#"{ "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 2, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 3, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Predecessors": [ { "ID": 1, "Relation": 2, "Weight-x": 0.6 },
                                      { "ID": 2, "Relation": 2, "Weight-x": 0.3 } ] } ]
            ] }"#,
        );
        let bn = BayesianNetwork::from_graph(&g);
        let effect = &bn.nodes()[bn.situation_index(3).unwrap()];
        assert_eq!(effect.cpt.len(), 4);
        assert!(effect.p_true(0b00) <= EPS);
        assert!((effect.p_true(0b01) - 0.6).abs() < 1e-9);
        assert!((effect.p_true(0b10) - 0.3).abs() < 1e-9);
        // 1 - 0.4 * 0.7
        assert!((effect.p_true(0b11) - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_parents_introduce_gates() {
        let g = load(
            r#"{ "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 2, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 3, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Predecessors": [ { "ID": 1, "Relation": 1, "Weight-x": 0.9 },
                                      { "ID": 2, "Relation": 2, "Weight-x": 0.6 } ] } ]
            ] }"#,
        );
        let bn = BayesianNetwork::from_graph(&g);
        // three situations plus the two gates
        assert_eq!(bn.len(), 5);
        let effect = &bn.nodes()[bn.situation_index(3).unwrap()];
        assert_eq!(effect.parents.len(), 2);
        assert!(effect.p_true(0b11) >= 1.0 - EPS);
        assert!(effect.p_true(0b01) <= EPS);

        let gates: Vec<&BnNode> = bn
            .nodes()
            .iter()
            .filter(|n| matches!(n.variable, Variable::AndGate(3) | Variable::OrGate(3)))
            .collect();
        assert_eq!(gates.len(), 2);
    }

    #[test]
    fn test_probability_rows_complement_to_one() {
        let g = load(
            r#"{ "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 2, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Predecessors": [ { "ID": 1, "Relation": 2, "Weight-x": 0.4 } ] } ]
            ] }"#,
        );
        let bn = BayesianNetwork::from_graph(&g);
        for node in bn.nodes() {
            for row in 0..node.cpt.len() {
                let p1 = node.p_true(row);
                let p0 = 1.0 - p1;
                assert!((p0 + p1 - 1.0).abs() < 1e-9);
                assert!((0.0..=1.0).contains(&p1));
            }
        }
    }
}
