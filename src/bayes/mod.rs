//! Bayesian-network inference over the situation graph.
//!
//! The engine compiles the graph into a binary network once, then once
//! per reasoning cycle enters the determined instance states as hard
//! evidence, runs one junction-tree pass, and applies the resulting
//! posteriors to the instances that retrospection left undetermined.
//! Inference problems never abort a cycle: they degrade to warnings and
//! a neutral 0.5 posterior.

mod join_tree;
pub mod network;

use std::collections::HashMap;

use tracing::warn;

use crate::error::InferenceWarning;
use crate::evolution::SituationEvolution;
use crate::graph::SituationGraph;
use crate::instance::InstanceState;
use crate::time::SimTime;

use join_tree::JoinTree;
pub use network::{BayesianNetwork, BnNode, Variable, EPS};

/// Posterior fallback when a marginal cannot be computed.
const NEUTRAL_POSTERIOR: f64 = 0.5;

/// The per-model inference engine.
#[derive(Debug, Clone)]
pub struct BayesianEngine {
    network: BayesianNetwork,
    tree: Option<JoinTree>,
}

impl BayesianEngine {
    /// Compiles the network and its junction tree for a graph.
    ///
    /// A graph whose triangulation is too wide to enumerate still
    /// yields an engine; it answers every query with the neutral
    /// posterior and a warning.
    #[must_use]
    pub fn new(graph: &SituationGraph) -> Self {
        let network = BayesianNetwork::from_graph(graph);
        let tree = match JoinTree::compile(&network) {
            Ok(tree) => Some(tree),
            Err(reason) => {
                warn!(%reason, "junction tree compilation failed; falling back to neutral posteriors");
                None
            }
        };
        Self { network, tree }
    }

    /// The compiled network.
    #[must_use]
    pub fn network(&self) -> &BayesianNetwork {
        &self.network
    }

    /// Applies Bayesian refinement to every undetermined instance.
    ///
    /// Determined instances enter as hard evidence; each undetermined
    /// instance receives its posterior as belief and is triggered when
    /// the posterior clears the node threshold and some child has
    /// already completed more triggerings.
    ///
    /// Returns the warnings raised along the way (already logged).
    pub fn refine(
        &self,
        graph: &SituationGraph,
        evolution: &mut SituationEvolution,
        current: SimTime,
    ) -> Vec<InferenceWarning> {
        let undetermined: Vec<i64> = evolution
            .instances()
            .filter(|i| i.state == InstanceState::Undetermined)
            .map(|i| i.id)
            .collect();
        if undetermined.is_empty() {
            return Vec::new();
        }

        let mut evidence: HashMap<usize, bool> = HashMap::new();
        for instance in evolution.instances() {
            if instance.state == InstanceState::Undetermined {
                continue;
            }
            if let Some(index) = self.network.situation_index(instance.id) {
                evidence.insert(index, instance.state == InstanceState::Triggered);
            }
        }

        let marginals = self
            .tree
            .as_ref()
            .map(|tree| tree.marginals(&self.network, &evidence));

        let mut warnings = Vec::new();
        for id in undetermined {
            let posterior = match self.posterior_of(id, marginals.as_deref()) {
                Ok(p) => p,
                Err(reason) => {
                    let warning = InferenceWarning { node_id: id, reason };
                    warn!(node_id = id, reason = %warning.reason, "degraded posterior");
                    warnings.push(warning);
                    NEUTRAL_POSTERIOR
                }
            };

            let Some(node) = graph.node(id) else {
                continue;
            };
            let threshold = node.threshold;
            let counter = match evolution.instance(id) {
                Some(instance) => instance.counter,
                None => continue,
            };
            let has_higher_counter_child = node.evidences.iter().any(|&child| {
                evolution
                    .instance(child)
                    .is_some_and(|c| c.counter > counter)
            });

            if let Some(instance) = evolution.instance_mut(id) {
                instance.belief = posterior;
                instance.belief_updated = true;
                if posterior >= threshold && has_higher_counter_child {
                    instance.trigger(current);
                } else {
                    instance.state = InstanceState::Untriggered;
                }
            }
        }
        warnings
    }

    fn posterior_of(
        &self,
        id: i64,
        marginals: Option<&[Option<[f64; 2]>]>,
    ) -> Result<f64, String> {
        let Some(marginals) = marginals else {
            return Err("no junction tree available".to_string());
        };
        let Some(index) = self.network.situation_index(id) else {
            return Err("situation missing from network".to_string());
        };
        match marginals.get(index) {
            Some(Some([_, p_true])) => Ok(*p_true),
            Some(None) => Err("marginal has no probability mass".to_string()),
            None => Err("marginal index out of range".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph;
    use crate::instance::InstanceState;

    /// P on top with two Or children, the S3/S6 shape.
    fn or_gate_model(w1: f64, w2: f64) -> (SituationGraph, SituationEvolution) {
        let text = format!(
            r#"{{ "layers": [
                [ {{ "ID": 1, "type": 1, "Duration": 100000, "Cycle": "null", "threshold": 0.5,
                    "Children": [ {{ "ID": 2, "Relation": 2, "Weight-y": {w1} }},
                                  {{ "ID": 3, "Relation": 2, "Weight-y": {w2} }} ] }} ],
                [ {{ "ID": 2, "type": 0, "Duration": 100000, "Cycle": "null", "threshold": 0.5 }},
                  {{ "ID": 3, "type": 0, "Duration": 100000, "Cycle": "null", "threshold": 0.5 }} ]
            ] }}"#
        );
        let loaded = graph::from_json_str(&text).unwrap();
        (loaded.graph, loaded.evolution)
    }

    fn mark_triggered(evolution: &mut SituationEvolution, id: i64, current: SimTime) {
        evolution.instance_mut(id).unwrap().trigger(current);
    }

    #[test]
    fn test_refine_skips_when_nothing_undetermined() {
        let (graph, mut evolution) = or_gate_model(0.6, 0.3);
        let engine = BayesianEngine::new(&graph);
        let warnings = engine.refine(&graph, &mut evolution, SimTime::from_secs(1.0));
        assert!(warnings.is_empty());
        assert_eq!(
            evolution.instance(1).unwrap().state,
            InstanceState::Untriggered
        );
        assert!(!evolution.instance(1).unwrap().belief_updated);
    }

    #[test]
    fn test_refine_updates_belief_and_flag() {
        let (graph, mut evolution) = or_gate_model(0.6, 0.3);
        let engine = BayesianEngine::new(&graph);

        mark_triggered(&mut evolution, 2, SimTime::from_secs(1.0));
        evolution.instance_mut(1).unwrap().state = InstanceState::Undetermined;

        let warnings = engine.refine(&graph, &mut evolution, SimTime::from_secs(1.0));
        assert!(warnings.is_empty());

        let parent = evolution.instance(1).unwrap();
        assert!(parent.belief_updated);
        assert!(parent.belief > 0.0 && parent.belief < 1.0);
    }

    #[test]
    fn test_refine_triggers_above_threshold_with_leading_child() {
        // With the off-by-default prior, the posterior of the parent
        // given child-on/child-off evidence is w1(1-w2) / (w1(1-w2) + 1).
        // High w1 and low w2 push it just above a 0.3 threshold.
        let loaded = graph::from_json_str(
            r#"{ "layers": [
                [ { "ID": 1, "type": 1, "Duration": 100000, "Cycle": "null", "threshold": 0.3,
                    "Children": [ { "ID": 2, "Relation": 2, "Weight-y": 0.9 },
                                  { "ID": 3, "Relation": 2, "Weight-y": 0.1 } ] } ],
                [ { "ID": 2, "type": 0, "Duration": 100000, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 3, "type": 0, "Duration": 100000, "Cycle": "null", "threshold": 0.5 } ]
            ] }"#,
        )
        .unwrap();
        let graph = loaded.graph;
        let mut evolution = loaded.evolution;
        mark_triggered(&mut evolution, 2, SimTime::from_secs(1.0));
        evolution.instance_mut(1).unwrap().state = InstanceState::Undetermined;
        let engine = BayesianEngine::new(&graph);
        let warnings = engine.refine(&graph, &mut evolution, SimTime::from_secs(2.0));
        assert!(warnings.is_empty());

        let parent = evolution.instance(1).unwrap();
        // 0.9 * 0.9 / (0.9 * 0.9 + 1) = 0.447 >= 0.3, child counter leads
        assert_eq!(parent.state, InstanceState::Triggered);
        assert_eq!(parent.counter, 1);
        assert_eq!(parent.next_start, SimTime::from_secs(2.0));
    }

    #[test]
    fn test_refine_untriggers_below_threshold() {
        let (graph, mut evolution) = or_gate_model(0.6, 0.3);
        mark_triggered(&mut evolution, 2, SimTime::from_secs(1.0));
        evolution.instance_mut(1).unwrap().state = InstanceState::Undetermined;

        let engine = BayesianEngine::new(&graph);
        engine.refine(&graph, &mut evolution, SimTime::from_secs(2.0));

        let parent = evolution.instance(1).unwrap();
        // 0.6 * 0.7 / (0.6 * 0.7 + 1) = 0.296 < 0.5
        assert_eq!(parent.state, InstanceState::Untriggered);
        assert_eq!(parent.counter, 0);
    }

    #[test]
    fn test_refine_without_leading_child_stays_untriggered() {
        // Posterior clears the threshold but no child counter leads.
        let loaded = graph::from_json_str(
            r#"{ "layers": [
                [ { "ID": 1, "type": 1, "Duration": 100000, "Cycle": "null", "threshold": 0.1,
                    "Children": [ { "ID": 2, "Relation": 2, "Weight-y": 0.9 } ] } ],
                [ { "ID": 2, "type": 0, "Duration": 100000, "Cycle": "null", "threshold": 0.5 } ]
            ] }"#,
        )
        .unwrap();
        let (graph, mut evolution) = (loaded.graph, loaded.evolution);

        // Parent has already counted as many triggerings as the child.
        mark_triggered(&mut evolution, 2, SimTime::from_secs(1.0));
        {
            let parent = evolution.instance_mut(1).unwrap();
            parent.counter = 1;
            parent.state = InstanceState::Undetermined;
        }

        let engine = BayesianEngine::new(&graph);
        engine.refine(&graph, &mut evolution, SimTime::from_secs(2.0));

        let parent = evolution.instance(1).unwrap();
        assert_eq!(parent.state, InstanceState::Untriggered);
        assert_eq!(parent.counter, 1);
    }
}
