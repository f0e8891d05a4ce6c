//! The situation reasoner.
//!
//! One call to [`SituationReasoner::reason`] evaluates a single time
//! slice: seed the operational layer from the sensor events, propagate
//! counters and beliefs up the layers, retrospect backward within each
//! layer and downward across layers, combine the collected verdicts,
//! refine what is left undetermined with the Bayesian engine, and
//! finally decay expired triggerings. All mutation happens on a scratch
//! copy of the instance store and commits when the cycle returns, so an
//! aborted cycle leaves no trace.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::bayes::BayesianEngine;
use crate::evolution::SituationEvolution;
use crate::graph::node::{RelationKind, RelationLogic, SituationRelation};
use crate::graph::SituationGraph;
use crate::instance::InstanceState;
use crate::time::SimTime;

/// Belief assigned to a triggered situation with no vertical children;
/// the expert measure for directly observed evidence.
const EXPERT_BELIEF: f64 = 0.8;

/// Dempster denominators below this are treated as total conflict.
const DEMPSTER_FLOOR: f64 = 1e-9;

/// Combines two bodies of evidence with Dempster's rule, treating
/// near-total conflict as no support at all.
#[must_use]
pub fn dempster_combine(a: f64, b: f64) -> f64 {
    let conflict = a * (1.0 - b) + (1.0 - a) * b;
    let denominator = 1.0 - conflict;
    if denominator < DEMPSTER_FLOOR {
        0.0
    } else {
        (a * b) / denominator
    }
}

fn dempster_fold(beliefs: &[f64]) -> f64 {
    let mut combined = beliefs[0];
    for &next in &beliefs[1..] {
        let conflict = combined * (1.0 - next) + (1.0 - combined) * next;
        let denominator = 1.0 - conflict;
        if denominator < DEMPSTER_FLOOR {
            return 0.0;
        }
        combined = (combined * next) / denominator;
    }
    combined
}

/// Per-model reasoner owning the instance store.
#[derive(Debug)]
pub struct SituationReasoner {
    graph: Arc<SituationGraph>,
    evolution: SituationEvolution,
    engine: BayesianEngine,
}

impl SituationReasoner {
    /// Creates a reasoner for a loaded model.
    #[must_use]
    pub fn new(graph: Arc<SituationGraph>, evolution: SituationEvolution) -> Self {
        let engine = BayesianEngine::new(&graph);
        Self {
            graph,
            evolution,
            engine,
        }
    }

    /// The shared graph.
    #[must_use]
    pub fn graph(&self) -> &SituationGraph {
        &self.graph
    }

    /// Read access to the instance store.
    #[must_use]
    pub fn evolution(&self) -> &SituationEvolution {
        &self.evolution
    }

    /// Evaluates one time slice.
    ///
    /// `triggered` holds the operational situations whose sensor events
    /// arrived during the slice. Returns the operational situations
    /// that fired in this slice, i.e. that are triggered with a start
    /// time of `current` once the cycle completes.
    pub fn reason(&mut self, triggered: &BTreeSet<i64>, current: SimTime) -> BTreeSet<i64> {
        debug!(time = %current, seeds = triggered.len(), "reasoning cycle start");

        let mut scratch = self.evolution.clone();
        for instance in scratch.instances_mut() {
            instance.belief_updated = false;
        }

        self.seed_operational(&mut scratch, triggered, current);
        self.propagate_counters(&mut scratch, current);
        self.propagate_beliefs(&mut scratch);
        self.backward_retrospection(&mut scratch);
        self.downward_retrospection(&mut scratch);
        Self::combine_states(&mut scratch);
        let warnings = self.engine.refine(&self.graph, &mut scratch, current);
        Self::decay(&mut scratch, current);

        let fired = self.fired_operational(&scratch, current);
        debug!(
            fired = fired.len(),
            warnings = warnings.len(),
            "reasoning cycle complete"
        );

        self.evolution = scratch;
        fired
    }

    /// Applies only the decay rule: triggerings past their duration
    /// fall back to untriggered. Counters are untouched.
    pub fn check_state(&mut self, current: SimTime) {
        Self::decay(&mut self.evolution, current);
    }

    /// Seed the bottom layer from the slice's sensor events.
    fn seed_operational(
        &self,
        scratch: &mut SituationEvolution,
        triggered: &BTreeSet<i64>,
        current: SimTime,
    ) {
        let bottom = self.graph.height() - 1;
        for &id in self.graph.layer_order(bottom) {
            if triggered.contains(&id) {
                if let Some(instance) = scratch.instance_mut(id) {
                    instance.trigger(current);
                }
            }
        }
    }

    /// An upper situation triggers once every child has completed more
    /// triggerings than it has.
    fn propagate_counters(&self, scratch: &mut SituationEvolution, current: SimTime) {
        for layer in (0..self.graph.height() - 1).rev() {
            for &upper in self.graph.layer_order(layer) {
                let Some(node) = self.graph.node(upper) else {
                    continue;
                };
                let Some(counter) = scratch.instance(upper).map(|i| i.counter) else {
                    continue;
                };
                let all_children_lead = node.evidences.iter().all(|&child| {
                    scratch
                        .instance(child)
                        .is_some_and(|c| c.counter > counter)
                });
                if all_children_lead {
                    if let Some(instance) = scratch.instance_mut(upper) {
                        instance.trigger(current);
                    }
                }
            }
        }
    }

    /// Bottom-up belief propagation with Dempster combination, buffering
    /// a threshold verdict for every non-operational situation.
    fn propagate_beliefs(&self, scratch: &mut SituationEvolution) {
        let bottom = self.graph.height() - 1;
        for layer in (0..self.graph.height()).rev() {
            for &id in self.graph.layer_order(layer) {
                let Some(node) = self.graph.node(id) else {
                    continue;
                };

                let children: Vec<&SituationRelation> = node
                    .evidences
                    .iter()
                    .filter_map(|&child| self.graph.relation(id, child))
                    .filter(|r| r.kind == RelationKind::Vertical)
                    .collect();

                let belief = if children.is_empty() {
                    let triggered = scratch
                        .instance(id)
                        .is_some_and(|i| i.state == InstanceState::Triggered);
                    if triggered {
                        EXPERT_BELIEF
                    } else {
                        0.0
                    }
                } else {
                    let weighted = |relation: &SituationRelation| -> f64 {
                        let child_belief = scratch
                            .instance(relation.dest)
                            .map_or(0.0, |i| i.belief);
                        child_belief * relation.weight
                    };

                    if children.len() == 1 && children[0].logic == RelationLogic::Sole {
                        weighted(children[0])
                    } else {
                        // Sole relations inside a larger evidence set
                        // combine as one-element conjunctions.
                        let disjunctive: Vec<f64> = children
                            .iter()
                            .filter(|r| r.logic == RelationLogic::Or)
                            .map(|r| weighted(r))
                            .collect();
                        let conjunctive: Vec<f64> = children
                            .iter()
                            .filter(|r| r.logic != RelationLogic::Or)
                            .map(|r| weighted(r))
                            .collect();

                        let or_belief = disjunctive.iter().copied().fold(0.0, f64::max);
                        match (conjunctive.is_empty(), disjunctive.is_empty()) {
                            (true, false) => or_belief,
                            (false, true) => dempster_fold(&conjunctive),
                            (false, false) => {
                                dempster_combine(dempster_fold(&conjunctive), or_belief)
                            }
                            (true, true) => 0.0,
                        }
                    }
                };

                let Some(instance) = scratch.instance_mut(id) else {
                    continue;
                };
                instance.belief = belief;
                if layer == bottom {
                    // seeded states are authoritative for the bottom layer
                    let state = instance.state;
                    instance.state_buffer.push(state);
                } else if belief > node.threshold {
                    instance.state_buffer.push(InstanceState::Triggered);
                } else {
                    instance.state_buffer.push(InstanceState::Untriggered);
                }
            }
        }
    }

    /// Intra-layer retrospection from triggered effects back to their
    /// causes.
    fn backward_retrospection(&self, scratch: &mut SituationEvolution) {
        for layer in 0..self.graph.height() {
            let order = self.graph.layer_order(layer);
            let mut worklist: VecDeque<i64> = order
                .iter()
                .rev()
                .copied()
                .filter(|&id| {
                    scratch
                        .instance(id)
                        .is_some_and(|i| i.state == InstanceState::Triggered)
                })
                .collect();
            let mut enqueued: HashSet<i64> = worklist.iter().copied().collect();

            while let Some(effect) = worklist.pop_front() {
                let Some(node) = self.graph.node(effect) else {
                    continue;
                };
                for &cause in &node.causes {
                    let is_horizontal = self
                        .graph
                        .relation(cause, effect)
                        .is_some_and(|r| r.kind == RelationKind::Horizontal);
                    if !is_horizontal {
                        continue;
                    }
                    let Some(cause_state) = scratch.instance(cause).map(|i| i.state) else {
                        continue;
                    };
                    match cause_state {
                        InstanceState::Untriggered => {
                            let verdict = self.determine_cause_state(scratch, cause, effect);
                            if let Some(instance) = scratch.instance_mut(cause) {
                                instance.state_buffer.push(verdict);
                            }
                            if verdict == InstanceState::Triggered && enqueued.insert(cause) {
                                worklist.push_back(cause);
                            }
                        }
                        InstanceState::Triggered => {
                            if enqueued.insert(cause) {
                                worklist.push_back(cause);
                            }
                        }
                        InstanceState::Undetermined => {}
                    }
                }
            }
        }
    }

    /// Decides whether a currently untriggered cause must have occurred
    /// for `effect` to be triggered.
    fn determine_cause_state(
        &self,
        scratch: &SituationEvolution,
        cause: i64,
        effect: i64,
    ) -> InstanceState {
        let effect_triggered = scratch
            .instance(effect)
            .is_some_and(|i| i.state == InstanceState::Triggered);
        if !effect_triggered {
            return InstanceState::Undetermined;
        }

        // the effect has no other explanation
        let horizontal_causes = self
            .graph
            .node(effect)
            .map_or(0, |node| {
                node.causes
                    .iter()
                    .filter(|&&c| {
                        self.graph
                            .relation(c, effect)
                            .is_some_and(|r| r.kind == RelationKind::Horizontal)
                    })
                    .count()
            });
        if horizontal_causes == 1 {
            return InstanceState::Triggered;
        }

        let outgoing: Vec<SituationRelation> = self
            .graph
            .outgoing_relations(cause)
            .into_values()
            .filter(|r| r.kind == RelationKind::Horizontal)
            .collect();

        // a purely disjunctive cause may fire without further witnesses
        if outgoing
            .iter()
            .all(|r| r.logic == RelationLogic::Or)
        {
            return InstanceState::Triggered;
        }

        // a purely conjunctive cause fires only if no sibling effect
        // contradicts it
        let all_and = outgoing.iter().all(|r| r.logic == RelationLogic::And);
        if all_and {
            let siblings_untriggered = outgoing
                .iter()
                .filter(|r| r.dest != effect)
                .all(|r| {
                    scratch
                        .instance(r.dest)
                        .is_some_and(|i| i.state == InstanceState::Untriggered)
                });
            if siblings_untriggered {
                return InstanceState::Triggered;
            }
        }

        InstanceState::Undetermined
    }

    /// Top-down retrospection from triggered parents onto their
    /// vertical children.
    fn downward_retrospection(&self, scratch: &mut SituationEvolution) {
        // children promoted by a triggered verdict seed the next layer
        let mut promoted: HashSet<i64> = HashSet::new();

        for layer in 0..self.graph.height() {
            let order = self.graph.layer_order(layer);
            let mut worklist: VecDeque<i64> = order
                .iter()
                .copied()
                .filter(|&id| {
                    promoted.contains(&id)
                        || scratch
                            .instance(id)
                            .is_some_and(|i| i.state == InstanceState::Triggered)
                })
                .collect();

            while let Some(parent) = worklist.pop_front() {
                let Some(node) = self.graph.node(parent) else {
                    continue;
                };
                for &child in &node.evidences {
                    let is_vertical = self
                        .graph
                        .relation(parent, child)
                        .is_some_and(|r| r.kind == RelationKind::Vertical);
                    if !is_vertical {
                        continue;
                    }
                    let verdict = self.determine_child_state(scratch, parent, child);
                    if let Some(instance) = scratch.instance_mut(child) {
                        instance.state_buffer.push(verdict);
                    }
                    if verdict == InstanceState::Triggered {
                        // vertical children live one layer down; they
                        // cascade when their own layer is reached
                        promoted.insert(child);
                    }
                }
            }
        }
    }

    /// Decides whether a triggered parent implies a particular child.
    fn determine_child_state(
        &self,
        scratch: &SituationEvolution,
        parent: i64,
        child: i64,
    ) -> InstanceState {
        let parent_triggered = scratch
            .instance(parent)
            .is_some_and(|i| i.state == InstanceState::Triggered);
        if !parent_triggered {
            return InstanceState::Undetermined;
        }

        let vertical: Vec<SituationRelation> = self
            .graph
            .outgoing_relations(parent)
            .into_values()
            .filter(|r| r.kind == RelationKind::Vertical)
            .collect();

        // the parent's only evidence
        if vertical.len() == 1 {
            return InstanceState::Triggered;
        }

        let sibling_state = |want: InstanceState| {
            vertical.iter().filter(|r| r.dest != child).all(|r| {
                scratch
                    .instance(r.dest)
                    .is_some_and(|i| i.state == want)
            })
        };

        // disjunctive evidence: this child is the remaining explanation
        if vertical.iter().all(|r| r.logic == RelationLogic::Or)
            && sibling_state(InstanceState::Untriggered)
        {
            return InstanceState::Triggered;
        }

        // conjunctive evidence: every sibling already fired
        if vertical.iter().all(|r| r.logic == RelationLogic::And)
            && sibling_state(InstanceState::Triggered)
        {
            return InstanceState::Triggered;
        }

        InstanceState::Undetermined
    }

    /// Folds each instance's buffered verdicts into its state.
    fn combine_states(scratch: &mut SituationEvolution) {
        for instance in scratch.instances_mut() {
            if instance.state_buffer.is_empty() {
                continue;
            }
            let mut combined = instance.state_buffer[0];
            for &verdict in &instance.state_buffer[1..] {
                combined = combined.combine(verdict);
            }
            instance.state = combined;
            instance.state_buffer.clear();
        }
    }

    /// Triggerings older than their duration fall back to untriggered.
    fn decay(store: &mut SituationEvolution, current: SimTime) {
        for instance in store.instances_mut() {
            if instance.is_expired(current) {
                instance.state = InstanceState::Untriggered;
            }
        }
    }

    /// Bottom-layer situations that fired in this very slice.
    fn fired_operational(&self, scratch: &SituationEvolution, current: SimTime) -> BTreeSet<i64> {
        let bottom = self.graph.height() - 1;
        self.graph
            .layer_order(bottom)
            .iter()
            .copied()
            .filter(|&id| {
                scratch.instance(id).is_some_and(|i| {
                    i.state == InstanceState::Triggered && i.next_start == current
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dempster_combine_matches_worked_example() {
        // weighted beliefs 0.72 and 0.64: conflict 0.4384
        let combined = dempster_combine(0.72, 0.64);
        assert!((combined - 0.4608 / 0.5616).abs() < 1e-9);
    }

    #[test]
    fn test_dempster_commutative() {
        let ab = dempster_combine(0.3, 0.8);
        let ba = dempster_combine(0.8, 0.3);
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn test_dempster_associative_without_total_conflict() {
        let values = [0.72, 0.64, 0.56];
        let left = dempster_combine(dempster_combine(values[0], values[1]), values[2]);
        let right = dempster_combine(values[0], dempster_combine(values[1], values[2]));
        assert!((left - right).abs() < 1e-9);
    }

    #[test]
    fn test_dempster_total_conflict_collapses_to_zero() {
        // 1.0 against 0.0 is pure conflict: denominator 0
        assert_eq!(dempster_combine(1.0, 0.0), 0.0);
    }

    #[test]
    fn test_dempster_fold_stops_on_conflict() {
        assert_eq!(dempster_fold(&[1.0, 0.0, 0.9]), 0.0);
        let folded = dempster_fold(&[0.72, 0.64, 0.56]);
        assert!(folded > 0.5);
        assert!((folded - 0.8532).abs() < 1e-3);
    }
}
