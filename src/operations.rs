//! Operation generation for the co-running simulation.
//!
//! Sensor events are cached per situation id. When the driver asks for
//! operations, the generator merges the oldest event of every queue,
//! promotes them to virtual operations carrying the instance counters,
//! and partitions them into causally ordered sets: strict causes that
//! fired in the same slice as their effects are emitted first, so the
//! simulation replays triggerings in dependency order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::evolution::SituationEvolution;
use crate::graph::SituationGraph;
use crate::time::SimTime;

/// A sensor-side event for one operational situation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationalEvent {
    /// The operational situation the event belongs to.
    pub id: i64,
    /// Whether the event reports a triggering or a release.
    pub to_trigger: bool,
    /// Simulation time the event was observed.
    pub timestamp: SimTime,
}

/// An operation to be replayed by the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VirtualOperation {
    /// The operational situation to trigger.
    pub id: i64,
    /// Timestamp of the originating sensor event.
    pub timestamp: SimTime,
    /// The instance counter at emission time, used to line up slices.
    pub count: u64,
}

impl fmt::Display for VirtualOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation ({}): timestamp {}, count {}",
            self.id, self.timestamp, self.count
        )
    }
}

/// Buffers operational events and emits causally ordered operation
/// sets.
#[derive(Debug)]
pub struct OperationGenerator {
    graph: Arc<SituationGraph>,
    queues: BTreeMap<i64, VecDeque<OperationalEvent>>,
    // Retained for synthesising synchronisation-failure events; no
    // events are fabricated from it yet.
    pending_sync_failures: BTreeSet<i64>,
}

impl OperationGenerator {
    /// Creates a generator over a loaded graph.
    #[must_use]
    pub fn new(graph: Arc<SituationGraph>) -> Self {
        Self {
            graph,
            queues: BTreeMap::new(),
            pending_sync_failures: BTreeSet::new(),
        }
    }

    /// Appends an event to the queue of its situation.
    pub fn cache_event(&mut self, id: i64, to_trigger: bool, timestamp: SimTime) {
        self.queues.entry(id).or_default().push_back(OperationalEvent {
            id,
            to_trigger,
            timestamp,
        });
    }

    /// Number of cached events for a situation.
    #[must_use]
    pub fn queue_depth(&self, id: i64) -> usize {
        self.queues.get(&id).map_or(0, VecDeque::len)
    }

    /// Situations recorded by the last cycle for synchronisation-failure
    /// synthesis.
    #[must_use]
    pub fn pending_sync_failures(&self) -> &BTreeSet<i64> {
        &self.pending_sync_failures
    }

    /// Merges the oldest cached event per situation and partitions the
    /// result into a queue of operation sets, deepest causes first.
    ///
    /// `cycle_triggered` is the set of operational situations the
    /// reasoner reported for the slice; it is retained for future
    /// synchronisation-failure synthesis.
    pub fn generate_operations(
        &mut self,
        evolution: &SituationEvolution,
        cycle_triggered: &BTreeSet<i64>,
    ) -> VecDeque<Vec<VirtualOperation>> {
        self.pending_sync_failures = cycle_triggered.clone();

        let mut merged: BTreeMap<i64, OperationalEvent> = BTreeMap::new();
        for (&id, queue) in &mut self.queues {
            if let Some(event) = queue.pop_front() {
                merged.insert(id, event);
            }
        }

        let mut surface: BTreeMap<i64, VirtualOperation> = BTreeMap::new();
        for (id, event) in merged {
            let Some(instance) = evolution.instance(id) else {
                warn!(id, "cached event for unknown situation; dropped");
                continue;
            };
            surface.insert(
                id,
                VirtualOperation {
                    id,
                    timestamp: event.timestamp,
                    count: instance.counter,
                },
            );
        }

        let mut stack: Vec<BTreeMap<i64, VirtualOperation>> = vec![surface];
        loop {
            let Some(top) = stack.last() else { break };

            // Strict causes that belong to the same slice as one of the
            // effects above them migrate one set deeper.
            let mut migrating: BTreeSet<i64> = BTreeSet::new();
            for &effect in top.keys() {
                let Some(effect_count) = evolution.instance(effect).map(|i| i.counter) else {
                    continue;
                };
                for &candidate in top.keys() {
                    if candidate == effect
                        || !self.graph.is_reachable(candidate, effect)
                        || self.graph.is_reachable(effect, candidate)
                    {
                        continue;
                    }
                    let same_slice = evolution
                        .instance(candidate)
                        .is_some_and(|i| i.counter == effect_count);
                    if same_slice {
                        migrating.insert(candidate);
                    }
                }
            }

            if migrating.is_empty() {
                break;
            }
            let Some(top) = stack.last_mut() else { break };
            let mut deeper: BTreeMap<i64, VirtualOperation> = BTreeMap::new();
            for id in migrating {
                if let Some(operation) = top.remove(&id) {
                    deeper.insert(id, operation);
                }
            }
            stack.push(deeper);
        }

        let mut sets: VecDeque<Vec<VirtualOperation>> = VecDeque::new();
        while let Some(map) = stack.pop() {
            if !map.is_empty() {
                sets.push_back(map.into_values().collect());
            }
        }
        sets
    }
}
