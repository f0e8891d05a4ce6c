//! Orchestration surface for the discrete-event host.
//!
//! The host owns the timers and the transport; this module owns what
//! happens when a timer fires. Wire events arrive either through a
//! bounded channel (cross-thread hosts) or by direct ingestion
//! (single-threaded hosts). At each slice timeout the synchronizer
//! drains its intake, reasons over the buffered triggers, and hands the
//! host a causally ordered queue of operation batches to emit.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::evolution::SituationEvolution;
use crate::graph::{LoadedModel, SituationGraph};
use crate::operations::{OperationGenerator, VirtualOperation};
use crate::reasoner::SituationReasoner;
use crate::time::SimTime;

/// Which host timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// The slice-evaluation timer: reason and generate operations.
    SliceEvaluation,
    /// The cheap state-check timer: decay only.
    StateCheck,
}

/// The event record exchanged with the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Operational situation id.
    pub event_id: i64,
    /// Triggering or releasing.
    pub to_trigger: bool,
    /// Observation time on the simulation clock.
    pub timestamp: SimTime,
    /// Counter snapshot for virtual events; zero for physical ones.
    pub count: i32,
}

/// Timer periods and intake capacity.
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    /// Period of the slice-evaluation timer.
    pub slice_cycle: SimTime,
    /// Period of the state-check timer.
    pub check_cycle: SimTime,
    /// Capacity of the bounded event intake.
    pub event_capacity: usize,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            slice_cycle: SimTime::from_secs(3.0),
            check_cycle: SimTime::from_millis(500.0),
            event_capacity: 1024,
        }
    }
}

/// What one slice evaluation produced.
#[derive(Debug)]
pub struct CycleReport {
    /// Correlation id for logs spanning host and core.
    pub cycle_id: Uuid,
    /// Wall-clock moment the evaluation started.
    pub started_at: DateTime<Utc>,
    /// Simulation time of the slice.
    pub sim_time: SimTime,
    /// Operational situations that fired in the slice.
    pub fired: BTreeSet<i64>,
    /// Operation batches in emission order, deepest causes first.
    pub batches: VecDeque<Vec<VirtualOperation>>,
}

/// Drives the reasoner and the operation generator off host timeouts.
#[derive(Debug)]
pub struct Synchronizer {
    reasoner: SituationReasoner,
    generator: OperationGenerator,
    config: SynchronizerConfig,
    events_tx: Sender<WireEvent>,
    events_rx: Receiver<WireEvent>,
    // per-id count of buffered triggering events, consumed one per slice
    buffer_counters: BTreeMap<i64, u64>,
}

impl Synchronizer {
    /// Creates a synchronizer over a loaded graph and instance store.
    #[must_use]
    pub fn new(
        graph: Arc<SituationGraph>,
        evolution: SituationEvolution,
        config: SynchronizerConfig,
    ) -> Self {
        let (events_tx, events_rx) = bounded(config.event_capacity);
        Self {
            reasoner: SituationReasoner::new(Arc::clone(&graph), evolution),
            generator: OperationGenerator::new(graph),
            config,
            events_tx,
            events_rx,
            buffer_counters: BTreeMap::new(),
        }
    }

    /// Creates a synchronizer straight from a loaded model.
    #[must_use]
    pub fn from_model(model: LoadedModel, config: SynchronizerConfig) -> Self {
        Self::new(Arc::new(model.graph), model.evolution, config)
    }

    /// A handle the host can move to its receive thread.
    #[must_use]
    pub fn event_sender(&self) -> Sender<WireEvent> {
        self.events_tx.clone()
    }

    /// The reasoner and its instance store.
    #[must_use]
    pub fn reasoner(&self) -> &SituationReasoner {
        &self.reasoner
    }

    /// The operation generator.
    #[must_use]
    pub fn generator(&self) -> &OperationGenerator {
        &self.generator
    }

    /// Ingests one wire event directly.
    ///
    /// Every received event would deserve caching for regression; for
    /// now only triggering events are cached and counted.
    pub fn ingest(&mut self, event: WireEvent) {
        if !event.to_trigger {
            return;
        }
        self.generator
            .cache_event(event.event_id, event.to_trigger, event.timestamp);
        *self.buffer_counters.entry(event.event_id).or_insert(0) += 1;
    }

    /// Reacts to a host timer.
    ///
    /// Returns a report for `SliceEvaluation`; `StateCheck` only decays
    /// expired triggerings and returns nothing.
    pub fn handle_timeout(&mut self, kind: TimeoutKind, now: SimTime) -> Option<CycleReport> {
        match kind {
            TimeoutKind::SliceEvaluation => Some(self.evaluate_slice(now)),
            TimeoutKind::StateCheck => {
                self.reasoner.check_state(now);
                None
            }
        }
    }

    /// When the timer of `kind` should fire next.
    #[must_use]
    pub fn next_deadline(&self, kind: TimeoutKind, now: SimTime) -> SimTime {
        match kind {
            TimeoutKind::SliceEvaluation => now + self.config.slice_cycle,
            TimeoutKind::StateCheck => now + self.config.check_cycle,
        }
    }

    fn evaluate_slice(&mut self, now: SimTime) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();

        while let Ok(event) = self.events_rx.try_recv() {
            self.ingest(event);
        }

        // one buffered triggering per id is consumed each slice
        let mut triggered: BTreeSet<i64> = BTreeSet::new();
        for (&id, count) in &mut self.buffer_counters {
            if *count > 0 {
                triggered.insert(id);
                *count -= 1;
            }
        }

        let fired = self.reasoner.reason(&triggered, now);
        let batches = self
            .generator
            .generate_operations(self.reasoner.evolution(), &fired);

        debug!(
            %cycle_id,
            time = %now,
            fired = fired.len(),
            batches = batches.len(),
            "slice evaluated"
        );

        CycleReport {
            cycle_id,
            started_at,
            sim_time: now,
            fired,
            batches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph;

    fn chain_model() -> LoadedModel {
        graph::from_json_str(
            r#"{ "layers": [
                [ { "ID": 1, "type": 1, "Duration": 10000, "Cycle": "null", "threshold": 0.5,
                    "Children": [ { "ID": 2, "Relation": 0, "Weight-y": 0.9 } ] } ],
                [ { "ID": 2, "type": 0, "Duration": 10000, "Cycle": "null", "threshold": 0.5 } ]
            ] }"#,
        )
        .unwrap()
    }

    fn trigger_event(id: i64, at: f64) -> WireEvent {
        WireEvent {
            event_id: id,
            to_trigger: true,
            timestamp: SimTime::from_secs(at),
            count: 0,
        }
    }

    #[test]
    fn test_slice_consumes_one_buffered_trigger() {
        let mut sync = Synchronizer::from_model(chain_model(), SynchronizerConfig::default());
        sync.ingest(trigger_event(2, 0.5));
        sync.ingest(trigger_event(2, 0.7));

        let report = sync
            .handle_timeout(TimeoutKind::SliceEvaluation, SimTime::from_secs(3.0))
            .expect("slice evaluation reports");
        assert_eq!(report.fired, [2].into_iter().collect());
        assert_eq!(report.batches.len(), 1);
        assert_eq!(report.batches[0][0].id, 2);
        assert_eq!(report.batches[0][0].count, 1);

        // the second buffered event feeds the next slice
        let report = sync
            .handle_timeout(TimeoutKind::SliceEvaluation, SimTime::from_secs(6.0))
            .expect("slice evaluation reports");
        assert_eq!(report.fired, [2].into_iter().collect());

        // nothing left afterwards
        let report = sync
            .handle_timeout(TimeoutKind::SliceEvaluation, SimTime::from_secs(9.0))
            .expect("slice evaluation reports");
        assert!(report.fired.is_empty());
        assert!(report.batches.is_empty());
    }

    #[test]
    fn test_untriggering_events_are_not_buffered() {
        let mut sync = Synchronizer::from_model(chain_model(), SynchronizerConfig::default());
        sync.ingest(WireEvent {
            event_id: 2,
            to_trigger: false,
            timestamp: SimTime::from_secs(0.5),
            count: 0,
        });
        let report = sync
            .handle_timeout(TimeoutKind::SliceEvaluation, SimTime::from_secs(3.0))
            .expect("slice evaluation reports");
        assert!(report.fired.is_empty());
        assert_eq!(sync.generator().queue_depth(2), 0);
    }

    #[test]
    fn test_channel_intake_reaches_slice() {
        let mut sync = Synchronizer::from_model(chain_model(), SynchronizerConfig::default());
        let sender = sync.event_sender();
        sender.send(trigger_event(2, 1.0)).unwrap();

        let report = sync
            .handle_timeout(TimeoutKind::SliceEvaluation, SimTime::from_secs(3.0))
            .expect("slice evaluation reports");
        assert_eq!(report.fired, [2].into_iter().collect());
    }

    #[test]
    fn test_state_check_decays_without_report() {
        let mut sync = Synchronizer::from_model(chain_model(), SynchronizerConfig::default());
        sync.ingest(trigger_event(2, 1.0));
        let _ = sync.handle_timeout(TimeoutKind::SliceEvaluation, SimTime::from_secs(3.0));

        let report = sync.handle_timeout(TimeoutKind::StateCheck, SimTime::from_secs(20.0));
        assert!(report.is_none());
        let instance = sync.reasoner().evolution().instance(2).unwrap();
        assert_eq!(
            instance.state,
            crate::instance::InstanceState::Untriggered
        );
        // counters survive decay
        assert_eq!(instance.counter, 1);
    }

    #[test]
    fn test_next_deadline_uses_configured_periods() {
        let sync = Synchronizer::from_model(chain_model(), SynchronizerConfig::default());
        let now = SimTime::from_secs(10.0);
        assert_eq!(
            sync.next_deadline(TimeoutKind::SliceEvaluation, now),
            SimTime::from_secs(13.0)
        );
        assert_eq!(
            sync.next_deadline(TimeoutKind::StateCheck, now),
            SimTime::from_secs(10.5)
        );
    }
}
