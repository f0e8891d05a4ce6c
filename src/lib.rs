//! # situsync - Situation Synchronization for Digital Twins
//!
//! situsync is the reasoning core of a digital-twin synchronizer: it
//! consumes low-level sensor events from a physical process and decides,
//! at each time slice, which higher-level situations are occurring, so
//! that a co-running simulation can be driven by the same triggering
//! events.
//!
//! ## Core Concepts
//!
//! - **Situation Graph**: a layered, weighted causal graph loaded once
//!   from JSON; horizontal relations connect causes to effects within a
//!   layer, vertical relations connect parents to their evidence below
//! - **Situation Instance**: the dynamic state of one situation: trigger
//!   state, completed-triggering counter, belief, and lifetime
//! - **Reasoner**: the per-slice pipeline of belief propagation,
//!   backward and downward retrospection, state combination, Bayesian
//!   refinement, and decay
//! - **Operation Generator**: merges buffered operational events into
//!   causally ordered operation sets for the simulation side
//!
//! ## Usage
//!
//! ```rust,ignore
//! use situsync::{Synchronizer, SynchronizerConfig, TimeoutKind, SimTime};
//!
//! let model = situsync::graph::from_path("situation_graph.json")?;
//! let mut sync = Synchronizer::from_model(model, SynchronizerConfig::default());
//!
//! // host receive path
//! sync.ingest(event);
//!
//! // host timer path
//! if let Some(report) = sync.handle_timeout(TimeoutKind::SliceEvaluation, now) {
//!     emit(report.batches);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bayes;
pub mod driver;
pub mod error;
pub mod evolution;
pub mod graph;
pub mod instance;
pub mod operations;
pub mod reasoner;
pub mod time;

// Re-export primary types at crate root for convenience
pub use bayes::BayesianEngine;
pub use driver::{CycleReport, Synchronizer, SynchronizerConfig, TimeoutKind, WireEvent};
pub use error::{
    GraphLoadError, InferenceWarning, SitusyncError, SitusyncResult, TopologyError,
};
pub use evolution::SituationEvolution;
pub use graph::node::{RelationKind, RelationLogic, SituationNode, SituationRelation};
pub use graph::{LoadedModel, SituationGraph};
pub use instance::{InstanceKind, InstanceState, SituationInstance};
pub use operations::{OperationGenerator, OperationalEvent, VirtualOperation};
pub use reasoner::SituationReasoner;
pub use time::SimTime;
