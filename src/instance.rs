//! Dynamic per-situation state.
//!
//! A `SituationInstance` is the mutable counterpart of a graph node: its
//! current trigger state, the monotonic count of completed triggerings,
//! the belief accumulated during reasoning, and the timing fields that
//! give a triggered situation its finite lifetime.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::SimTime;

/// Whether a situation is directly observable or hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    /// Observable through a sensor event.
    Normal,
    /// Only inferable from other situations.
    Hidden,
}

/// Trigger state of a situation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Not currently occurring.
    Untriggered,
    /// Currently occurring.
    Triggered,
    /// Retrospection could not decide; deferred to Bayesian refinement.
    Undetermined,
}

impl InstanceState {
    /// Combines two retrospection verdicts.
    ///
    /// Any `Triggered` wins; `Untriggered` beats `Undetermined`; two
    /// `Undetermined` stay undetermined. The operation is commutative
    /// and associative.
    #[must_use]
    pub const fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Triggered, _) | (_, Self::Triggered) => Self::Triggered,
            (Self::Undetermined, Self::Undetermined) => Self::Undetermined,
            _ => Self::Untriggered,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untriggered => write!(f, "untriggered"),
            Self::Triggered => write!(f, "triggered"),
            Self::Undetermined => write!(f, "undetermined"),
        }
    }
}

/// Mutable state of one situation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationInstance {
    /// Id of the corresponding graph node.
    pub id: i64,
    /// Observable or hidden.
    pub kind: InstanceKind,
    /// Current trigger state.
    pub state: InstanceState,
    /// Completed triggerings. Never decreases.
    pub counter: u64,
    /// How long a triggering persists before decaying.
    pub duration: SimTime,
    /// Optional refractory period between triggerings.
    pub cycle: Option<SimTime>,
    /// Start of the most recent triggering.
    pub next_start: SimTime,
    /// Evidence accumulated for this situation, in [0, 1].
    pub belief: f64,
    /// Whether `belief` was refreshed during the current cycle.
    pub belief_updated: bool,
    /// Retrospection verdicts collected during a reasoning cycle.
    /// Empty outside a cycle.
    #[serde(skip)]
    pub(crate) state_buffer: Vec<InstanceState>,
}

impl SituationInstance {
    /// Creates an untriggered instance for node `id`.
    #[must_use]
    pub fn new(id: i64, kind: InstanceKind, duration: SimTime, cycle: Option<SimTime>) -> Self {
        Self {
            id,
            kind,
            state: InstanceState::Untriggered,
            counter: 0,
            duration,
            cycle,
            next_start: SimTime::ZERO,
            belief: 0.0,
            belief_updated: false,
            state_buffer: Vec::new(),
        }
    }

    /// Marks the instance triggered at `current` and counts the
    /// triggering.
    pub(crate) fn trigger(&mut self, current: SimTime) {
        self.state = InstanceState::Triggered;
        self.counter += 1;
        self.next_start = current;
    }

    /// Returns true once the triggering that started at `next_start`
    /// has outlived `duration`.
    #[must_use]
    pub fn is_expired(&self, current: SimTime) -> bool {
        self.next_start + self.duration <= current
    }
}

impl fmt::Display for SituationInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "instance ({}): state {}, counter {}, belief {:.3}, next_start {}",
            self.id, self.state, self.counter, self.belief, self.next_start
        )
    }
}
