//! Situation nodes and the typed, weighted relations between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Orientation of a relation in the layered graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Cause to effect within a single layer.
    Horizontal,
    /// Parent to child across adjacent layers; the child is evidence
    /// for the parent.
    Vertical,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Horizontal => write!(f, "H"),
            Self::Vertical => write!(f, "V"),
        }
    }
}

/// Logical composition of a relation's contribution to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationLogic {
    /// The single determining influence.
    Sole,
    /// Conjunctive: all such influences must hold together.
    And,
    /// Disjunctive: any one such influence suffices.
    Or,
}

impl RelationLogic {
    /// Maps a model-file relation code. `1` is And, `2` is Or and any
    /// other value falls back to Sole.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::And,
            2 => Self::Or,
            _ => Self::Sole,
        }
    }
}

impl fmt::Display for RelationLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sole => write!(f, "sole"),
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
        }
    }
}

/// A directed, weighted edge between two situations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SituationRelation {
    /// Source node id.
    pub src: i64,
    /// Destination node id.
    pub dest: i64,
    /// Intra-layer (H) or cross-layer (V).
    pub kind: RelationKind,
    /// How this edge composes with siblings targeting `dest`.
    pub logic: RelationLogic,
    /// Strength of the influence, in [0, 1].
    pub weight: f64,
}

impl fmt::Display for SituationRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relation {} -> {} ({}, {}, weight {})",
            self.src, self.dest, self.kind, self.logic, self.weight
        )
    }
}

/// A situation in the layered graph. Static after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationNode {
    /// Stable id from the model file.
    pub id: i64,
    /// Dense index used by the reachability matrix.
    pub index: u32,
    /// Belief threshold for triggering, in [0, 1].
    pub threshold: f64,
    /// Incoming horizontal causes, in declaration order.
    pub causes: Vec<i64>,
    /// Vertical children in the layer below, in declaration order.
    pub evidences: Vec<i64>,
}

impl fmt::Display for SituationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "situation ({}): index {}, threshold {}, causes {:?}, evidences {:?}",
            self.id, self.index, self.threshold, self.causes, self.evidences
        )
    }
}
