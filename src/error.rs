//! Error types for situsync.
//!
//! All errors are strongly typed using thiserror. Load-time errors are
//! fatal and surfaced to the host; per-cycle inference problems are
//! recoverable warnings that never propagate out of a reasoning cycle.

use thiserror::Error;

/// Topology failures raised while ordering a layer graph.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// A directed cycle was found during topological sort.
    #[error("Directed cycle detected at vertex {vertex}")]
    CycleDetected {
        /// A vertex on the cycle.
        vertex: i64,
    },
}

/// Fatal errors raised while loading a situation-graph model.
#[derive(Debug, Error)]
pub enum GraphLoadError {
    /// The document could not be read from disk.
    #[error("Failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid JSON or misses required fields.
    #[error("Failed to parse model document: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed but violates the model contract.
    #[error("Malformed model: {reason}")]
    Malformed {
        /// What was wrong.
        reason: String,
    },

    /// The same node id was declared twice.
    #[error("Duplicate node id {id}")]
    DuplicateNode {
        /// The repeated id.
        id: i64,
    },

    /// A relation references a node the document never declares.
    #[error("Node {referenced_by} references unknown node {id}")]
    UnknownNode {
        /// The missing id.
        id: i64,
        /// The declaring node.
        referenced_by: i64,
    },

    /// A single layer contains a directed cycle.
    #[error("Layer {layer} is not acyclic: {source}")]
    LayerCycle {
        /// Index of the offending layer (0 = top).
        layer: usize,
        /// The underlying topology failure.
        source: TopologyError,
    },

    /// A node's threshold is outside [0, 1].
    #[error("Node {id} has threshold {value} outside [0, 1]")]
    InvalidThreshold {
        /// The offending node.
        id: i64,
        /// The invalid value.
        value: f64,
    },

    /// A relation weight is outside [0, 1].
    #[error("Relation {src} -> {dest} has weight {value} outside [0, 1]")]
    InvalidWeight {
        /// Relation source.
        src: i64,
        /// Relation destination.
        dest: i64,
        /// The invalid value.
        value: f64,
    },

    /// A node has more incoming relations than the inference engine
    /// can enumerate (CPT rows are 2^parents).
    #[error("Node {parents_of} has {count} parents, exceeding the limit of {max}")]
    CapacityExceeded {
        /// The overloaded node.
        parents_of: i64,
        /// How many parents it has.
        count: usize,
        /// The enforced bound.
        max: usize,
    },

    /// The document declares no layers or no nodes.
    #[error("Model declares no situations")]
    EmptyModel,
}

/// A recoverable inference problem.
///
/// Warnings are logged and the affected posterior is treated as 0.5;
/// they are never propagated out of a reasoning cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceWarning {
    /// The node whose posterior could not be computed.
    pub node_id: i64,
    /// Why inference degraded.
    pub reason: String,
}

impl std::fmt::Display for InferenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inference warning for node {}: {}", self.node_id, self.reason)
    }
}

/// Top-level error type for situsync.
#[derive(Debug, Error)]
pub enum SitusyncError {
    /// Model loading failed.
    #[error("Graph load error: {0}")]
    GraphLoad(#[from] GraphLoadError),

    /// A layer graph could not be ordered.
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Internal invariant violation.
    #[error("Internal error: {message}")]
    Internal {
        /// Error description.
        message: String,
    },
}

impl SitusyncError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error was raised at model-load time.
    #[must_use]
    pub const fn is_load_error(&self) -> bool {
        matches!(self, Self::GraphLoad(_))
    }
}

/// Result type alias for situsync operations.
pub type SitusyncResult<T> = Result<T, SitusyncError>;
