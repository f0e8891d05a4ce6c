//! JSON model loader.
//!
//! A model document is `{ "layers": [ [ node, ... ], ... ] }`, top layer
//! first, operational layer last. Node objects carry `ID`, `type`,
//! `Duration` (ms), `Cycle` (ms or the literal string `"null"`),
//! `threshold`, and the optional `Predecessors` / `Children` arrays.
//! Missing arrays are treated as empty and unknown keys are ignored.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::GraphLoadError;
use crate::evolution::SituationEvolution;
use crate::graph::directed::DirectedGraph;
use crate::graph::node::{RelationKind, RelationLogic, SituationNode, SituationRelation};
use crate::graph::reachability::BitMatrix;
use crate::graph::SituationGraph;
use crate::instance::InstanceKind;
use crate::time::SimTime;

#[derive(Debug, Deserialize)]
struct ModelDoc {
    layers: Vec<Vec<NodeDoc>>,
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "type")]
    kind: i64,
    #[serde(rename = "Duration")]
    duration_ms: f64,
    #[serde(rename = "Cycle", default, deserialize_with = "deserialize_cycle")]
    cycle_ms: Option<f64>,
    threshold: f64,
    #[serde(rename = "Predecessors", default)]
    predecessors: Vec<PredecessorDoc>,
    #[serde(rename = "Children", default)]
    children: Vec<ChildDoc>,
}

#[derive(Debug, Deserialize)]
struct PredecessorDoc {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "Relation")]
    relation: i64,
    #[serde(rename = "Weight-x")]
    weight: f64,
}

#[derive(Debug, Deserialize)]
struct ChildDoc {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "Relation")]
    relation: i64,
    #[serde(rename = "Weight-y")]
    weight: f64,
}

/// `Cycle` is either a number of milliseconds, JSON null, or the literal
/// string `"null"` (the model-generator's spelling of "no cycle").
fn deserialize_cycle<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("Cycle is not a finite number")),
        serde_json::Value::String(s) if s == "null" => Ok(None),
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("Cycle string '{s}' is not a number"))),
        other => Err(serde::de::Error::custom(format!(
            "Cycle must be a number or \"null\", got {other}"
        ))),
    }
}

/// A loaded model: the immutable graph plus the instance store seeded
/// from it.
#[derive(Debug)]
pub struct LoadedModel {
    /// The situation graph, immutable from here on.
    pub graph: SituationGraph,
    /// One instance per node, all untriggered.
    pub evolution: SituationEvolution,
}

/// Loads a model document from a file.
///
/// # Errors
///
/// Returns `GraphLoadError` on I/O failure, malformed JSON, or any
/// violation of the model contract.
pub fn from_path(path: impl AsRef<Path>) -> Result<LoadedModel, GraphLoadError> {
    let text = std::fs::read_to_string(path)?;
    from_json_str(&text)
}

/// Loads a model document from a JSON string.
///
/// # Errors
///
/// Returns `GraphLoadError` on malformed JSON or any violation of the
/// model contract.
pub fn from_json_str(text: &str) -> Result<LoadedModel, GraphLoadError> {
    let doc: ModelDoc = serde_json::from_str(text)?;
    build(doc)
}

fn check_unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn build(doc: ModelDoc) -> Result<LoadedModel, GraphLoadError> {
    if doc.layers.iter().all(Vec::is_empty) {
        return Err(GraphLoadError::EmptyModel);
    }

    let mut evolution = SituationEvolution::new();
    let mut nodes: BTreeMap<i64, SituationNode> = BTreeMap::new();
    let mut relations: BTreeMap<(i64, i64), SituationRelation> = BTreeMap::new();
    let mut layers: Vec<DirectedGraph> = Vec::with_capacity(doc.layers.len());
    let mut index: u32 = 0;

    for (layer_no, layer) in doc.layers.iter().enumerate() {
        let mut layer_graph = DirectedGraph::new();

        for node_doc in layer {
            let id = node_doc.id;
            if nodes.contains_key(&id) {
                return Err(GraphLoadError::DuplicateNode { id });
            }
            if !check_unit_interval(node_doc.threshold) {
                return Err(GraphLoadError::InvalidThreshold {
                    id,
                    value: node_doc.threshold,
                });
            }
            let kind = match node_doc.kind {
                0 => InstanceKind::Normal,
                1 => InstanceKind::Hidden,
                other => {
                    return Err(GraphLoadError::Malformed {
                        reason: format!("node {id} has unknown type {other}"),
                    })
                }
            };

            // durations and cycles arrive in milliseconds
            evolution.add_instance(
                id,
                kind,
                SimTime::from_millis(node_doc.duration_ms),
                node_doc.cycle_ms.map(SimTime::from_millis),
            );

            let mut node = SituationNode {
                id,
                index,
                threshold: node_doc.threshold,
                causes: Vec::with_capacity(node_doc.predecessors.len()),
                evidences: Vec::with_capacity(node_doc.children.len()),
            };
            index += 1;

            for pre in &node_doc.predecessors {
                if !check_unit_interval(pre.weight) {
                    return Err(GraphLoadError::InvalidWeight {
                        src: pre.id,
                        dest: id,
                        value: pre.weight,
                    });
                }
                let relation = SituationRelation {
                    src: pre.id,
                    dest: id,
                    kind: RelationKind::Horizontal,
                    logic: RelationLogic::from_code(pre.relation),
                    weight: pre.weight,
                };
                if relations.insert((pre.id, id), relation).is_some() {
                    return Err(GraphLoadError::Malformed {
                        reason: format!("relation {} -> {} declared twice", pre.id, id),
                    });
                }
                node.causes.push(pre.id);
                layer_graph.add_edge(pre.id, id);
            }

            for child in &node_doc.children {
                if !check_unit_interval(child.weight) {
                    return Err(GraphLoadError::InvalidWeight {
                        src: id,
                        dest: child.id,
                        value: child.weight,
                    });
                }
                // A legacy model generator emitted child -> parent edges;
                // such files produce a mirrored key pair.
                if relations.contains_key(&(child.id, id)) {
                    warn!(
                        parent = id,
                        child = child.id,
                        "model declares both directions for a child edge; \
                         possible legacy inverted encoding"
                    );
                }
                let relation = SituationRelation {
                    src: id,
                    dest: child.id,
                    kind: RelationKind::Vertical,
                    logic: RelationLogic::from_code(child.relation),
                    weight: child.weight,
                };
                if relations.insert((id, child.id), relation).is_some() {
                    return Err(GraphLoadError::Malformed {
                        reason: format!("relation {} -> {} declared twice", id, child.id),
                    });
                }
                node.evidences.push(child.id);
            }

            layer_graph.add_vertex(id);
            nodes.insert(id, node);
        }

        if let Err(source) = layer_graph.topological_sort() {
            return Err(GraphLoadError::LayerCycle {
                layer: layer_no,
                source,
            });
        }
        layers.push(layer_graph);
    }

    // Relations may reference nodes declared in any layer, so endpoint
    // validation has to wait until the whole document is parsed.
    for relation in relations.values() {
        for endpoint in [relation.src, relation.dest] {
            if !nodes.contains_key(&endpoint) {
                let referenced_by = if endpoint == relation.src {
                    relation.dest
                } else {
                    relation.src
                };
                return Err(GraphLoadError::UnknownNode {
                    id: endpoint,
                    referenced_by,
                });
            }
        }
    }

    // CPT rows are 2^parents; bound the fan-in before inference can OOM.
    let mut parent_counts: BTreeMap<i64, usize> = BTreeMap::new();
    for (_, dest) in relations.keys() {
        *parent_counts.entry(*dest).or_insert(0) += 1;
    }
    for (id, count) in parent_counts {
        if count > SituationGraph::MAX_PARENTS {
            return Err(GraphLoadError::CapacityExceeded {
                parents_of: id,
                count,
                max: SituationGraph::MAX_PARENTS,
            });
        }
    }

    let mut reach = BitMatrix::new(nodes.len());
    for relation in relations.values() {
        let src = &nodes[&relation.src];
        let dest = &nodes[&relation.dest];
        reach.set(src.index as usize, dest.index as usize);
    }
    reach.close_transitively();

    let graph = SituationGraph::assemble(layers, nodes, relations, reach)?;
    Ok(LoadedModel { graph, evolution })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceState;

    fn minimal_model() -> &'static str {
        r#"{
            "layers": [
                [
                    { "ID": 1, "type": 0, "Duration": 10000, "Cycle": "null",
                      "threshold": 0.5,
                      "Children": [ { "ID": 2, "Relation": 0, "Weight-y": 0.9 } ] }
                ],
                [
                    { "ID": 2, "type": 0, "Duration": 10000, "Cycle": 2000,
                      "threshold": 0.5 }
                ]
            ]
        }"#
    }

    #[test]
    fn test_load_minimal_model() {
        let loaded = from_json_str(minimal_model()).unwrap();
        assert_eq!(loaded.graph.height(), 2);
        assert_eq!(loaded.graph.node_count(), 2);

        let top = loaded.graph.node(1).unwrap();
        assert_eq!(top.evidences, vec![2]);
        assert_eq!(top.index, 0);
        let bottom = loaded.graph.node(2).unwrap();
        assert_eq!(bottom.index, 1);

        let relation = loaded.graph.relation(1, 2).unwrap();
        assert_eq!(relation.kind, RelationKind::Vertical);
        assert_eq!(relation.logic, RelationLogic::Sole);
        assert!((relation.weight - 0.9).abs() < 1e-12);

        let instance = loaded.evolution.instance(2).unwrap();
        assert_eq!(instance.state, InstanceState::Untriggered);
        assert_eq!(instance.duration, SimTime::from_secs(10.0));
        assert_eq!(instance.cycle, Some(SimTime::from_secs(2.0)));
        assert_eq!(loaded.evolution.instance(1).unwrap().cycle, None);
    }

    #[test]
    fn test_missing_arrays_and_unknown_keys_tolerated() {
        let text = r#"{
            "layers": [
                [ { "ID": 5, "type": 1, "Duration": 500, "Cycle": "null",
                    "threshold": 0.3, "Comment": "unknown key" } ]
            ]
        }"#;
        let loaded = from_json_str(text).unwrap();
        let node = loaded.graph.node(5).unwrap();
        assert!(node.causes.is_empty());
        assert!(node.evidences.is_empty());
        assert_eq!(loaded.evolution.instance(5).unwrap().kind, InstanceKind::Hidden);
    }

    #[test]
    fn test_json_null_cycle_accepted() {
        let text = r#"{
            "layers": [
                [ { "ID": 5, "type": 0, "Duration": 500, "Cycle": null,
                    "threshold": 0.3 } ]
            ]
        }"#;
        let loaded = from_json_str(text).unwrap();
        assert_eq!(loaded.evolution.instance(5).unwrap().cycle, None);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let text = r#"{
            "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 } ]
            ]
        }"#;
        let err = from_json_str(text).unwrap_err();
        assert!(matches!(err, GraphLoadError::DuplicateNode { id: 1 }));
    }

    #[test]
    fn test_unknown_predecessor_rejected() {
        let text = r#"{
            "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Predecessors": [ { "ID": 99, "Relation": 2, "Weight-x": 0.5 } ] } ]
            ]
        }"#;
        let err = from_json_str(text).unwrap_err();
        assert!(matches!(err, GraphLoadError::UnknownNode { id: 99, referenced_by: 1 }));
    }

    #[test]
    fn test_layer_cycle_rejected() {
        let text = r#"{
            "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Predecessors": [ { "ID": 2, "Relation": 0, "Weight-x": 0.5 } ] },
                  { "ID": 2, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Predecessors": [ { "ID": 1, "Relation": 0, "Weight-x": 0.5 } ] } ]
            ]
        }"#;
        let err = from_json_str(text).unwrap_err();
        assert!(matches!(err, GraphLoadError::LayerCycle { layer: 0, .. }));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let text = r#"{
            "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 1.5 } ]
            ]
        }"#;
        let err = from_json_str(text).unwrap_err();
        assert!(matches!(err, GraphLoadError::InvalidThreshold { id: 1, .. }));
    }

    #[test]
    fn test_relation_code_fallback_to_sole() {
        let text = r#"{
            "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 },
                  { "ID": 2, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Predecessors": [ { "ID": 1, "Relation": 7, "Weight-x": 0.4 } ] } ]
            ]
        }"#;
        let loaded = from_json_str(text).unwrap();
        assert_eq!(loaded.graph.relation(1, 2).unwrap().logic, RelationLogic::Sole);
    }

    #[test]
    fn test_empty_model_rejected() {
        let err = from_json_str(r#"{ "layers": [ [] ] }"#).unwrap_err();
        assert!(matches!(err, GraphLoadError::EmptyModel));
    }

    #[test]
    fn test_parent_cap_enforced() {
        // 33 bottom causes feeding one effect in the same layer
        let mut causes = String::new();
        let mut nodes = String::new();
        for i in 1..=33 {
            if i > 1 {
                causes.push(',');
                nodes.push(',');
            }
            causes.push_str(&format!(
                r#"{{ "ID": {i}, "Relation": 1, "Weight-x": 0.5 }}"#
            ));
            nodes.push_str(&format!(
                r#"{{ "ID": {i}, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 }}"#
            ));
        }
        let text = format!(
            r#"{{ "layers": [ [ {nodes},
                {{ "ID": 100, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                   "Predecessors": [ {causes} ] }} ] ] }}"#
        );
        let err = from_json_str(&text).unwrap_err();
        assert!(matches!(
            err,
            GraphLoadError::CapacityExceeded { parents_of: 100, count: 33, .. }
        ));
    }

    #[test]
    fn test_reachability_follows_vertical_chain() {
        let text = r#"{
            "layers": [
                [ { "ID": 1, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Children": [ { "ID": 2, "Relation": 0, "Weight-y": 0.9 } ] } ],
                [ { "ID": 2, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5,
                    "Children": [ { "ID": 3, "Relation": 0, "Weight-y": 0.8 } ] } ],
                [ { "ID": 3, "type": 0, "Duration": 100, "Cycle": "null", "threshold": 0.5 } ]
            ]
        }"#;
        let loaded = from_json_str(text).unwrap();
        assert!(loaded.graph.is_reachable(1, 3));
        assert!(!loaded.graph.is_reachable(3, 1));
        assert!(!loaded.graph.is_reachable(1, 1));
    }

    #[test]
    fn test_load_from_path() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(minimal_model().as_bytes()).unwrap();
        let loaded = from_path(file.path()).unwrap();
        assert_eq!(loaded.graph.node_count(), 2);
    }
}
