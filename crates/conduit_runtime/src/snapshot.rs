//! Serialisable view of a graph for visualisation tools.
//!
//! Nodes are components, edges connect an output field to every input field
//! bound to the same key.

use std::collections::BTreeSet;

use conduit_component::{Key, Policy};
use serde::Serialize;

use crate::graph::Node;

/// One input field of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSnapshot {
    /// Field name.
    pub name: String,
    /// Bound keys.
    pub keys: Vec<Key>,
    /// Buffering policy.
    #[serde(flatten)]
    pub policy: Policy,
    /// Whether an arrival triggers the component.
    pub trigger: bool,
}

/// One output field of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSnapshot {
    /// Field name.
    pub name: String,
    /// Key the field publishes on.
    pub key: Key,
}

/// One component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    /// Component id.
    pub id: String,
    /// Scheduling variant name.
    pub kind: &'static str,
    /// Period of an iterating component, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_secs: Option<f64>,
    /// Input fields in declaration order.
    pub inputs: Vec<InputSnapshot>,
    /// Output fields in declaration order.
    pub outputs: Vec<OutputSnapshot>,
    /// Prefixes of nested helpers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_components: Vec<String>,
}

/// A link from an output field to an input field sharing its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeSnapshot {
    /// The shared key.
    pub key: Key,
    /// Producing component.
    pub source: String,
    /// Producing output field.
    pub source_field: String,
    /// Consuming component.
    pub target: String,
    /// Consuming input field.
    pub target_field: String,
}

/// Components and their key links.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSnapshot {
    /// Components in registration order.
    pub nodes: Vec<NodeSnapshot>,
    /// Output-to-input links.
    pub edges: Vec<EdgeSnapshot>,
    /// Keys consumed by some field but produced by no component, excluding
    /// framework keys. These can only be fed from outside the graph.
    pub unproduced_keys: Vec<Key>,
}

impl GraphSnapshot {
    pub(crate) fn capture(nodes: &[Node]) -> Self {
        let node_snapshots = nodes
            .iter()
            .map(|n| NodeSnapshot {
                id: n.id.to_string(),
                kind: n.kind.name(),
                period_secs: n.kind.period().map(|p| p.as_secs_f64()),
                inputs: n
                    .fields
                    .inputs
                    .iter()
                    .map(|f| InputSnapshot {
                        name: f.name().to_string(),
                        keys: f.spec().keys().to_vec(),
                        policy: f.spec().policy(),
                        trigger: f.is_trigger(),
                    })
                    .collect(),
                outputs: n
                    .fields
                    .outputs
                    .iter()
                    .map(|f| OutputSnapshot {
                        name: f.name().to_string(),
                        key: f.key().clone(),
                    })
                    .collect(),
                sub_components: n.sub_components.clone(),
            })
            .collect::<Vec<_>>();

        let mut edges = Vec::new();
        let mut produced = BTreeSet::new();
        for source in &node_snapshots {
            for output in &source.outputs {
                produced.insert(output.key.clone());
                for target in &node_snapshots {
                    for input in target.inputs.iter().filter(|i| i.keys.contains(&output.key)) {
                        edges.push(EdgeSnapshot {
                            key: output.key.clone(),
                            source: source.id.clone(),
                            source_field: output.name.clone(),
                            target: target.id.clone(),
                            target_field: input.name.clone(),
                        });
                    }
                }
            }
        }

        let unproduced_keys = node_snapshots
            .iter()
            .flat_map(|n| n.inputs.iter().flat_map(|i| i.keys.iter()))
            .filter(|k| !k.is_internal() && !produced.contains(*k))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Self {
            nodes: node_snapshots,
            edges,
            unproduced_keys,
        }
    }

    /// Look up a component by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
