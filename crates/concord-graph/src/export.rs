//! Graph ↔ snapshot round-trip.
//!
//! A [`GraphSnapshot`] is a flat, deterministic rendering of a built graph:
//! every node with its concept/value/provenance attributes and every edge
//! with its direction flag, ordered so that equal graphs always produce
//! byte-equal serializations. The JSON form is what gets handed to
//! external graph visualization/query tooling, and importing a snapshot
//! reconstructs the graph exactly, down to node keys, attributes, and the
//! edge set.

use crate::{ConceptGraph, GraphError, Provenance};
use concord_schema::ConceptSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One exported node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub key: String,
    pub concept: String,
    pub property_name: String,
    pub value: String,
    pub is_identifier: bool,
    pub provenance: Provenance,
}

/// One exported edge. Undirected identifier edges appear once, endpoints
/// in lexicographic key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub directed: bool,
}

/// Deterministic, reversible export form of a [`ConceptGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl ConceptGraph {
    /// Export the full graph in deterministic order.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<NodeRecord> = self
            .nodes()
            .map(|(_, node)| NodeRecord {
                key: node.key(),
                concept: node.concept.clone(),
                property_name: node.property_name.clone(),
                value: node.value.clone(),
                is_identifier: node.is_identifier,
                provenance: node.provenance.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));

        let mut edges = Vec::new();
        for (id, node) in self.nodes() {
            let key = node.key();
            for neighbor in self.id_neighbors(id) {
                // Each undirected pair is emitted once.
                if neighbor <= id {
                    continue;
                }
                let other = self.node(neighbor).key();
                let (source, target) = if key <= other {
                    (key.clone(), other)
                } else {
                    (other, key.clone())
                };
                edges.push(EdgeRecord {
                    source,
                    target,
                    directed: false,
                });
            }
            for target in self.property_targets(id) {
                edges.push(EdgeRecord {
                    source: key.clone(),
                    target: self.node(target).key(),
                    directed: true,
                });
            }
        }
        edges.sort();

        GraphSnapshot { nodes, edges }
    }

    /// Reconstruct a graph from a snapshot.
    ///
    /// Edges are re-inserted verbatim (no connectivity gating), so the
    /// rebuilt edge set is identical to the exported one even where the
    /// original edges have since become transitively redundant.
    pub fn from_snapshot(
        schema: Arc<ConceptSchema>,
        snapshot: &GraphSnapshot,
    ) -> Result<ConceptGraph, GraphError> {
        let mut graph = ConceptGraph::new(schema);

        for record in &snapshot.nodes {
            let id = graph.add_or_get_node(
                &record.property_name,
                &record.value,
                Some(record.provenance.clone()),
            )?;
            let node = graph.node(id);
            if node.key() != record.key
                || node.concept != record.concept
                || node.is_identifier != record.is_identifier
            {
                return Err(GraphError::MalformedSnapshot {
                    detail: format!(
                        "node record `{}` disagrees with the compiled schema",
                        record.key
                    ),
                });
            }
        }

        for edge in &snapshot.edges {
            let source = graph
                .node_id(&edge.source)
                .ok_or_else(|| GraphError::MalformedSnapshot {
                    detail: format!("edge references unknown node `{}`", edge.source),
                })?;
            let target = graph
                .node_id(&edge.target)
                .ok_or_else(|| GraphError::MalformedSnapshot {
                    detail: format!("edge references unknown node `{}`", edge.target),
                })?;
            if edge.directed {
                graph.insert_property_edge(source, target);
            } else {
                graph.insert_id_edge(source, target);
            }
        }

        Ok(graph)
    }
}
