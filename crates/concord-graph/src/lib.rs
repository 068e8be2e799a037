//! Concept property graph built from canonical tabular extracts.
//!
//! Every cell of every ingested table becomes (at most) one
//! [`PropertyNode`]: a canonical property name paired with a value,
//! carrying the provenance of the file/row/column it came from. Nodes are
//! keyed by `property_name|value`; re-inserting an existing key is a no-op,
//! so records from unrelated files that mention the same identifier value
//! collapse onto one node. That exact-value collapse is the *only* join
//! used to unify per-file extracts into one cross-file entity graph.
//!
//! Edge discipline keeps the graph minimal and queryable:
//! - identifier↔identifier edges are undirected and connectivity-gated: an
//!   edge is added only when no path already connects its endpoints, so the
//!   graph never holds a redundant transitive shortcut;
//! - identifier→property edges are directed and idempotent; property nodes
//!   are pure sinks (never a source of any edge).
//!
//! The graph is built once, sequentially, then frozen; validation and
//! downstream translation only read it.

pub mod export;

use ahash::AHashMap;
use concord_schema::{ConceptSchema, SchemaValidationError, DELIMITER};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

pub use export::{EdgeRecord, GraphSnapshot, NodeRecord};

/// Dense node handle, assigned in insertion order.
pub type NodeId = u32;

// ============================================================================
// Provenance
// ============================================================================

/// Where a value came from. Any subset of fields may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// URL of the extract configuration that produced the table.
    pub extract_config_url: Option<String>,
    /// URL (or path) of the source file.
    pub source_url: Option<String>,
    /// Row index within the source table.
    pub row: Option<u64>,
    /// Column index within the source table.
    pub col: Option<u64>,
}

impl Provenance {
    /// Delimiter-joined provenance fields, or `None` when any field is
    /// absent (an incomplete provenance has no stable uid).
    pub fn uid(&self) -> Option<String> {
        let extract = self.extract_config_url.as_deref()?;
        let source = self.source_url.as_deref()?;
        let row = self.row?;
        let col = self.col?;
        Some(format!(
            "{extract}{d}{source}{d}{row}{d}{col}",
            d = DELIMITER
        ))
    }
}

// ============================================================================
// Property node
// ============================================================================

/// The atomic graph unit: one canonical property name paired with one
/// value. `concept` and `is_identifier` are derived from the schema at
/// construction; provenance is metadata and never part of identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyNode {
    pub concept: String,
    pub property_name: String,
    pub value: String,
    pub is_identifier: bool,
    pub provenance: Provenance,
}

impl PropertyNode {
    /// Construct a node, normalizing and checking `name` against the
    /// schema. Fails when `name` is not a valid concept string.
    pub fn new(
        schema: &ConceptSchema,
        name: &str,
        value: &str,
        provenance: Option<Provenance>,
    ) -> Result<Self, SchemaValidationError> {
        let property_name = schema.validate_concept_string(name)?;
        let is_identifier = schema.is_identifier(&property_name)?;
        let concept = schema.concept_of(&property_name).to_string();
        Ok(Self {
            concept,
            property_name,
            value: value.to_string(),
            is_identifier,
            provenance: provenance.unwrap_or_default(),
        })
    }

    /// Node identity: `property_name|value`.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.property_name, DELIMITER, self.value)
    }

    /// Stable origin id, present only when provenance is complete.
    pub fn uid(&self) -> Option<String> {
        self.provenance.uid()
    }
}

impl PartialEq for PropertyNode {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PropertyNode {}

impl Hash for PropertyNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

// ============================================================================
// Canonical tables
// ============================================================================

/// One canonical tabular extract: rectangular, with every column already
/// named by a concept property path. Blank cells are `None` and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSource {
    pub source_url: String,
    pub extract_config_url: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl TableSource {
    pub fn new(source_url: &str, columns: &[&str]) -> Self {
        Self {
            source_url: source_url.to_string(),
            extract_config_url: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn extract_config(mut self, url: &str) -> Self {
        self.extract_config_url = Some(url.to_string());
        self
    }

    /// Append a row with every cell present.
    pub fn row(mut self, cells: &[&str]) -> Self {
        self.rows
            .push(cells.iter().map(|c| Some(c.to_string())).collect());
        self
    }

    /// Append a row where some cells may be blank.
    pub fn sparse_row(mut self, cells: &[Option<&str>]) -> Self {
        self.rows
            .push(cells.iter().map(|c| c.map(str::to_string)).collect());
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum GraphError {
    /// A column name failed schema validation. Aborts ingestion of the
    /// offending source before any of its rows are consumed.
    #[error("invalid column `{column}` in `{source_url}`: {source}")]
    InvalidColumn {
        source_url: String,
        column: String,
        #[source]
        source: SchemaValidationError,
    },

    #[error("no node with key `{key}`")]
    NodeNotFound { key: String },

    /// An identifier value is already indexed for this concept under a
    /// different key. Schema compilation should have made this impossible,
    /// so it indicates an upstream defect and is fatal.
    #[error(
        "identifier value `{value}` of concept {concept} is claimed by both \
         `{existing_key}` and `{new_key}`"
    )]
    IdentifierCollision {
        concept: String,
        value: String,
        existing_key: String,
        new_key: String,
    },

    /// A snapshot being imported disagrees with itself or with the
    /// compiled schema.
    #[error("malformed graph snapshot: {detail}")]
    MalformedSnapshot { detail: String },

    #[error(transparent)]
    Schema(#[from] SchemaValidationError),
}

// ============================================================================
// Union-find (connectivity gate)
// ============================================================================

/// Disjoint-set forest over node ids, path compression + union by rank.
/// Backs the reachability check performed on every identifier edge insert.
#[derive(Debug, Clone, Default)]
struct DisjointSet {
    parent: Vec<NodeId>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn push(&mut self) -> NodeId {
        let id = self.parent.len() as NodeId;
        self.parent.push(id);
        self.rank.push(0);
        id
    }

    fn find(&mut self, mut x: NodeId) -> NodeId {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    /// Read-only root lookup, for `&self` connectivity queries.
    fn find_no_compress(&self, mut x: NodeId) -> NodeId {
        while self.parent[x as usize] != x {
            x = self.parent[x as usize];
        }
        x
    }

    fn union(&mut self, a: NodeId, b: NodeId) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (hi, lo) = if self.rank[ra as usize] >= self.rank[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[lo as usize] = hi;
        if self.rank[hi as usize] == self.rank[lo as usize] {
            self.rank[hi as usize] += 1;
        }
        true
    }
}

// ============================================================================
// Concept property graph
// ============================================================================

/// The mutable graph, built incrementally from canonical tables and frozen
/// before validation.
///
/// Storage is a dense arena: nodes live in insertion order, all indexes
/// reference them by [`NodeId`]. The public API speaks keys and
/// [`PropertyNode`] references.
#[derive(Debug, Clone)]
pub struct ConceptGraph {
    schema: Arc<ConceptSchema>,
    nodes: Vec<PropertyNode>,
    key_index: AHashMap<String, NodeId>,
    /// concept → identifier value → node. Identifier nodes only.
    concept_index: AHashMap<String, AHashMap<String, NodeId>>,
    /// Undirected identifier adjacency, stored symmetrically.
    id_adjacency: AHashMap<NodeId, BTreeSet<NodeId>>,
    /// Directed identifier→property adjacency.
    property_out: AHashMap<NodeId, BTreeSet<NodeId>>,
    property_in: AHashMap<NodeId, BTreeSet<NodeId>>,
    undirected_edges: usize,
    directed_edges: usize,
    components: DisjointSet,
}

impl ConceptGraph {
    pub fn new(schema: Arc<ConceptSchema>) -> Self {
        Self {
            schema,
            nodes: Vec::new(),
            key_index: AHashMap::new(),
            concept_index: AHashMap::new(),
            id_adjacency: AHashMap::new(),
            property_out: AHashMap::new(),
            property_in: AHashMap::new(),
            undirected_edges: 0,
            directed_edges: 0,
            components: DisjointSet::default(),
        }
    }

    pub fn schema(&self) -> &ConceptSchema {
        &self.schema
    }

    // ------------------------------------------------------------------
    // Node insertion and lookup
    // ------------------------------------------------------------------

    /// Insert a node, or return the existing one for the same key.
    ///
    /// First writer wins: on a key hit the new provenance is discarded and
    /// the stored node is returned untouched. Identifier nodes are also
    /// indexed under `concept_index[concept][value]`.
    pub fn add_or_get_node(
        &mut self,
        name: &str,
        value: &str,
        provenance: Option<Provenance>,
    ) -> Result<NodeId, GraphError> {
        let node = PropertyNode::new(&self.schema, name, value, provenance)?;
        let key = node.key();
        if let Some(&existing) = self.key_index.get(&key) {
            return Ok(existing);
        }

        let id = self.nodes.len() as NodeId;
        if node.is_identifier {
            let by_value = self.concept_index.entry(node.concept.clone()).or_default();
            if let Some(&other) = by_value.get(&node.value) {
                // Key miss + value hit means two identifying properties of
                // one concept claim the same value.
                return Err(GraphError::IdentifierCollision {
                    concept: node.concept.clone(),
                    value: node.value.clone(),
                    existing_key: self.nodes[other as usize].key(),
                    new_key: key,
                });
            }
            by_value.insert(node.value.clone(), id);
        }

        self.key_index.insert(key, id);
        self.nodes.push(node);
        let slot = self.components.push();
        debug_assert_eq!(slot, id);
        Ok(id)
    }

    pub fn get_node(&self, key: &str) -> Result<&PropertyNode, GraphError> {
        self.node_id(key)
            .map(|id| &self.nodes[id as usize])
            .ok_or_else(|| GraphError::NodeNotFound {
                key: key.to_string(),
            })
    }

    pub fn node_id(&self, key: &str) -> Option<NodeId> {
        self.key_index.get(key).copied()
    }

    pub fn node(&self, id: NodeId) -> &PropertyNode {
        &self.nodes[id as usize]
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &PropertyNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (i as NodeId, n))
    }

    /// Identifier node for `concept` with the given value, if present.
    pub fn identifier_node(&self, concept: &str, value: &str) -> Option<&PropertyNode> {
        self.identifier_node_id(concept, value)
            .map(|id| &self.nodes[id as usize])
    }

    pub fn identifier_node_id(&self, concept: &str, value: &str) -> Option<NodeId> {
        self.concept_index.get(concept)?.get(value).copied()
    }

    /// Identifier nodes of one concept, in insertion order.
    pub fn identifier_nodes<'a>(&'a self, concept: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.nodes.iter().enumerate().filter_map(move |(i, n)| {
            (n.is_identifier && n.concept == concept).then_some(i as NodeId)
        })
    }

    /// Identifier-node counts per concept, for reporting.
    pub fn identifier_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for node in &self.nodes {
            if node.is_identifier {
                *counts.entry(node.concept.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Logical edge count: undirected pairs count once.
    pub fn edge_count(&self) -> usize {
        self.undirected_edges + self.directed_edges
    }

    pub fn undirected_edge_count(&self) -> usize {
        self.undirected_edges
    }

    pub fn directed_edge_count(&self) -> usize {
        self.directed_edges
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Link the identifier nodes observed together in one source row.
    ///
    /// Adds an undirected edge between each *adjacent* pair, in the given
    /// (column) order, and only when no path already connects the pair.
    /// The check is full reachability, not direct-edge presence, so the
    /// direct edges stay minimal: once two identifiers are transitively
    /// linked, later co-occurrences add nothing.
    ///
    /// Returns the number of edges added.
    pub fn connect_id_nodes(&mut self, id_nodes: &[NodeId]) -> usize {
        let mut added = 0;
        for pair in id_nodes.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            debug_assert!(self.nodes[a as usize].is_identifier);
            debug_assert!(self.nodes[b as usize].is_identifier);
            if a == b || self.components.find(a) == self.components.find(b) {
                continue;
            }
            self.insert_id_edge(a, b);
            added += 1;
        }
        added
    }

    /// Attach a property node to every identifier context it co-occurred
    /// with: one directed identifier→property edge per pair, idempotent.
    ///
    /// Returns the number of edges added.
    pub fn connect_property_node(&mut self, property_node: NodeId, id_nodes: &[NodeId]) -> usize {
        debug_assert!(!self.nodes[property_node as usize].is_identifier);
        let mut added = 0;
        for &id in id_nodes {
            if self.property_out.entry(id).or_default().insert(property_node) {
                self.property_in
                    .entry(property_node)
                    .or_default()
                    .insert(id);
                self.directed_edges += 1;
                added += 1;
            }
        }
        added
    }

    /// Raw undirected edge insert, bypassing the connectivity gate. Used
    /// by snapshot import, which must reproduce an exact edge set.
    pub(crate) fn insert_id_edge(&mut self, a: NodeId, b: NodeId) {
        if self.id_adjacency.entry(a).or_default().insert(b) {
            self.id_adjacency.entry(b).or_default().insert(a);
            self.undirected_edges += 1;
        }
        self.components.union(a, b);
    }

    /// Raw directed edge insert, for snapshot import.
    pub(crate) fn insert_property_edge(&mut self, source: NodeId, target: NodeId) {
        if self.property_out.entry(source).or_default().insert(target) {
            self.property_in.entry(target).or_default().insert(source);
            self.directed_edges += 1;
        }
    }

    /// Undirected identifier neighbors of an identifier node.
    pub fn id_neighbors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.id_adjacency
            .get(&id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Property nodes attached to an identifier node.
    pub fn property_targets(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.property_out
            .get(&id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Identifier nodes a property node is attached to.
    pub fn property_sources(&self, property_node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.property_in
            .get(&property_node)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Incoming edge count: directed sources plus undirected neighbors.
    pub fn in_degree(&self, id: NodeId) -> usize {
        let undirected = self.id_adjacency.get(&id).map_or(0, BTreeSet::len);
        let directed = self.property_in.get(&id).map_or(0, BTreeSet::len);
        undirected + directed
    }

    /// Outgoing edge count: directed targets plus undirected neighbors.
    /// Always zero for property nodes.
    pub fn out_degree(&self, id: NodeId) -> usize {
        let undirected = self.id_adjacency.get(&id).map_or(0, BTreeSet::len);
        let directed = self.property_out.get(&id).map_or(0, BTreeSet::len);
        undirected + directed
    }

    /// Whether a path of identifier edges connects two nodes.
    pub fn connected(&self, a: NodeId, b: NodeId) -> bool {
        self.components.find_no_compress(a) == self.components.find_no_compress(b)
    }

    // ------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------

    /// Ingest canonical tables, in order, accumulating nodes and edges.
    ///
    /// Per row of each table: a node per present cell (with full
    /// provenance), identifier nodes linked in column order, every
    /// property node attached to the row's identifier nodes. A
    /// schema-invalid column aborts the whole build before any row of the
    /// offending table is consumed.
    pub fn build(&mut self, table_sources: &[TableSource]) -> Result<(), GraphError> {
        for table in table_sources {
            self.ingest_table(table)?;
        }
        tracing::info!(
            sources = table_sources.len(),
            nodes = self.node_count(),
            edges = self.edge_count(),
            "concept graph build complete"
        );
        Ok(())
    }

    fn ingest_table(&mut self, table: &TableSource) -> Result<(), GraphError> {
        // Validate every column up front: fail fast, with the offending
        // string and its source location, before touching any row.
        let mut columns = Vec::with_capacity(table.columns.len());
        for raw in &table.columns {
            let name = self
                .schema
                .validate_concept_string(raw)
                .map_err(|source| invalid_column(table, raw, source))?;
            let is_identifier = self
                .schema
                .is_identifier(&name)
                .map_err(|source| invalid_column(table, raw, source))?;
            columns.push((name, is_identifier));
        }

        let nodes_before = self.node_count();
        let edges_before = self.edge_count();

        for (row_idx, row) in table.rows.iter().enumerate() {
            let mut id_nodes = Vec::new();
            let mut prop_nodes = Vec::new();

            for (col_idx, cell) in row.iter().enumerate().take(columns.len()) {
                let Some(value) = cell else { continue };
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                let (name, is_identifier) = &columns[col_idx];
                let provenance = Provenance {
                    extract_config_url: table.extract_config_url.clone(),
                    source_url: Some(table.source_url.clone()),
                    row: Some(row_idx as u64),
                    col: Some(col_idx as u64),
                };
                let id = self.add_or_get_node(name, value, Some(provenance))?;
                if *is_identifier {
                    id_nodes.push(id);
                } else {
                    prop_nodes.push(id);
                }
            }

            self.connect_id_nodes(&id_nodes);
            for &prop in &prop_nodes {
                self.connect_property_node(prop, &id_nodes);
            }
        }

        tracing::debug!(
            source = %table.source_url,
            rows = table.rows.len(),
            new_nodes = self.node_count() - nodes_before,
            new_edges = self.edge_count() - edges_before,
            "ingested canonical table"
        );
        Ok(())
    }
}

fn invalid_column(table: &TableSource, column: &str, source: SchemaValidationError) -> GraphError {
    GraphError::InvalidColumn {
        source_url: table.source_url.clone(),
        column: column.to_string(),
        source,
    }
}

// ============================================================================
// Tests
// ============================================================================
