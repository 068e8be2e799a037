//! Link validation over a frozen concept property graph.
//!
//! Declared relationship rules ("every biospecimen is linked to exactly 1
//! participant") are evaluated as reachability queries over the graph's
//! identifier edges. Findings are structured data, never errors: the
//! caller decides whether any violation fails the run.
//!
//! Rules are independent and the graph is immutable during validation, so
//! rule evaluation fans out across threads; the report preserves rule
//! declaration order and, within a rule, discovery order.

use anyhow::{ensure, Result};
use concord_graph::{ConceptGraph, NodeId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

// ============================================================================
// Rules
// ============================================================================

/// What a declared `(concept, linked_concept)` pair demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRequirement {
    /// Every identifier node of the concept reaches at least one
    /// identifier node of the linked concept.
    AtLeastOne,
    /// ... exactly one distinct identifier node of the linked concept.
    ExactlyOne,
    /// Reachable pairs whose connecting path bypasses every concept the
    /// hierarchy places strictly between the two are reported as
    /// skip-level links. Informational: the data is still valid.
    HierarchicallyDirect,
}

/// One declared relationship rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRule {
    pub concept: String,
    pub linked_concept: String,
    pub requirement: LinkRequirement,
}

impl LinkRule {
    pub fn new(concept: &str, linked_concept: &str, requirement: LinkRequirement) -> Self {
        Self {
            concept: concept.to_string(),
            linked_concept: linked_concept.to_string(),
            requirement,
        }
    }

    /// Human-readable rule text; violation groups are keyed by this.
    pub fn describe(&self) -> String {
        match self.requirement {
            LinkRequirement::AtLeastOne => format!(
                "every {} is linked to at least 1 {}",
                self.concept, self.linked_concept
            ),
            LinkRequirement::ExactlyOne => format!(
                "every {} is linked to exactly 1 {}",
                self.concept, self.linked_concept
            ),
            LinkRequirement::HierarchicallyDirect => format!(
                "{} links to {} without skipping hierarchy levels",
                self.concept, self.linked_concept
            ),
        }
    }
}

// ============================================================================
// Concept hierarchy
// ============================================================================

/// Explicit directed hierarchy between concept *types*.
///
/// The property graph cannot express this itself (it only knows which
/// identifier values co-occurred), so the hierarchy is supplied as
/// configuration. Only `HierarchicallyDirect` consults it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptHierarchy {
    children: BTreeMap<String, BTreeSet<String>>,
}

impl ConceptHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge(mut self, parent: &str, child: &str) -> Self {
        self.children
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
        self
    }

    /// The standard study-data hierarchy.
    pub fn standard() -> Self {
        Self::new()
            .edge("FAMILY", "PARTICIPANT")
            .edge("PARTICIPANT", "BIOSPECIMEN")
            .edge("PARTICIPANT", "DIAGNOSIS")
            .edge("PARTICIPANT", "PHENOTYPE")
            .edge("BIOSPECIMEN", "GENOMIC_FILE")
            .edge("GENOMIC_FILE", "SEQUENCING")
    }

    /// Directed path `from → ... → to`, if one exists.
    fn path_down(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut queue = VecDeque::from([from.to_string()]);
        let mut parent: HashMap<String, String> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::from([from.to_string()]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.clone()];
                let mut cursor = current;
                while let Some(p) = parent.get(&cursor) {
                    path.push(p.clone());
                    cursor = p.clone();
                }
                path.reverse();
                return Some(path);
            }
            let Some(children) = self.children.get(&current) else {
                continue;
            };
            for child in children {
                if seen.insert(child.clone()) {
                    parent.insert(child.clone(), current.clone());
                    queue.push_back(child.clone());
                }
            }
        }
        None
    }

    /// Concepts the hierarchy places strictly between `a` and `b`, in
    /// hierarchy order. Empty when the concepts are adjacent, unrelated,
    /// or identical.
    pub fn concepts_between(&self, a: &str, b: &str) -> Vec<String> {
        let path = self.path_down(a, b).or_else(|| self.path_down(b, a));
        match path {
            Some(p) if p.len() > 2 => p[1..p.len() - 1].to_vec(),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// A node cited by a violation, with every distinct source location that
/// contributed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvolvedNode {
    pub concept: String,
    pub value: String,
    pub key: String,
    pub sources: BTreeSet<String>,
}

/// One violated rule instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// The failing node.
    pub node: InvolvedNode,
    /// The linked nodes relevant to the rule (empty when the failure is
    /// the absence of any link).
    pub linked: Vec<InvolvedNode>,
    pub message: String,
}

/// All findings for one declared rule, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: LinkRule,
    pub description: String,
    /// How many identifier nodes of the rule's concept were evaluated.
    pub checked: usize,
    pub violations: Vec<Violation>,
}

/// The validator's output: per-concept identifier counts plus one outcome
/// group per declared rule, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub identifier_counts: BTreeMap<String, usize>,
    pub outcomes: Vec<RuleOutcome>,
}

impl ValidationReport {
    pub fn total_violations(&self) -> usize {
        self.outcomes.iter().map(|o| o.violations.len()).sum()
    }

    pub fn has_violations(&self) -> bool {
        self.outcomes.iter().any(|o| !o.violations.is_empty())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "identifier counts:")?;
        for (concept, count) in &self.identifier_counts {
            writeln!(f, "  {concept}: {count}")?;
        }
        for outcome in &self.outcomes {
            writeln!(f)?;
            writeln!(f, "rule: {}", outcome.description)?;
            writeln!(
                f,
                "  checked {}, violations {}",
                outcome.checked,
                outcome.violations.len()
            )?;
            for violation in &outcome.violations {
                writeln!(f, "  - {}", violation.message)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Read-only analysis pass over a finished graph.
pub struct LinkValidator<'g> {
    graph: &'g ConceptGraph,
    hierarchy: ConceptHierarchy,
}

impl<'g> LinkValidator<'g> {
    pub fn new(graph: &'g ConceptGraph, hierarchy: ConceptHierarchy) -> Self {
        Self { graph, hierarchy }
    }

    /// Evaluate every declared rule against the frozen graph.
    ///
    /// Rules run in parallel; the report lists them in declaration order.
    /// Fails only when a rule names a concept the schema does not know.
    pub fn validate(&self, rules: &[LinkRule]) -> Result<ValidationReport> {
        for rule in rules {
            for concept in [&rule.concept, &rule.linked_concept] {
                ensure!(
                    self.graph.schema().concepts().any(|c| c == concept.as_str()),
                    "rule `{}` names unknown concept `{}`",
                    rule.describe(),
                    concept
                );
            }
        }

        let outcomes: Vec<RuleOutcome> =
            rules.par_iter().map(|rule| self.evaluate(rule)).collect();

        let report = ValidationReport {
            identifier_counts: self.graph.identifier_counts(),
            outcomes,
        };
        tracing::info!(
            rules = rules.len(),
            violations = report.total_violations(),
            "link validation complete"
        );
        Ok(report)
    }

    fn evaluate(&self, rule: &LinkRule) -> RuleOutcome {
        let mut checked = 0;
        let mut violations = Vec::new();

        for node in self.graph.identifier_nodes(&rule.concept) {
            checked += 1;
            match rule.requirement {
                LinkRequirement::AtLeastOne => {
                    let reached = self.reachable_of_concept(node, &rule.linked_concept);
                    if reached.is_empty() {
                        violations.push(self.cardinality_violation(rule, node, &reached));
                    }
                }
                LinkRequirement::ExactlyOne => {
                    let reached = self.reachable_of_concept(node, &rule.linked_concept);
                    if reached.len() != 1 {
                        violations.push(self.cardinality_violation(rule, node, &reached));
                    }
                }
                LinkRequirement::HierarchicallyDirect => {
                    violations.extend(self.skip_level_findings(rule, node));
                }
            }
        }

        RuleOutcome {
            rule: rule.clone(),
            description: rule.describe(),
            checked,
            violations,
        }
    }

    /// Identifier nodes of `concept` connected to `start` by any path of
    /// identifier edges, in breadth-first discovery order.
    ///
    /// Nodes of the target concept terminate their branch: they are
    /// collected, not traversed through. A biospecimen directly linked to
    /// its participant therefore resolves to that one participant, rather
    /// than sweeping in every sibling reachable through the shared family
    /// node; a biospecimen linked *only* through a family still reaches
    /// all of that family's participants.
    fn reachable_of_concept(&self, start: NodeId, concept: &str) -> Vec<NodeId> {
        let mut reached = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            if current != start && self.graph.node(current).concept == concept {
                reached.push(current);
                continue;
            }
            for neighbor in self.graph.id_neighbors(current) {
                if seen.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        reached
    }

    /// Shortest identifier-edge path between two connected nodes,
    /// endpoints included, under the same traversal restriction as
    /// [`Self::reachable_of_concept`]: interior nodes of the target's
    /// concept are not traversed through.
    fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let target_concept = &self.graph.node(to).concept;
        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut seen: HashSet<NodeId> = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current];
                let mut cursor = current;
                while let Some(&p) = parent.get(&cursor) {
                    path.push(p);
                    cursor = p;
                }
                path.reverse();
                return Some(path);
            }
            if current != from && &self.graph.node(current).concept == target_concept {
                continue;
            }
            for neighbor in self.graph.id_neighbors(current) {
                if seen.insert(neighbor) {
                    parent.insert(neighbor, current);
                    queue.push_back(neighbor);
                }
            }
        }
        None
    }

    fn cardinality_violation(
        &self,
        rule: &LinkRule,
        node: NodeId,
        reached: &[NodeId],
    ) -> Violation {
        let failing = self.involved(node);
        let linked: Vec<InvolvedNode> = reached.iter().map(|&id| self.involved(id)).collect();
        let linked_desc = if linked.is_empty() {
            String::new()
        } else {
            format!(
                ": {}",
                linked
                    .iter()
                    .map(|n| n.value.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        let message = format!(
            "{} {} ({}) is linked to {} {}{}",
            failing.concept,
            failing.value,
            join_sources(&failing.sources),
            reached.len(),
            rule.linked_concept,
            linked_desc
        );
        Violation {
            node: failing,
            linked,
            message,
        }
    }

    /// Skip-level findings for one node of the rule's concept: reachable
    /// partner nodes whose shortest connecting path contains no concept
    /// the hierarchy places strictly between the two.
    fn skip_level_findings(&self, rule: &LinkRule, node: NodeId) -> Vec<Violation> {
        let between = self
            .hierarchy
            .concepts_between(&rule.concept, &rule.linked_concept);
        if between.is_empty() {
            return Vec::new();
        }

        let mut findings = Vec::new();
        for partner in self.reachable_of_concept(node, &rule.linked_concept) {
            let Some(path) = self.shortest_path(node, partner) else {
                continue;
            };
            let routed = path[1..path.len().saturating_sub(1)]
                .iter()
                .any(|&id| between.contains(&self.graph.node(id).concept));
            if routed {
                continue;
            }
            let failing = self.involved(node);
            let linked = self.involved(partner);
            let message = format!(
                "{} {} ({}) links to {} {} ({}) skipping {}",
                failing.concept,
                failing.value,
                join_sources(&failing.sources),
                linked.concept,
                linked.value,
                join_sources(&linked.sources),
                between.join(", ")
            );
            findings.push(Violation {
                node: failing,
                linked: vec![linked],
                message,
            });
        }
        findings
    }

    fn involved(&self, id: NodeId) -> InvolvedNode {
        let node = self.graph.node(id);
        let sources: BTreeSet<String> = node
            .provenance
            .source_url
            .iter()
            .cloned()
            .collect();
        InvolvedNode {
            concept: node.concept.clone(),
            value: node.value.clone(),
            key: node.key(),
            sources,
        }
    }
}

fn join_sources(sources: &BTreeSet<String>) -> String {
    if sources.is_empty() {
        "unknown source".to_string()
    } else {
        sources.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

// ============================================================================
// Tests
// ============================================================================
