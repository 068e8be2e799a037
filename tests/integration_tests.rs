//! Integration tests for the complete Concord pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Schema compile → graph build → link validation → report
//! - Graph export → JSON file → import round trip
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;
use tempfile::tempdir;

use concord_graph::{ConceptGraph, GraphSnapshot, TableSource};
use concord_schema::ConceptSchema;
use concord_validate::{ConceptHierarchy, LinkRequirement, LinkRule, LinkValidator};

// ============================================================================
// Fixtures
// ============================================================================

/// DATASET1: 7 families, 10 participants, 11 biospecimens. Family F12
/// appears in pf.csv with a blank participant cell.
fn dataset1() -> Vec<TableSource> {
    let pf = TableSource::new("pf.csv", &["PARTICIPANT|ID", "FAMILY|ID"])
        .extract_config("extracts/pf.py")
        .row(&["P1", "F1"])
        .row(&["P2", "F1"])
        .row(&["P3", "F2"])
        .row(&["P4", "F2"])
        .row(&["P5", "F3"])
        .row(&["P6", "F3"])
        .row(&["P7", "F4"])
        .row(&["P8", "F5"])
        .row(&["P9", "F6"])
        .row(&["P10", "F6"])
        .sparse_row(&[None, Some("F12")]);

    let bs = TableSource::new(
        "bs.csv",
        &["PARTICIPANT|ID", "BIOSPECIMEN|ID", "BIOSPECIMEN|ANALYTE"],
    )
    .extract_config("extracts/bs.py")
    .row(&["P1", "B1", "DNA"])
    .row(&["P1", "B2", "RNA"])
    .row(&["P2", "B3", "DNA"])
    .row(&["P3", "B4", "DNA"])
    .row(&["P4", "B5", "RNA"])
    .row(&["P5", "B6", "DNA"])
    .row(&["P6", "B7", "DNA"])
    .row(&["P7", "B8", "RNA"])
    .row(&["P8", "B9", "DNA"])
    .row(&["P9", "B10", "DNA"])
    .row(&["P10", "B11", "RNA"]);

    vec![pf, bs]
}

/// DATASET4a: fp.csv puts two participants in family F1, fb.csv links the
/// family straight to biospecimen B1.
fn dataset4a() -> Vec<TableSource> {
    let fp = TableSource::new("fp.csv", &["FAMILY|ID", "PARTICIPANT|ID"])
        .row(&["F1", "P1"])
        .row(&["F1", "P2"]);
    let fb = TableSource::new("fb.csv", &["FAMILY|ID", "BIOSPECIMEN|ID"]).row(&["F1", "B1"]);
    vec![fp, fb]
}

fn build(tables: &[TableSource]) -> ConceptGraph {
    let mut graph = ConceptGraph::new(Arc::new(ConceptSchema::standard()));
    graph.build(tables).expect("build should succeed");
    graph
}

// ============================================================================
// DATASET1: cardinality over a disconnected graph
// ============================================================================

#[test]
fn test_dataset1_identifier_counts() {
    let graph = build(&dataset1());
    let counts = graph.identifier_counts();
    assert_eq!(counts.get("FAMILY"), Some(&7));
    assert_eq!(counts.get("PARTICIPANT"), Some(&10));
    assert_eq!(counts.get("BIOSPECIMEN"), Some(&11));
}

#[test]
fn test_dataset1_family_without_participants_is_flagged() {
    let graph = build(&dataset1());
    let validator = LinkValidator::new(&graph, ConceptHierarchy::standard());
    let report = validator
        .validate(&[LinkRule::new(
            "FAMILY",
            "PARTICIPANT",
            LinkRequirement::AtLeastOne,
        )])
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.checked, 7);
    assert_eq!(outcome.violations.len(), 1);

    let violation = &outcome.violations[0];
    assert_eq!(violation.node.concept, "FAMILY");
    assert_eq!(violation.node.value, "F12");
    assert!(violation.node.sources.contains("pf.csv"));
    assert!(violation.linked.is_empty());
}

#[test]
fn test_dataset1_biospecimens_resolve_to_one_participant() {
    let graph = build(&dataset1());
    let validator = LinkValidator::new(&graph, ConceptHierarchy::standard());
    let report = validator
        .validate(&[LinkRule::new(
            "BIOSPECIMEN",
            "PARTICIPANT",
            LinkRequirement::ExactlyOne,
        )])
        .unwrap();

    assert_eq!(report.outcomes[0].checked, 11);
    assert!(!report.has_violations());
}

// ============================================================================
// DATASET4a: ambiguity through a shared family node
// ============================================================================

#[test]
fn test_dataset4a_biospecimen_linked_to_two_participants() {
    let graph = build(&dataset4a());
    let validator = LinkValidator::new(&graph, ConceptHierarchy::standard());
    let report = validator
        .validate(&[LinkRule::new(
            "BIOSPECIMEN",
            "PARTICIPANT",
            LinkRequirement::ExactlyOne,
        )])
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.violations.len(), 1);

    let violation = &outcome.violations[0];
    assert_eq!(violation.node.value, "B1");
    assert!(violation.node.sources.contains("fb.csv"));

    let linked: Vec<&str> = violation.linked.iter().map(|n| n.value.as_str()).collect();
    assert_eq!(linked, vec!["P1", "P2"]);
    for node in &violation.linked {
        assert!(node.sources.contains("fp.csv"));
    }
}

#[test]
fn test_dataset4a_family_biospecimen_link_skips_participant_level() {
    let graph = build(&dataset4a());
    let validator = LinkValidator::new(&graph, ConceptHierarchy::standard());
    let report = validator
        .validate(&[LinkRule::new(
            "FAMILY",
            "BIOSPECIMEN",
            LinkRequirement::HierarchicallyDirect,
        )])
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.violations.len(), 1);
    assert!(outcome.violations[0].message.contains("skipping PARTICIPANT"));
}

// ============================================================================
// Full pipeline: report rendering, fail-fast, export round trip
// ============================================================================

#[test]
fn test_report_renders_and_serializes() {
    let graph = build(&dataset1());
    let validator = LinkValidator::new(&graph, ConceptHierarchy::standard());
    let report = validator
        .validate(&[
            LinkRule::new("FAMILY", "PARTICIPANT", LinkRequirement::AtLeastOne),
            LinkRule::new("BIOSPECIMEN", "PARTICIPANT", LinkRequirement::ExactlyOne),
        ])
        .unwrap();

    let rendered = report.to_string();
    assert!(rendered.contains("FAMILY: 7"));
    assert!(rendered.contains("every FAMILY is linked to at least 1 PARTICIPANT"));
    assert!(rendered.contains("F12"));

    let dir = tempdir().unwrap();
    let path = dir.path().join("report.json");
    std::fs::write(&path, report.to_json().unwrap()).unwrap();
    let parsed: concord_validate::ValidationReport =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed.total_violations(), report.total_violations());
}

#[test]
fn test_invalid_column_aborts_the_whole_build() {
    let mut graph = ConceptGraph::new(Arc::new(ConceptSchema::standard()));
    let mut tables = dataset1();
    tables.push(TableSource::new("typo.csv", &["PARTICIPANT|IDD"]).row(&["P1"]));

    let err = graph.build(&tables).unwrap_err();
    assert!(err.to_string().contains("typo.csv"));
    assert!(err.to_string().contains("PARTICIPANT|IDD"));
}

#[test]
fn test_export_import_round_trip_through_file() {
    let graph = build(&dataset1());
    let snapshot = graph.snapshot();

    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.json");
    std::fs::write(&path, snapshot.to_json().unwrap()).unwrap();

    let loaded = GraphSnapshot::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let rebuilt = ConceptGraph::from_snapshot(Arc::new(ConceptSchema::standard()), &loaded)
        .expect("import should succeed");

    assert_eq!(rebuilt.snapshot(), snapshot);
    assert_eq!(rebuilt.node_count(), graph.node_count());
    assert_eq!(rebuilt.edge_count(), graph.edge_count());

    // Attributes and provenance survive the trip.
    let original = graph.get_node("FAMILY|ID|F1").unwrap();
    let reloaded = rebuilt.get_node("FAMILY|ID|F1").unwrap();
    assert_eq!(original.provenance, reloaded.provenance);
    assert_eq!(original.concept, reloaded.concept);

    // And the rebuilt graph validates identically.
    let validator = LinkValidator::new(&rebuilt, ConceptHierarchy::standard());
    let report = validator
        .validate(&[LinkRule::new(
            "FAMILY",
            "PARTICIPANT",
            LinkRequirement::AtLeastOne,
        )])
        .unwrap();
    assert_eq!(report.outcomes[0].violations.len(), 1);
    assert_eq!(report.outcomes[0].violations[0].node.value, "F12");
}
