//! Concept schema catalog and compiler.
//!
//! The canonical namespace is a data-driven tree: each concept declares a
//! mapping of property name → subtree-or-leaf. Compilation flattens that
//! tree, once, into the set of valid delimited path strings
//! (`PARTICIPANT|ID`, `GENOMIC_FILE|HASH|MD5`, ...) plus the subset of
//! paths considered *identifying*. Membership in the compiled path set is
//! the sole validity test for a concept string.
//!
//! Every concept implicitly owns an `ID` property. Concepts may declare
//! additional identifying properties (e.g. a genomic file is named equally
//! well by its path as by its ID).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

/// Separator between segments of a concept path string.
pub const DELIMITER: char = '|';

/// The implicit identifying property every concept owns.
pub const ID_PROPERTY: &str = "ID";

// ============================================================================
// Catalog (pre-compilation declarations)
// ============================================================================

/// A property namespace node: either a leaf property or a nested namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyTree {
    Leaf,
    Branch(BTreeMap<String, PropertyTree>),
}

/// Declaration of one concept type and its property namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptDecl {
    pub name: String,
    /// Property name → subtree-or-leaf. `ID` is implicit and need not appear.
    pub properties: BTreeMap<String, PropertyTree>,
    /// Property paths (relative to the concept) that identify an instance
    /// in addition to `ID`, e.g. `FILE_PATH`.
    pub extra_identifiers: Vec<String>,
}

impl ConceptDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: BTreeMap::new(),
            extra_identifiers: Vec::new(),
        }
    }

    pub fn leaf(mut self, name: &str) -> Self {
        self.properties.insert(name.to_string(), PropertyTree::Leaf);
        self
    }

    pub fn branch(mut self, name: &str, leaves: &[&str]) -> Self {
        let sub = leaves
            .iter()
            .map(|l| (l.to_string(), PropertyTree::Leaf))
            .collect();
        self.properties
            .insert(name.to_string(), PropertyTree::Branch(sub));
        self
    }

    pub fn extra_identifier(mut self, path: &str) -> Self {
        self.extra_identifiers.push(path.to_string());
        self
    }
}

/// The built-in catalog of study-data concepts.
pub fn default_catalog() -> Vec<ConceptDecl> {
    vec![
        ConceptDecl::new("STUDY")
            .leaf("NAME")
            .leaf("SHORT_NAME")
            .leaf("AUTHORITY")
            .extra_identifier("AUTHORITY"),
        ConceptDecl::new("INVESTIGATOR")
            .leaf("NAME")
            .leaf("INSTITUTION"),
        ConceptDecl::new("FAMILY"),
        ConceptDecl::new("PARTICIPANT")
            .leaf("GENDER")
            .leaf("RACE")
            .leaf("ETHNICITY")
            .leaf("AFFECTED_STATUS")
            .leaf("MOTHER_ID")
            .leaf("FATHER_ID"),
        ConceptDecl::new("BIOSPECIMEN")
            .leaf("ANALYTE")
            .leaf("TISSUE_TYPE")
            .leaf("COMPOSITION")
            .leaf("ANATOMY_SITE")
            .branch("SHIPMENT", &["DATE", "ORIGIN"]),
        ConceptDecl::new("GENOMIC_FILE")
            .leaf("FILE_PATH")
            .leaf("FILE_FORMAT")
            .leaf("DATA_TYPE")
            .leaf("AVAILABILITY")
            .branch("HASH", &["MD5", "SHA256"])
            .extra_identifier("FILE_PATH"),
        ConceptDecl::new("SEQUENCING")
            .leaf("LIBRARY_NAME")
            .leaf("STRATEGY")
            .leaf("PLATFORM")
            .leaf("INSTRUMENT")
            .leaf("CENTER"),
        ConceptDecl::new("DIAGNOSIS")
            .leaf("NAME")
            .leaf("CATEGORY")
            .leaf("TUMOR_LOCATION")
            .leaf("AGE_AT_EVENT_DAYS"),
        ConceptDecl::new("PHENOTYPE")
            .leaf("NAME")
            .leaf("HPO_ID")
            .leaf("OBSERVED")
            .leaf("AGE_AT_EVENT_DAYS"),
    ]
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaValidationError {
    #[error("`{input}` does not resolve to a known concept: `{concept}` is not in the compiled schema")]
    UnknownConcept { concept: String, input: String },
    #[error("`{input}` does not resolve to a known property of {concept}: `{property}` is not in the compiled schema")]
    UnknownProperty {
        concept: String,
        property: String,
        input: String,
    },
}

// ============================================================================
// Compiled schema
// ============================================================================

/// The compiled, immutable concept schema.
///
/// Compile once at process start; all later lookups are O(1) set probes.
#[derive(Debug, Clone)]
pub struct ConceptSchema {
    /// Every valid delimited path string.
    paths: HashSet<String>,
    /// The identifying subset of `paths`.
    identifiers: HashSet<String>,
    /// Known concept names (first path segment).
    concepts: BTreeSet<String>,
}

impl ConceptSchema {
    /// Flatten a catalog into the valid-path set.
    ///
    /// Walks each concept's property tree depth-first, joining segments
    /// with [`DELIMITER`]. The implicit `ID` path and any declared extra
    /// identifiers land in the identifying subset.
    pub fn compile(catalog: &[ConceptDecl]) -> Self {
        let mut paths = HashSet::new();
        let mut identifiers = HashSet::new();
        let mut concepts = BTreeSet::new();

        for decl in catalog {
            let concept = decl.name.to_uppercase();
            concepts.insert(concept.clone());

            let id_path = join_segments(&[&concept, ID_PROPERTY]);
            paths.insert(id_path.clone());
            identifiers.insert(id_path);

            for (name, tree) in &decl.properties {
                flatten(&concept, name, tree, &mut paths);
            }

            for extra in &decl.extra_identifiers {
                let full = join_segments(&[&concept, &extra.to_uppercase()]);
                paths.insert(full.clone());
                identifiers.insert(full);
            }
        }

        Self {
            paths,
            identifiers,
            concepts,
        }
    }

    /// Compile the built-in [`default_catalog`].
    pub fn standard() -> Self {
        Self::compile(&default_catalog())
    }

    /// Normalize and check a concept string.
    ///
    /// Whitespace around each segment is trimmed and case is normalized.
    /// The first segment must name a known concept and the remaining
    /// segments a known property path of it. Returns the normalized string.
    pub fn validate_concept_string(&self, s: &str) -> Result<String, SchemaValidationError> {
        let segments: Vec<String> = s
            .split(DELIMITER)
            .map(|seg| seg.trim().to_uppercase())
            .collect();
        let normalized = segments.join(&DELIMITER.to_string());

        let concept = &segments[0];
        if !self.concepts.contains(concept) {
            return Err(SchemaValidationError::UnknownConcept {
                concept: concept.clone(),
                input: s.to_string(),
            });
        }
        if segments.len() < 2 || !self.paths.contains(&normalized) {
            return Err(SchemaValidationError::UnknownProperty {
                concept: concept.clone(),
                property: segments[1..].join(&DELIMITER.to_string()),
                input: s.to_string(),
            });
        }
        Ok(normalized)
    }

    /// Whether a concept string names an identifying property.
    ///
    /// Validates first; a string that fails [`Self::validate_concept_string`]
    /// fails here with the same error.
    pub fn is_identifier(&self, s: &str) -> Result<bool, SchemaValidationError> {
        let normalized = self.validate_concept_string(s)?;
        Ok(self.identifiers.contains(&normalized))
    }

    /// The concept segment of an already-normalized path.
    pub fn concept_of<'a>(&self, path: &'a str) -> &'a str {
        path.split(DELIMITER).next().unwrap_or(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn concepts(&self) -> impl Iterator<Item = &str> {
        self.concepts.iter().map(|c| c.as_str())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(|p| p.as_str())
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(|p| p.as_str())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn join_segments(segments: &[&str]) -> String {
    segments.join(&DELIMITER.to_string())
}

fn flatten(prefix: &str, name: &str, tree: &PropertyTree, paths: &mut HashSet<String>) {
    let here = join_segments(&[prefix, &name.to_uppercase()]);
    match tree {
        PropertyTree::Leaf => {
            paths.insert(here);
        }
        PropertyTree::Branch(children) => {
            for (child, sub) in children {
                flatten(&here, child, sub, paths);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_flattens_nested_namespaces() {
        let schema = ConceptSchema::standard();
        assert!(schema.contains("PARTICIPANT|ID"));
        assert!(schema.contains("BIOSPECIMEN|SHIPMENT|DATE"));
        assert!(schema.contains("GENOMIC_FILE|HASH|MD5"));
        assert!(!schema.contains("PARTICIPANT|SHIPMENT|DATE"));
    }

    #[test]
    fn validate_trims_and_uppercases() {
        let schema = ConceptSchema::standard();
        let normalized = schema
            .validate_concept_string("  participant | id ")
            .unwrap();
        assert_eq!(normalized, "PARTICIPANT|ID");
    }

    #[test]
    fn validate_is_idempotent_on_its_own_output() {
        let schema = ConceptSchema::standard();
        let once = schema
            .validate_concept_string(" biospecimen |shipment| date")
            .unwrap();
        let twice = schema.validate_concept_string(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_concept_is_rejected() {
        let schema = ConceptSchema::standard();
        let err = schema.validate_concept_string("WIDGET|ID").unwrap_err();
        assert!(matches!(
            err,
            SchemaValidationError::UnknownConcept { ref concept, .. } if concept == "WIDGET"
        ));
    }

    #[test]
    fn unknown_property_is_rejected() {
        let schema = ConceptSchema::standard();
        let err = schema
            .validate_concept_string("PARTICIPANT|SHOE_SIZE")
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaValidationError::UnknownProperty { ref property, .. } if property == "SHOE_SIZE"
        ));
    }

    #[test]
    fn bare_concept_is_not_a_property_path() {
        let schema = ConceptSchema::standard();
        assert!(schema.validate_concept_string("PARTICIPANT").is_err());
    }

    #[test]
    fn id_paths_are_identifiers() {
        let schema = ConceptSchema::standard();
        assert!(schema.is_identifier("FAMILY|ID").unwrap());
        assert!(schema.is_identifier("participant|id").unwrap());
    }

    #[test]
    fn declared_extra_identifiers_are_identifiers() {
        let schema = ConceptSchema::standard();
        assert!(schema.is_identifier("GENOMIC_FILE|FILE_PATH").unwrap());
        assert!(schema.is_identifier("STUDY|AUTHORITY").unwrap());
    }

    #[test]
    fn plain_properties_are_not_identifiers() {
        let schema = ConceptSchema::standard();
        assert!(!schema.is_identifier("PARTICIPANT|GENDER").unwrap());
        assert!(!schema.is_identifier("GENOMIC_FILE|FILE_FORMAT").unwrap());
    }

    #[test]
    fn is_identifier_propagates_validation_failure() {
        let schema = ConceptSchema::standard();
        assert!(schema.is_identifier("WIDGET|ID").is_err());
        assert!(schema.is_identifier("PARTICIPANT|SHOE_SIZE").is_err());
    }

    #[test]
    fn concept_of_returns_first_segment() {
        let schema = ConceptSchema::standard();
        assert_eq!(schema.concept_of("BIOSPECIMEN|SHIPMENT|DATE"), "BIOSPECIMEN");
    }
}
