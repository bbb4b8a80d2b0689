//! Structural schema validation.

use std::collections::BTreeSet;

use crate::types::Document;
use crate::version::SemVer;
use super::SchemaValidator;

/// Error type for schema validation. Carries every violation found.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Schema validation failed with {} violation(s): {}", .violations.len(), .violations.join("; "))]
pub struct SchemaError {
    /// Violations, in document order.
    pub violations: Vec<String>,
}

/// Checks the structural rules every protocol document must satisfy.
///
/// Rules:
/// - metadata `company`, `name`, `version` non-empty; `version` is `MAJOR.MINOR.PATCH`
/// - node ids non-empty and unique
/// - edge ids unique; both endpoints of every edge exist
/// - question ids and uids non-empty
/// - select and multiselect questions carry at least one option
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralSchemaValidator;

impl StructuralSchemaValidator {
    /// Create a validator.
    pub fn new() -> Self {
        Self
    }
}

impl SchemaValidator for StructuralSchemaValidator {
    fn validate(&self, document: &Document) -> Result<(), SchemaError> {
        let mut violations = Vec::new();

        let metadata = &document.metadata;
        for (field, value) in [
            ("company", &metadata.company),
            ("name", &metadata.name),
            ("version", &metadata.version),
        ] {
            if value.trim().is_empty() {
                violations.push(format!("metadata.{field} is empty"));
            }
        }
        if !metadata.version.trim().is_empty() && metadata.version.parse::<SemVer>().is_err() {
            violations.push(format!("metadata.version {:?} is not MAJOR.MINOR.PATCH", metadata.version));
        }

        let mut node_ids = BTreeSet::new();
        for (i, node) in document.nodes.iter().enumerate() {
            if node.id.as_str().trim().is_empty() {
                violations.push(format!("node at index {i} has an empty id"));
            } else if !node_ids.insert(node.id.as_str()) {
                violations.push(format!("duplicate node id {}", node.id));
            }

            for (j, question) in node.data.questions.iter().enumerate() {
                if question.id.trim().is_empty() {
                    violations.push(format!("{}: question at index {j} has an empty id", node.id));
                }
                if question.uid.trim().is_empty() {
                    violations.push(format!("{}: question {} has an empty uid", node.id, question.id));
                }
                if question.question_type.requires_options() && question.options.is_empty() {
                    violations.push(format!("{}: question {} requires options", node.id, question.id));
                }
            }
        }

        let mut edge_ids = BTreeSet::new();
        for edge in &document.edges {
            if !edge_ids.insert(edge.id.as_str()) {
                violations.push(format!("duplicate edge id {}", edge.id));
            }
            if !node_ids.contains(edge.source.as_str()) {
                violations.push(format!("edge {} references non-existent source node {}", edge.id, edge.source));
            }
            if !node_ids.contains(edge.target.as_str()) {
                violations.push(format!("edge {} references non-existent target node {}", edge.id, edge.target));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError { violations })
        }
    }
}
