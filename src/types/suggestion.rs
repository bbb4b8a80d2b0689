//! Approved change suggestions.
//!
//! Suggestions arrive already approved by the (external) suggestion pipeline.
//! The engine only routes them to sections, hands them to the oracle and checks
//! that they produced an observable change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::NodeId;

/// Justification for a suggestion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    /// Excerpt of the playbook backing the suggestion.
    #[serde(default, alias = "playbook_reference")]
    pub playbook_reference: String,
}

/// Where in the document a suggestion applies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificLocation {
    /// Target node.
    #[serde(default, alias = "node_id")]
    pub node_id: Option<NodeId>,
    /// Target field inside the node.
    #[serde(default)]
    pub field: Option<String>,
}

/// Kind of modification a suggestion requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationType {
    /// Add new content.
    Add,
    /// Change existing content.
    Update,
    /// Remove content.
    Remove,
    /// Change conditional logic.
    Conditional,
}

/// Machine-oriented description of how to apply a suggestion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationPath {
    /// JSON path of the target value.
    #[serde(default, alias = "json_path", alias = "target_field")]
    pub json_path: Option<String>,
    /// Requested modification.
    #[serde(default, alias = "modification_type")]
    pub modification_type: Option<ModificationType>,
    /// Value before the change.
    #[serde(default, alias = "current_value")]
    pub current_value: Option<Value>,
    /// Value after the change.
    #[serde(default, alias = "proposed_value", alias = "example_value")]
    pub proposed_value: Option<Value>,
}

/// An approved change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    /// Suggestion id (e.g. `sug_01`).
    pub id: String,
    /// Category label.
    #[serde(default)]
    pub category: String,
    /// Priority label.
    #[serde(default)]
    pub priority: String,
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// What should change and why.
    #[serde(default)]
    pub description: String,
    /// Playbook justification.
    #[serde(default)]
    pub evidence: Evidence,
    /// Target location.
    #[serde(default, alias = "specific_location")]
    pub specific_location: SpecificLocation,
    /// How to implement the change.
    #[serde(default, alias = "implementation_path", alias = "implementation_strategy")]
    pub implementation_path: ImplementationPath,
}

impl Suggestion {
    /// Create a suggestion targeting a node field.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: String::new(),
            priority: String::new(),
            title: title.into(),
            description: String::new(),
            evidence: Evidence::default(),
            specific_location: SpecificLocation::default(),
            implementation_path: ImplementationPath::default(),
        }
    }

    /// Target a node and field.
    pub fn at(mut self, node_id: impl Into<NodeId>, field: impl Into<String>) -> Self {
        self.specific_location = SpecificLocation {
            node_id: Some(node_id.into()),
            field: Some(field.into()),
        };
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Target node, if the suggestion names one.
    ///
    /// Blank ids count as absent.
    pub fn target_node(&self) -> Option<&NodeId> {
        self.specific_location
            .node_id
            .as_ref()
            .filter(|id| !id.as_str().trim().is_empty())
    }

    /// Field the suggestion targets, falling back to the implementation path.
    pub fn target_field(&self) -> Option<&str> {
        let non_blank = |f: &&str| !f.trim().is_empty();
        self.specific_location
            .field
            .as_deref()
            .filter(non_blank)
            .or_else(|| self.implementation_path.json_path.as_deref().filter(non_blank))
    }
}
