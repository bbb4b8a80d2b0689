//! Protocol document types.
//!
//! A protocol is a decision tree: metadata, typed nodes carrying questions and
//! visibility expressions, and edges connecting nodes. This module is the single
//! deserialization boundary for documents; everything downstream works on these
//! structs instead of raw JSON.
//!
//! Unknown fields are kept in `extra` maps (ordered, so canonical serialization
//! stays deterministic) and written back on serialization.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Field name used for the visibility predicate of nodes and questions.
pub const CONDITIONAL_EXPRESSION_FIELD: &str = "conditionalExpression";

/// Unique identifier of a node (e.g. `node-5`).
///
/// Implements `Ord` for deterministic ordering in sets and maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Document metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Owning company.
    #[serde(default)]
    pub company: String,
    /// Protocol name.
    #[serde(default)]
    pub name: String,
    /// Version string, `MAJOR.MINOR.PATCH`.
    #[serde(default)]
    pub version: String,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    /// Create metadata with no extra fields.
    pub fn new(company: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            name: name.into(),
            version: version.into(),
            extra: BTreeMap::new(),
        }
    }
}

/// Kind of node in the decision tree.
///
/// Every spelling is its own variant, so a document keeps exactly the node
/// types it was loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Collects answers to questions.
    Question,
    /// Free-form question node.
    Custom,
    /// Branching decision.
    Decision,
    /// Action to perform.
    Action,
    /// Clinical conduct.
    Conduct,
    /// End of a path.
    End,
    /// Closing summary.
    Summary,
    /// Terminal node.
    Terminal,
}

impl NodeKind {
    /// Wire spelling of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Custom => "custom",
            Self::Decision => "decision",
            Self::Action => "action",
            Self::Conduct => "conduct",
            Self::End => "end",
            Self::Summary => "summary",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canvas position of a node. `x` drives the left-to-right ordering of nodes.
///
/// Integral coordinates are written without a fractional part, so `100`
/// stays `100` on output.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    #[serde(serialize_with = "serialize_coordinate")]
    pub x: f64,
    /// Vertical coordinate.
    #[serde(serialize_with = "serialize_coordinate")]
    pub y: f64,
}

/// Largest magnitude below which every integral `f64` maps exactly to `i64`.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

fn serialize_coordinate<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < EXACT_INTEGER_LIMIT {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

impl Position {
    /// Create a position.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Kind of answer a question expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Single choice among options.
    Select,
    /// Multiple choice among options.
    Multiselect,
    /// Free text.
    Text,
    /// Numeric answer.
    Number,
    /// Date answer.
    Date,
    /// Yes/no answer.
    Boolean,
}

impl QuestionType {
    /// Whether the type requires a non-empty option list.
    pub fn requires_options(&self) -> bool {
        matches!(self, Self::Select | Self::Multiselect)
    }
}

/// Selectable answer of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Option id, referenced from conditional expressions.
    pub id: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Stored value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Question asked inside a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Question id.
    pub id: String,
    /// Variable name referenced by conditional expressions.
    pub uid: String,
    /// Answer type.
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Question text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Selectable options.
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Visibility predicate.
    #[serde(default, alias = "expressao", alias = "conditional_expression")]
    pub conditional_expression: Option<String>,
    /// Visibility mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Payload of a node. This is the only part of a node the oracle may change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    /// Human-readable description; changelog entries are appended here.
    #[serde(default, alias = "descricao")]
    pub description: String,
    /// Questions asked in this node.
    #[serde(default)]
    pub questions: Vec<Question>,
    /// Node-level visibility predicate.
    #[serde(default, alias = "condicao", alias = "conditional_expression")]
    pub conditional_expression: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Node of the decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node id.
    pub id: NodeId,
    /// Node kind.
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Canvas position.
    #[serde(default)]
    pub position: Position,
    /// Node payload.
    pub data: NodeData,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Node {
    /// Create a node with empty payload.
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, position: Position) -> Self {
        Self {
            id: id.into(),
            kind,
            position,
            data: NodeData::default(),
            extra: BTreeMap::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.data.description = description.into();
        self
    }

    /// Append a question.
    pub fn with_question(mut self, question: Question) -> Self {
        self.data.questions.push(question);
        self
    }

    /// Set the node-level conditional expression.
    pub fn with_condition(mut self, expression: impl Into<String>) -> Self {
        self.data.conditional_expression = Some(expression.into());
        self
    }
}

/// Directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Edge id.
    pub id: String,
    /// Source node.
    pub source: NodeId,
    /// Target node.
    pub target: NodeId,
    /// Handle on the source node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Handle on the target node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Edge {
    /// Create an edge.
    pub fn new(id: impl Into<String>, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            extra: BTreeMap::new(),
        }
    }

    /// Whether the edge touches `id` at either end.
    pub fn touches(&self, id: &NodeId) -> bool {
        &self.source == id || &self.target == id
    }
}

/// A complete protocol document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document metadata.
    pub metadata: Metadata,
    /// Nodes, in document order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Document {
    /// Create a document.
    pub fn new(metadata: Metadata, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            metadata,
            nodes,
            edges,
            extra: BTreeMap::new(),
        }
    }

    /// Parse a document from JSON text.
    ///
    /// Rejects documents whose node ids are not unique.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let document: Self = serde_json::from_str(text)?;
        let duplicates = document.duplicate_node_ids();
        if !duplicates.is_empty() {
            let ids: Vec<&str> = duplicates.iter().map(NodeId::as_str).collect();
            return Err(serde_json::Error::custom(format!("duplicate node id(s): {}", ids.join(", "))));
        }
        Ok(document)
    }

    /// Node ids that occur more than once, each reported once.
    pub fn duplicate_node_ids(&self) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                duplicates.insert(node.id.clone());
            }
        }
        duplicates
    }

    /// Find a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Set of node ids.
    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Iterate over every question in the document, paired with its node.
    pub fn questions(&self) -> impl Iterator<Item = (&Node, &Question)> {
        self.nodes
            .iter()
            .flat_map(|node| node.data.questions.iter().map(move |q| (node, q)))
    }

    /// Size of the compact JSON serialization, in bytes.
    pub fn serialized_len(&self) -> usize {
        crate::canonical::to_canonical_bytes(self).len()
    }
}
