//! Sections: disjoint slices of a document processed independently.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::document::{Edge, Metadata, Node, NodeId};
use super::suggestion::Suggestion;

/// Identifier of a section within one partition.
///
/// Displayed as `section_<n>`; ordered numerically so `section_10` sorts after
/// `section_2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectionId(usize);

impl SectionId {
    /// Create a section id from its index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Index of the section in partition order.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "section_{}", self.0)
    }
}

/// Kind of section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Document metadata.
    Metadata,
    /// Group of nodes.
    Nodes,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata => write!(f, "metadata"),
            Self::Nodes => write!(f, "nodes"),
        }
    }
}

/// The metadata slice of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSection {
    /// Section id.
    pub id: SectionId,
    /// Original metadata.
    pub metadata: Metadata,
}

/// A group of nodes plus the context needed to rewrite them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSection {
    /// Section id.
    pub id: SectionId,
    /// Ids of the nodes owned by this section.
    pub node_ids: BTreeSet<NodeId>,
    /// Owned nodes, in document order.
    pub nodes: Vec<Node>,
    /// Edges touching any owned node. Read-only context.
    pub edges: Vec<Edge>,
    /// Suggestions targeting an owned node.
    pub relevant_suggestions: Vec<Suggestion>,
}

/// A disjoint slice of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Section {
    /// Metadata section.
    Metadata(MetadataSection),
    /// Node-group section.
    Nodes(NodeSection),
}

impl Section {
    /// Section id.
    pub fn id(&self) -> SectionId {
        match self {
            Self::Metadata(s) => s.id,
            Self::Nodes(s) => s.id,
        }
    }

    /// Section kind.
    pub fn kind(&self) -> SectionKind {
        match self {
            Self::Metadata(_) => SectionKind::Metadata,
            Self::Nodes(_) => SectionKind::Nodes,
        }
    }

    /// Node-group view, if this is a node section.
    pub fn as_nodes(&self) -> Option<&NodeSection> {
        match self {
            Self::Nodes(s) => Some(s),
            Self::Metadata(_) => None,
        }
    }
}

/// Accepted result of reconstructing one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOutput {
    /// Rewritten metadata.
    Metadata(Metadata),
    /// Rewritten nodes.
    Nodes(Vec<Node>),
}

impl SectionOutput {
    /// Kind of section this output belongs to.
    pub fn kind(&self) -> SectionKind {
        match self {
            Self::Metadata(_) => SectionKind::Metadata,
            Self::Nodes(_) => SectionKind::Nodes,
        }
    }
}
