//! Document partitioning.
//!
//! Splits a document into one metadata section followed by node-group sections.
//! Group size shrinks as the document grows so each oracle request stays small.
//!
//! ## Guarantees
//!
//! - The metadata section is always `section_0`
//! - Node groups follow document order
//! - Every node lands in exactly one node section (a true partition)

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{Document, MetadataSection, NodeSection, Section, SectionId, Suggestion};

/// Size thresholds that pick how many nodes go into one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionPolicy {
    /// Documents smaller than this use `small_group` nodes per section.
    pub small_doc_bytes: usize,
    /// Documents smaller than this (but not small) use `medium_group`.
    pub medium_doc_bytes: usize,
    /// Nodes per section for small documents.
    pub small_group: usize,
    /// Nodes per section for medium documents.
    pub medium_group: usize,
    /// Nodes per section for large documents.
    pub large_group: usize,
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        Self {
            small_doc_bytes: 50 * 1024,
            medium_doc_bytes: 100 * 1024,
            small_group: 3,
            medium_group: 2,
            large_group: 1,
        }
    }
}

impl PartitionPolicy {
    /// Nodes per section for a document of `doc_bytes` serialized bytes.
    ///
    /// Never returns zero.
    pub fn nodes_per_section(&self, doc_bytes: usize) -> usize {
        let size = if doc_bytes < self.small_doc_bytes {
            self.small_group
        } else if doc_bytes < self.medium_doc_bytes {
            self.medium_group
        } else {
            self.large_group
        };
        size.max(1)
    }
}

/// Splits documents into sections.
#[derive(Debug, Clone, Default)]
pub struct DocumentPartitioner {
    policy: PartitionPolicy,
}

impl DocumentPartitioner {
    /// Create a partitioner.
    pub fn new(policy: PartitionPolicy) -> Self {
        Self { policy }
    }

    /// Get the policy.
    pub fn policy(&self) -> &PartitionPolicy {
        &self.policy
    }

    /// Partition `document`, routing each suggestion to the section owning its node.
    ///
    /// Suggestions without a node (or naming an unknown node) are routed nowhere;
    /// the change verifier still reports them.
    pub fn partition(&self, document: &Document, suggestions: &[Suggestion]) -> Vec<Section> {
        let doc_bytes = document.serialized_len();
        let group_size = self.policy.nodes_per_section(doc_bytes);

        let mut sections = Vec::with_capacity(1 + document.nodes.len().div_ceil(group_size));
        sections.push(Section::Metadata(MetadataSection {
            id: SectionId::new(0),
            metadata: document.metadata.clone(),
        }));

        for (i, group) in document.nodes.chunks(group_size).enumerate() {
            let node_ids: BTreeSet<_> = group.iter().map(|n| n.id.clone()).collect();

            let edges = document
                .edges
                .iter()
                .filter(|e| node_ids.contains(&e.source) || node_ids.contains(&e.target))
                .cloned()
                .collect();

            let relevant_suggestions = suggestions
                .iter()
                .filter(|s| s.target_node().is_some_and(|id| node_ids.contains(id)))
                .cloned()
                .collect();

            sections.push(Section::Nodes(NodeSection {
                id: SectionId::new(i + 1),
                node_ids,
                nodes: group.to_vec(),
                edges,
                relevant_suggestions,
            }));
        }

        tracing::debug!(
            doc_bytes,
            group_size,
            sections = sections.len(),
            "Partitioned document"
        );

        sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Edge, Metadata, Node, NodeKind, Position};

    fn make_doc(n: usize) -> Document {
        let nodes = (1..=n)
            .map(|i| Node::new(format!("node-{i}"), NodeKind::Question, Position::new(i as f64 * 10.0, 0.0)))
            .collect();
        let edges = (1..n)
            .map(|i| Edge::new(format!("e{i}"), format!("node-{i}"), format!("node-{}", i + 1)))
            .collect();
        Document::new(Metadata::new("acme", "triage", "1.0.0"), nodes, edges)
    }

    #[test]
    fn test_group_size_thresholds() {
        let policy = PartitionPolicy::default();
        assert_eq!(policy.nodes_per_section(10), 3);
        assert_eq!(policy.nodes_per_section(50 * 1024), 2);
        assert_eq!(policy.nodes_per_section(100 * 1024 - 1), 2);
        assert_eq!(policy.nodes_per_section(100 * 1024), 1);
    }

    #[test]
    fn test_zero_group_size_clamped() {
        let policy = PartitionPolicy { small_group: 0, ..PartitionPolicy::default() };
        assert_eq!(policy.nodes_per_section(1), 1);
    }

    #[test]
    fn test_two_node_document_single_group() {
        let doc = make_doc(2);
        let sections = DocumentPartitioner::default().partition(&doc, &[]);

        assert_eq!(sections.len(), 2);
        assert!(matches!(sections[0], Section::Metadata(_)));
        let group = sections[1].as_nodes().unwrap();
        assert_eq!(group.id, SectionId::new(1));
        assert_eq!(group.node_ids.len(), 2);
        assert_eq!(group.edges.len(), 1);
        assert!(group.relevant_suggestions.is_empty());
    }

    #[test]
    fn test_boundary_edge_in_both_sections() {
        let doc = make_doc(4);
        let sections = DocumentPartitioner::default().partition(&doc, &[]);

        // Groups {1,2,3} and {4}; edge 3->4 crosses the boundary.
        assert_eq!(sections.len(), 3);
        let first = sections[1].as_nodes().unwrap();
        let second = sections[2].as_nodes().unwrap();
        assert!(first.edges.iter().any(|e| e.id == "e3"));
        assert!(second.edges.iter().any(|e| e.id == "e3"));
        assert_eq!(second.edges.len(), 1);
    }

    #[test]
    fn test_suggestions_routed_by_node() {
        let doc = make_doc(5);
        let suggestions = vec![
            Suggestion::new("sug_01", "a").at("node-1", "description"),
            Suggestion::new("sug_02", "b").at("node-5", "description"),
            Suggestion::new("sug_03", "c"),
            Suggestion::new("sug_04", "d").at("node-99", "description"),
        ];
        let sections = DocumentPartitioner::default().partition(&doc, &suggestions);

        let first = sections[1].as_nodes().unwrap();
        let second = sections[2].as_nodes().unwrap();
        assert_eq!(first.relevant_suggestions.len(), 1);
        assert_eq!(first.relevant_suggestions[0].id, "sug_01");
        assert_eq!(second.relevant_suggestions.len(), 1);
        assert_eq!(second.relevant_suggestions[0].id, "sug_02");
    }

    #[test]
    fn test_empty_document_only_metadata() {
        let doc = make_doc(0);
        let sections = DocumentPartitioner::default().partition(&doc, &[]);
        assert_eq!(sections.len(), 1);
    }
}
