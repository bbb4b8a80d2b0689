//! Document assembly from completed sections.
//!
//! ## Assembly Steps
//!
//! 1. The metadata section must be completed
//! 2. Every node section must be completed (first incomplete one is reported)
//! 3. Node lists are concatenated in section order, then stable-sorted by `position.x`
//! 4. Node count must equal the original's
//! 5. Edges are recomputed from the original, keeping only those whose
//!    endpoints both survive; dropped edges are counted, not fatal
//! 6. The new version is stamped and the schema validator runs
//!
//! Assembly is a pure function of its inputs, so assembling the same status
//! map twice yields byte-identical documents.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::types::{Document, Edge, Metadata, Node, SectionId, SectionKind, SectionOutput, SectionStatus};
use crate::validation::{SchemaError, SchemaValidator, StructuralSchemaValidator};

/// Error type for assembly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    /// No completed metadata section.
    #[error("Metadata section is not completed")]
    MetadataIncomplete,
    /// A node section is not completed.
    #[error("{section_id} is not completed (state: {state})")]
    SectionIncomplete {
        /// First incomplete section, in section order.
        section_id: SectionId,
        /// Its state name.
        state: &'static str,
    },
    /// Assembled node count differs from the original.
    #[error("Node count mismatch: expected {expected}, got {got}")]
    NodeCountMismatch {
        /// Nodes in the original document.
        expected: usize,
        /// Nodes assembled.
        got: usize,
    },
    /// The assembled document violates the schema.
    #[error(transparent)]
    SchemaValidationFailed(#[from] SchemaError),
}

/// Assembled document plus bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    /// The new document.
    pub document: Document,
    /// Original edges dropped because an endpoint vanished.
    pub dropped_edges: usize,
}

/// Merges completed section outputs into a document.
#[derive(Clone)]
pub struct Assembler {
    schema: Arc<dyn SchemaValidator>,
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler").finish_non_exhaustive()
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(Arc::new(StructuralSchemaValidator))
    }
}

impl Assembler {
    /// Create an assembler with a schema validator.
    pub fn new(schema: Arc<dyn SchemaValidator>) -> Self {
        Self { schema }
    }

    /// Assemble a document from `statuses`.
    pub fn assemble(
        &self,
        original: &Document,
        statuses: &BTreeMap<SectionId, SectionStatus>,
        new_version: &str,
    ) -> Result<Assembly, AssemblyError> {
        let mut metadata = completed_metadata(statuses)?;

        let mut nodes: Vec<Node> = Vec::with_capacity(original.nodes.len());
        for status in statuses.values().filter(|s| s.kind == SectionKind::Nodes) {
            match status.data() {
                Some(SectionOutput::Nodes(section_nodes)) => nodes.extend(section_nodes.iter().cloned()),
                _ => {
                    return Err(AssemblyError::SectionIncomplete {
                        section_id: status.section_id,
                        state: status.state.name(),
                    })
                }
            }
        }
        nodes.sort_by(|a, b| a.position.x.total_cmp(&b.position.x));

        if nodes.len() != original.nodes.len() {
            return Err(AssemblyError::NodeCountMismatch {
                expected: original.nodes.len(),
                got: nodes.len(),
            });
        }

        let (edges, dropped_edges) = surviving_edges(&original.edges, &nodes);
        if dropped_edges > 0 {
            tracing::warn!(dropped_edges, "Dropped edges with missing endpoints");
        }

        metadata.version = new_version.to_string();
        let document = Document {
            metadata,
            nodes,
            edges,
            extra: original.extra.clone(),
        };
        self.schema.validate(&document)?;

        tracing::debug!(
            nodes = document.nodes.len(),
            edges = document.edges.len(),
            dropped_edges,
            "Assembled document"
        );
        Ok(Assembly { document, dropped_edges })
    }
}

fn completed_metadata(statuses: &BTreeMap<SectionId, SectionStatus>) -> Result<Metadata, AssemblyError> {
    statuses
        .values()
        .find(|s| s.kind == SectionKind::Metadata)
        .and_then(|s| match s.data() {
            Some(SectionOutput::Metadata(metadata)) => Some(metadata.clone()),
            _ => None,
        })
        .ok_or(AssemblyError::MetadataIncomplete)
}

fn surviving_edges(original: &[Edge], nodes: &[Node]) -> (Vec<Edge>, usize) {
    let ids: BTreeSet<_> = nodes.iter().map(|n| &n.id).collect();
    let kept: Vec<Edge> = original
        .iter()
        .filter(|e| ids.contains(&e.source) && ids.contains(&e.target))
        .cloned()
        .collect();
    let dropped = original.len() - kept.len();
    (kept, dropped)
}
