//! Reconstruction pipeline.
//!
//! ```text
//! Document + Suggestions
//!        │
//!        ▼
//!   Partitioner ──▶ [SectionReconstructor × N]  (bounded concurrency)
//!                            │
//!                            ▼
//!                        Assembler ──▶ CrossReferenceValidator ──▶ ChangeVerifier
//!                                                                      │
//!                                                                      ▼
//!                                                           ReconstructionResult
//! ```
//!
//! The first section that exhausts its retries aborts the run: sibling
//! futures still in flight are dropped and completed siblings are discarded.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, TryStreamExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::assembler::{Assembler, AssemblyError};
use crate::canonical::canonical_digest;
use crate::config::EngineConfig;
use crate::oracle::SuggestionOracle;
use crate::partition::DocumentPartitioner;
use crate::progress::ProgressTracker;
use crate::reconstructor::{SectionError, SectionReconstructor};
use crate::retry::{Clock, TokioClock};
use crate::types::{
    Document, ReconstructionMetadata, ReconstructionResult, SectionId, Suggestion, TransitionError,
};
use crate::validation::{
    CrossReferenceValidator, ExpressionValidator, SchemaError, SchemaValidator,
};
use crate::verifier::ChangeVerifier;
use crate::version::next_or_default;

/// Error type for a reconstruction run. Every variant aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconstructionError {
    /// The input document repeats node ids.
    #[error("Invalid document: duplicate node id(s): {}", .ids.join(", "))]
    DuplicateNodeIds {
        /// Each repeated id, once.
        ids: Vec<String>,
    },
    /// A section exhausted its retries.
    #[error("Section reconstruction failed: {section_id} after {attempts} attempt(s): {last_error}")]
    SectionReconstructionFailed {
        /// Failed section.
        section_id: SectionId,
        /// Oracle calls made for it.
        attempts: u32,
        /// Error of its final attempt.
        last_error: String,
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
    SchemaValidationFailed(SchemaError),
    /// A section was not completed at assembly time.
    #[error(transparent)]
    Incomplete(AssemblyError),
    /// A status cell was driven through an illegal transition.
    #[error(transparent)]
    State(#[from] TransitionError),
}

impl ReconstructionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateNodeIds { .. } => "DUPLICATE_NODE_ID",
            Self::SectionReconstructionFailed { .. } => "SECTION_RECONSTRUCTION_FAILED",
            Self::NodeCountMismatch { .. } => "NODE_COUNT_MISMATCH",
            Self::SchemaValidationFailed(_) => "SCHEMA_VALIDATION_FAILED",
            Self::Incomplete(_) => "SECTION_INCOMPLETE",
            Self::State(_) => "ILLEGAL_TRANSITION",
        }
    }
}

impl From<SectionError> for ReconstructionError {
    fn from(err: SectionError) -> Self {
        match err {
            SectionError::ReconstructionFailed {
                section_id,
                attempts,
                last_error,
            } => Self::SectionReconstructionFailed {
                section_id,
                attempts,
                last_error,
            },
            SectionError::Transition(e) => Self::State(e),
        }
    }
}

impl From<AssemblyError> for ReconstructionError {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::NodeCountMismatch { expected, got } => Self::NodeCountMismatch { expected, got },
            AssemblyError::SchemaValidationFailed(e) => Self::SchemaValidationFailed(e),
            other => Self::Incomplete(other),
        }
    }
}

/// Runs the full pipeline for one document.
#[derive(Clone)]
pub struct ReconstructionEngine {
    config: EngineConfig,
    oracle: Arc<dyn SuggestionOracle>,
    partitioner: DocumentPartitioner,
    reconstructor: SectionReconstructor,
    assembler: Assembler,
    cross_reference: CrossReferenceValidator,
    verifier: ChangeVerifier,
}

impl std::fmt::Debug for ReconstructionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconstructionEngine")
            .field("config", &self.config)
            .field("oracle", &self.oracle.name())
            .finish_non_exhaustive()
    }
}

impl ReconstructionEngine {
    /// Create an engine with the tokio clock and the default validators.
    pub fn new(oracle: Arc<dyn SuggestionOracle>, config: EngineConfig) -> Self {
        Self {
            partitioner: DocumentPartitioner::new(config.partition.clone()),
            reconstructor: SectionReconstructor::new(oracle.clone(), Arc::new(TokioClock)),
            assembler: Assembler::default(),
            cross_reference: CrossReferenceValidator::default(),
            verifier: ChangeVerifier::new(),
            config,
            oracle,
        }
    }

    /// Replace the clock used for backoff sleeps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.reconstructor = SectionReconstructor::new(self.oracle.clone(), clock);
        self
    }

    /// Replace the schema validator run at assembly.
    pub fn with_schema_validator(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.assembler = Assembler::new(schema);
        self
    }

    /// Replace the expression validator used by the cross-reference pass.
    pub fn with_expression_validator(mut self, expressions: Arc<dyn ExpressionValidator>) -> Self {
        self.cross_reference = CrossReferenceValidator::new(expressions);
        self
    }

    /// Get the config.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reconstruct `document` by applying `suggestions`.
    pub async fn reconstruct(
        &self,
        document: &Document,
        suggestions: &[Suggestion],
    ) -> Result<ReconstructionResult, ReconstructionError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("reconstruction", run_id = %run_id);
        self.run(run_id, document, suggestions).instrument(span).await
    }

    async fn run(
        &self,
        run_id: String,
        document: &Document,
        suggestions: &[Suggestion],
    ) -> Result<ReconstructionResult, ReconstructionError> {
        let started = Instant::now();
        let duplicates = document.duplicate_node_ids();
        if !duplicates.is_empty() {
            let ids: Vec<String> = duplicates.iter().map(|id| id.as_str().to_string()).collect();
            tracing::error!(ids = ?ids, "Rejecting document with duplicate node ids");
            return Err(ReconstructionError::DuplicateNodeIds { ids });
        }

        let original_version = document.metadata.version.clone();
        let new_version = next_or_default(&original_version, self.config.version_bump);

        let sections = self.partitioner.partition(document, suggestions);
        let tracker = ProgressTracker::new(&sections);
        tracing::info!(
            original_version = %original_version,
            new_version = %new_version,
            sections = sections.len(),
            suggestions = suggestions.len(),
            max_concurrency = self.config.max_concurrency,
            "Starting reconstruction"
        );

        let work = sections
            .iter()
            .filter_map(|section| tracker.handle(section.id()).map(|handle| (section, handle)));
        stream::iter(work.map(Ok::<_, ReconstructionError>))
            .try_for_each_concurrent(self.config.max_concurrency.max(1), |(section, handle)| {
                let new_version = new_version.as_str();
                async move {
                    self.reconstructor
                        .reconstruct(section, new_version, &self.config.retry, &handle)
                        .await?;
                    Ok(())
                }
            })
            .await
            .map_err(|e| {
                let progress = tracker.summary();
                tracing::error!(
                    error = %e,
                    completed = progress.completed,
                    in_progress = progress.in_progress,
                    pending = progress.pending,
                    "Reconstruction aborted"
                );
                e
            })?;

        let assembly = self.assembler.assemble(document, &tracker.snapshot(), &new_version)?;

        let mut validation_warnings = Vec::new();
        if assembly.dropped_edges > 0 {
            validation_warnings.push(format!(
                "Dropped {} edge(s) with missing endpoints during assembly",
                assembly.dropped_edges
            ));
        }
        validation_warnings.extend(self.cross_reference.validate(&assembly.document));

        let change_records = self.verifier.verify(document, &assembly.document, suggestions);

        let metadata = ReconstructionMetadata {
            run_id,
            original_version,
            new_version,
            section_count: sections.len(),
            suggestions_applied: suggestions.len(),
            dropped_edges: assembly.dropped_edges,
            document_digest: canonical_digest(&assembly.document),
            config_hash: self.config.params_hash(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
        };

        let result = ReconstructionResult {
            document: assembly.document,
            change_records,
            validation_passed: validation_warnings.is_empty(),
            validation_warnings,
            metadata,
        };

        let summary = result.verification_summary();
        tracing::info!(
            new_version = %result.metadata.new_version,
            warnings = result.validation_warnings.len(),
            verified = summary.verified,
            failed = summary.failed,
            duration_ms = result.metadata.duration_ms,
            "Reconstruction complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use crate::retry::{RecordingClock, RetryPolicy};
    use crate::types::{Edge, Metadata, Node, NodeKind, Position};

    fn document() -> Document {
        Document::new(
            Metadata::new("acme", "triage", "0.1.1"),
            vec![
                Node::new("node-1", NodeKind::Question, Position::new(0.0, 0.0)).with_description("Start"),
                Node::new("node-2", NodeKind::Terminal, Position::new(100.0, 0.0)),
            ],
            vec![Edge::new("e1", "node-1", "node-2")],
        )
    }

    fn engine(oracle: ScriptedOracle) -> ReconstructionEngine {
        let config = EngineConfig {
            retry: RetryPolicy::immediate(3),
            ..EngineConfig::default()
        };
        ReconstructionEngine::new(Arc::new(oracle), config).with_clock(Arc::new(RecordingClock::new()))
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let suggestions = vec![Suggestion::new("sug_01", "Clarify start").at("node-1", "description")];
        let result = engine(ScriptedOracle::echo())
            .reconstruct(&document(), &suggestions)
            .await
            .unwrap();

        assert_eq!(result.document.metadata.version, "0.1.2");
        assert_eq!(result.metadata.original_version, "0.1.1");
        assert_eq!(result.metadata.section_count, 2);
        assert_eq!(result.metadata.suggestions_applied, 1);
        assert_eq!(result.metadata.document_digest.len(), 64);
        assert!(result.validation_passed);
        assert_eq!(result.change_records.len(), 1);
        assert!(result.change_records[0].verified);
        assert!(result.change_records[0].has_changelog);
    }

    #[tokio::test]
    async fn test_malformed_version_falls_back() {
        let mut doc = document();
        doc.metadata.version = "draft".into();
        let result = engine(ScriptedOracle::echo()).reconstruct(&doc, &[]).await.unwrap();
        assert_eq!(result.document.metadata.version, "1.0.1");
        assert_eq!(result.metadata.original_version, "draft");
    }

    #[tokio::test]
    async fn test_duplicate_node_ids_rejected_before_oracle() {
        let mut doc = document();
        doc.nodes.push(Node::new("node-1", NodeKind::Decision, Position::new(50.0, 0.0)));
        let oracle = Arc::new(ScriptedOracle::echo());
        let clock = Arc::new(RecordingClock::new());
        let engine = ReconstructionEngine::new(oracle.clone(), EngineConfig::default()).with_clock(clock.clone());

        let err = engine.reconstruct(&doc, &[]).await.unwrap_err();

        assert_eq!(err, ReconstructionError::DuplicateNodeIds { ids: vec!["node-1".to_string()] });
        assert_eq!(err.code(), "DUPLICATE_NODE_ID");
        assert!(oracle.calls().is_empty());
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_error_mapping() {
        let err: ReconstructionError = AssemblyError::NodeCountMismatch { expected: 3, got: 2 }.into();
        assert_eq!(err, ReconstructionError::NodeCountMismatch { expected: 3, got: 2 });
        assert_eq!(err.code(), "NODE_COUNT_MISMATCH");

        let err: ReconstructionError = AssemblyError::MetadataIncomplete.into();
        assert_eq!(err.code(), "SECTION_INCOMPLETE");

        let err: ReconstructionError = SectionError::ReconstructionFailed {
            section_id: SectionId::new(2),
            attempts: 4,
            last_error: "node id mismatch".into(),
        }
        .into();
        assert_eq!(err.code(), "SECTION_RECONSTRUCTION_FAILED");
        assert!(err.to_string().contains("section_2"));
    }
}
