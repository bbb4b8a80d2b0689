//! # protocol-reconstructor
//!
//! Chunked reconstruction of decision-tree protocol documents.
//!
//! Given a protocol document (metadata, nodes, edges) and a list of approved
//! change suggestions, the engine produces a new version of the document with
//! the suggestions applied, plus a per-suggestion verification report.
//!
//! ## Core Contract
//!
//! 1. The document is partitioned into a metadata section and node groups
//! 2. Each section is rewritten independently by a [`SuggestionOracle`],
//!    with bounded retries and exponential backoff
//! 3. Completed sections are assembled back into one document, ordered by
//!    position, with the version bumped and the schema enforced
//! 4. Cross-references are checked and every suggestion is verified against
//!    the assembled document
//!
//! ## Architecture
//!
//! ```text
//! Document + Suggestions
//!         │
//!         ▼
//!  DocumentPartitioner ──▶ Section × N
//!                              │
//!                              ▼
//!                   SectionReconstructor ──▶ SuggestionOracle
//!                      (retry, extract, contract check)
//!                              │
//!                              ▼
//!  ProgressTracker ──▶ Assembler ──▶ CrossReferenceValidator ──▶ ChangeVerifier
//!                                                                     │
//!                                                                     ▼
//!                                                          ReconstructionResult
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same document + same section outputs → byte-identical assembled document
//! - Node order depends only on positions and section order, never on
//!   completion order
//! - The output digest is SHA-256 over canonical JSON

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod canonical;
pub mod version;
pub mod partition;
pub mod extract;
pub mod oracle;
pub mod prompt;
pub mod retry;
pub mod progress;
pub mod reconstructor;
pub mod assembler;
pub mod validation;
pub mod verifier;
pub mod config;
pub mod engine;
pub mod telemetry;

// Re-exports
pub use types::{
    Document, Metadata, Node, NodeData, NodeId, NodeKind, Edge, Position,
    Question, QuestionOption, QuestionType,
};
pub use types::{Suggestion, SpecificLocation, ImplementationPath, ModificationType};
pub use types::{Section, SectionId, SectionKind, SectionOutput, SectionStatus, SectionState, TransitionError};
pub use types::{ChangeRecord, ReconstructionResult, ReconstructionMetadata, VerificationSummary};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex, canonical_digest};
pub use version::{Bump, SemVer, VersionError, next_version, next_or_default, DEFAULT_VERSION};
pub use partition::{DocumentPartitioner, PartitionPolicy};
pub use extract::{extract_json, ExtractError, Extracted};
pub use oracle::{GenerationRequest, OracleError, ScriptedOracle, SuggestionOracle};
#[cfg(feature = "http")]
pub use oracle::{HttpOracle, HttpOracleConfig};
pub use retry::{BackoffStrategy, Clock, RecordingClock, RetryPolicy, TokioClock};
pub use progress::{ProgressSummary, ProgressTracker};
pub use reconstructor::{SectionError, SectionReconstructor};
pub use assembler::{Assembler, Assembly, AssemblyError};
pub use validation::{
    BasicExpressionValidator, CrossReferenceValidator, ExpressionValidator, KnownSymbols,
    SchemaError, SchemaValidator, StructuralSchemaValidator,
};
pub use verifier::ChangeVerifier;
pub use config::{ConfigError, EngineConfig};
pub use engine::{ReconstructionEngine, ReconstructionError};

/// Prefix of every changelog entry appended to node descriptions.
pub use prompt::CHANGELOG_MARKER;
