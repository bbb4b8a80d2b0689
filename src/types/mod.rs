//! Core types for the reconstruction engine.

pub mod document;
pub mod suggestion;
pub mod section;
pub mod status;
pub mod report;

pub use document::{
    Document, Metadata, Node, NodeId, NodeKind, NodeData, Position, CONDITIONAL_EXPRESSION_FIELD,
    Question, QuestionOption, QuestionType, Edge,
};
pub use suggestion::{Suggestion, Evidence, SpecificLocation, ImplementationPath, ModificationType};
pub use section::{Section, SectionId, SectionKind, SectionOutput, MetadataSection, NodeSection};
pub use status::{SectionStatus, SectionState, TransitionError};
pub use report::{ChangeRecord, ReconstructionResult, ReconstructionMetadata, VerificationSummary};
