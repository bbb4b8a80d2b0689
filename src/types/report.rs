//! Output of a reconstruction run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{Document, NodeId};

/// Outcome of checking one suggestion against the reconstructed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Suggestion checked.
    pub suggestion_id: String,
    /// Node the suggestion targets, if any.
    pub node_id: Option<NodeId>,
    /// Field the suggestion targets.
    pub target_field: String,
    /// Whether an observable change was found.
    pub verified: bool,
    /// Serialized node before reconstruction, truncated.
    pub before_snippet: Option<String>,
    /// Serialized node after reconstruction, truncated.
    pub after_snippet: Option<String>,
    /// Whether the node description carries a changelog entry for the suggestion.
    pub has_changelog: bool,
    /// Why verification failed.
    pub error: Option<String>,
}

/// Aggregate counts over a set of change records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    /// Number of suggestions checked.
    pub total: usize,
    /// Number verified.
    pub verified: usize,
    /// Number not verified.
    pub failed: usize,
    /// `verified / total`, or `1.0` when nothing was checked.
    pub verification_rate: f64,
}

impl VerificationSummary {
    /// Summarize change records.
    pub fn from_records(records: &[ChangeRecord]) -> Self {
        let total = records.len();
        let verified = records.iter().filter(|r| r.verified).count();
        let verification_rate = if total == 0 {
            1.0
        } else {
            verified as f64 / total as f64
        };
        Self {
            total,
            verified,
            failed: total - verified,
            verification_rate,
        }
    }
}

/// Run metadata attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructionMetadata {
    /// Unique id of this run.
    pub run_id: String,
    /// Version of the input document.
    pub original_version: String,
    /// Version stamped on the output document.
    pub new_version: String,
    /// Number of sections, metadata section included.
    pub section_count: usize,
    /// Number of suggestions handed to the engine.
    pub suggestions_applied: usize,
    /// Original edges dropped because an endpoint vanished.
    pub dropped_edges: usize,
    /// SHA-256 of the canonical output document.
    pub document_digest: String,
    /// Fingerprint of the engine configuration.
    pub config_hash: String,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
}

/// The only value a reconstruction run returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructionResult {
    /// Reconstructed document.
    pub document: Document,
    /// One record per suggestion, in input order.
    pub change_records: Vec<ChangeRecord>,
    /// Non-fatal findings.
    pub validation_warnings: Vec<String>,
    /// `true` when no warnings were raised.
    pub validation_passed: bool,
    /// Run metadata.
    pub metadata: ReconstructionMetadata,
}

impl ReconstructionResult {
    /// Summary of the change records.
    pub fn verification_summary(&self) -> VerificationSummary {
        VerificationSummary::from_records(&self.change_records)
    }
}
