//! Change verification.
//!
//! A suggestion counts as applied when the canonical serialization of its
//! target node differs between the original and reconstructed documents.
//! Failures are data, reported per suggestion; verification never aborts.

use crate::canonical::{canonically_equal, to_canonical_string};
use crate::prompt::CHANGELOG_MARKER;
use crate::types::{ChangeRecord, Document, Node, Suggestion, VerificationSummary};

/// Maximum characters kept in before/after snippets.
pub const SNIPPET_CHARS: usize = 200;

/// Field name reported when a suggestion names none.
const UNKNOWN_FIELD: &str = "unknown";

/// Compares original and reconstructed documents per suggestion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeVerifier;

impl ChangeVerifier {
    /// Create a verifier.
    pub fn new() -> Self {
        Self
    }

    /// One record per suggestion, in input order.
    pub fn verify(&self, original: &Document, reconstructed: &Document, suggestions: &[Suggestion]) -> Vec<ChangeRecord> {
        let records: Vec<ChangeRecord> = suggestions
            .iter()
            .map(|s| verify_one(original, reconstructed, s))
            .collect();

        let summary = VerificationSummary::from_records(&records);
        if summary.failed > 0 {
            tracing::warn!(
                total = summary.total,
                verified = summary.verified,
                failed = summary.failed,
                "Some suggestions produced no observable change"
            );
        } else {
            tracing::info!(total = summary.total, "All suggestions verified");
        }
        records
    }
}

fn verify_one(original: &Document, reconstructed: &Document, suggestion: &Suggestion) -> ChangeRecord {
    let mut record = ChangeRecord {
        suggestion_id: suggestion.id.clone(),
        node_id: suggestion.target_node().cloned(),
        target_field: suggestion.target_field().unwrap_or(UNKNOWN_FIELD).to_string(),
        verified: false,
        before_snippet: None,
        after_snippet: None,
        has_changelog: false,
        error: None,
    };

    let Some(node_id) = suggestion.target_node() else {
        record.error = Some("no location specified".to_string());
        return record;
    };
    let (Some(before), Some(after)) = (original.node(node_id), reconstructed.node(node_id)) else {
        tracing::debug!(
            suggestion_id = %suggestion.id,
            node_id = %node_id,
            in_original = original.node(node_id).is_some(),
            "Suggestion target node not found"
        );
        record.error = Some("node not found".to_string());
        return record;
    };

    record.before_snippet = Some(snippet(before));
    record.after_snippet = Some(snippet(after));
    if canonically_equal(before, after) {
        record.error = Some("node unchanged".to_string());
        return record;
    }

    record.verified = true;
    record.has_changelog = has_changelog(after, &suggestion.id);
    record
}

fn snippet(node: &Node) -> String {
    to_canonical_string(node).chars().take(SNIPPET_CHARS).collect()
}

/// Whether the node description carries a changelog entry naming `suggestion_id`.
pub fn has_changelog(node: &Node, suggestion_id: &str) -> bool {
    let description = &node.data.description;
    description.contains(CHANGELOG_MARKER) && description.contains(suggestion_id)
}
