//! Section reconstruction with bounded retries.
//!
//! One section goes through at most `max_retries + 1` oracle calls. Each
//! attempt renders a prompt, calls the oracle under the per-call deadline,
//! extracts JSON from the reply and checks it against the local section
//! contract. A failed attempt is fed back into the next prompt.
//!
//! ## Section Contract
//!
//! - Metadata: an object (under `metadata`, or bare) with non-empty
//!   `version`, `company` and `name`
//! - Nodes: a list (under `reconstructedNodes`, or bare) whose id set equals
//!   the section's id set exactly; duplicates are rejected; every node has
//!   `id`, `type` and `data`
//! - Each node keeps its original `type` and `position`; an omitted position
//!   is taken from the input

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::extract::extract_json;
use crate::oracle::{GenerationRequest, OracleError, SuggestionOracle};
use crate::progress::StatusHandle;
use crate::prompt::build_prompt;
use crate::retry::{Clock, RetryPolicy};
use crate::types::{Metadata, Node, NodeSection, Section, SectionId, SectionOutput, TransitionError};

/// Keys under which a node list is accepted.
const NODE_LIST_KEYS: &[&str] = &["reconstructedNodes", "reconstructed_nodes", "nodes"];

/// Fields every returned node must carry.
const REQUIRED_NODE_FIELDS: &[&str] = &["id", "type", "data"];

/// Why one attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptErrorKind {
    /// The oracle call itself failed.
    Oracle,
    /// The oracle call exceeded its deadline.
    Timeout,
    /// No usable JSON in the reply.
    MalformedJson,
    /// JSON did not satisfy the section contract.
    ContractViolation,
}

impl fmt::Display for AttemptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oracle => write!(f, "oracle error"),
            Self::Timeout => write!(f, "timeout"),
            Self::MalformedJson => write!(f, "malformed JSON"),
            Self::ContractViolation => write!(f, "contract violation"),
        }
    }
}

/// Failure of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AttemptError {
    /// Failure class.
    pub kind: AttemptErrorKind,
    /// Human-readable detail, fed to the next prompt.
    pub message: String,
    /// Whether another attempt may help.
    pub retryable: bool,
}

impl AttemptError {
    /// Create a retryable attempt error.
    pub fn new(kind: AttemptErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: true,
        }
    }

    fn contract(message: impl Into<String>) -> Self {
        Self::new(AttemptErrorKind::ContractViolation, message)
    }
}

impl From<OracleError> for AttemptError {
    fn from(err: OracleError) -> Self {
        let kind = match err {
            OracleError::Timeout(_) => AttemptErrorKind::Timeout,
            _ => AttemptErrorKind::Oracle,
        };
        Self {
            kind,
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

/// Error type for section reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SectionError {
    /// Every allowed attempt failed.
    #[error("{section_id} failed after {attempts} attempt(s): {last_error}")]
    ReconstructionFailed {
        /// Failed section.
        section_id: SectionId,
        /// Oracle calls made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },
    /// The status cell was not in a state this worker can drive.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Rewrites one section through the oracle.
#[derive(Clone)]
pub struct SectionReconstructor {
    oracle: Arc<dyn SuggestionOracle>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SectionReconstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionReconstructor")
            .field("oracle", &self.oracle.name())
            .finish()
    }
}

impl SectionReconstructor {
    /// Create a reconstructor.
    pub fn new(oracle: Arc<dyn SuggestionOracle>, clock: Arc<dyn Clock>) -> Self {
        Self { oracle, clock }
    }

    /// Reconstruct `section`, driving its status cell from `Pending` to
    /// `Completed` or `Failed`.
    ///
    /// Non-retryable oracle failures (credentials, configuration) end the
    /// section early.
    pub async fn reconstruct(
        &self,
        section: &Section,
        new_version: &str,
        policy: &RetryPolicy,
        status: &StatusHandle,
    ) -> Result<SectionOutput, SectionError> {
        let section_id = section.id();
        status.lock().start()?;

        let mut previous_error: Option<String> = None;
        let mut attempt: u32 = 0;
        loop {
            let span = tracing::info_span!("section_attempt", section_id = %section_id, attempt);
            let result = self
                .attempt(section, new_version, policy, attempt, previous_error.as_deref())
                .instrument(span)
                .await;

            match result {
                Ok(output) => {
                    status.lock().complete(output.clone())?;
                    tracing::info!(section_id = %section_id, attempts = attempt + 1, "Section reconstructed");
                    return Ok(output);
                }
                Err(err) => {
                    let message = err.to_string();
                    status.lock().fail(message.clone())?;
                    tracing::warn!(
                        section_id = %section_id,
                        attempt,
                        kind = %err.kind,
                        error = %err.message,
                        "Section attempt failed"
                    );

                    if attempt + 1 >= policy.max_attempts() || !err.retryable {
                        tracing::error!(section_id = %section_id, attempts = attempt + 1, "Section reconstruction exhausted");
                        return Err(SectionError::ReconstructionFailed {
                            section_id,
                            attempts: attempt + 1,
                            last_error: message,
                        });
                    }

                    self.clock.sleep(policy.delay(attempt)).await;
                    status.lock().retry()?;
                    previous_error = Some(message);
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        section: &Section,
        new_version: &str,
        policy: &RetryPolicy,
        attempt: u32,
        previous_error: Option<&str>,
    ) -> Result<SectionOutput, AttemptError> {
        let request = GenerationRequest {
            section: section.clone(),
            new_version: new_version.to_string(),
            attempt,
            prompt: build_prompt(section, new_version, previous_error),
            previous_error: previous_error.map(str::to_string),
        };

        let call = self.oracle.generate(&request);
        let text = match policy.call_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| AttemptError::from(OracleError::Timeout(limit.as_secs())))??,
            None => call.await?,
        };

        let extracted = extract_json(&text)
            .map_err(|e| AttemptError::new(AttemptErrorKind::MalformedJson, e.to_string()))?;
        validate_section_output(section, extracted.value).map_err(AttemptError::contract)
    }
}

/// Check an extracted reply against the section contract.
///
/// Returns the typed output, or the violation text.
pub fn validate_section_output(section: &Section, value: Value) -> Result<SectionOutput, String> {
    match section {
        Section::Metadata(s) => {
            let metadata = validate_metadata(value)?;
            if metadata.company != s.metadata.company || metadata.name != s.metadata.name {
                tracing::warn!(
                    section_id = %s.id,
                    company = %metadata.company,
                    name = %metadata.name,
                    "Oracle changed protocol identity fields"
                );
            }
            Ok(SectionOutput::Metadata(metadata))
        }
        Section::Nodes(s) => validate_nodes(s, value).map(SectionOutput::Nodes),
    }
}

fn validate_metadata(value: Value) -> Result<Metadata, String> {
    let object = match value {
        Value::Object(mut map) => match map.remove("metadata") {
            Some(Value::Object(inner)) => inner,
            Some(_) => return Err("'metadata' is not an object".to_string()),
            None if map.contains_key("version") => map,
            None => return Err("response missing 'metadata' object".to_string()),
        },
        _ => return Err("response is not a JSON object".to_string()),
    };

    for field in ["version", "company", "name"] {
        let present = object
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            return Err(format!("metadata field '{field}' missing or empty"));
        }
    }

    serde_json::from_value(Value::Object(object)).map_err(|e| format!("metadata does not match schema: {e}"))
}

fn validate_nodes(section: &NodeSection, value: Value) -> Result<Vec<Node>, String> {
    let items = node_list(value)?;

    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for (i, item) in items.iter().enumerate() {
        let object = item
            .as_object()
            .ok_or_else(|| format!("node at index {i} is not an object"))?;
        if let Some(field) = REQUIRED_NODE_FIELDS.iter().find(|f| !object.contains_key(**f)) {
            return Err(format!("node at index {i} missing required field '{field}'"));
        }
        let id = node_id_of(object).ok_or_else(|| format!("node at index {i} has a non-string id"))?;
        if !seen.insert(id.clone()) {
            duplicates.insert(id);
        }
    }

    let expected: BTreeSet<String> = section.node_ids.iter().map(|id| id.as_str().to_string()).collect();
    let missing: Vec<&String> = expected.difference(&seen).collect();
    let unexpected: Vec<&String> = seen.difference(&expected).collect();
    if !missing.is_empty() || !unexpected.is_empty() || !duplicates.is_empty() {
        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing {missing:?}"));
        }
        if !unexpected.is_empty() {
            parts.push(format!("unexpected {unexpected:?}"));
        }
        if !duplicates.is_empty() {
            parts.push(format!("duplicate {duplicates:?}"));
        }
        return Err(format!(
            "node id mismatch: expected {} node(s), got {}; {}",
            expected.len(),
            items.len(),
            parts.join(", ")
        ));
    }

    items
        .into_iter()
        .map(|item| -> Result<Node, String> {
            let id = item.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let has_position = item.get("position").is_some_and(|p| !p.is_null());
            let mut node: Node =
                serde_json::from_value(item).map_err(|e| format!("node {id} does not match schema: {e}"))?;
            if let Some(original) = section.nodes.iter().find(|n| n.id == node.id) {
                if !has_position {
                    node.position = original.position;
                }
                check_fixed_fields(original, &node)?;
            }
            Ok(node)
        })
        .collect()
}

/// The oracle may only rewrite `data`; type and position are fixed.
fn check_fixed_fields(original: &Node, returned: &Node) -> Result<(), String> {
    if returned.kind != original.kind {
        return Err(format!(
            "node {} changed type from '{}' to '{}'",
            original.id, original.kind, returned.kind
        ));
    }
    if returned.position != original.position {
        return Err(format!(
            "node {} moved from ({}, {}) to ({}, {})",
            original.id, original.position.x, original.position.y, returned.position.x, returned.position.y
        ));
    }
    Ok(())
}

fn node_list(value: Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => NODE_LIST_KEYS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| "response missing 'reconstructedNodes' list".to_string()),
        _ => Err("response is neither a node list nor an object".to_string()),
    }
}

fn node_id_of(object: &Map<String, Value>) -> Option<String> {
    object.get("id").and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::oracle::{echo_response, ScriptedOracle};
    use crate::partition::DocumentPartitioner;
    use crate::progress::ProgressTracker;
    use crate::retry::RecordingClock;
    use crate::types::{Document, NodeKind, Position, SectionState, Suggestion};

    // ─── Test Helpers ───

    fn make_sections() -> Vec<Section> {
        let doc = Document::new(
            Metadata::new("acme", "triage", "0.1.1"),
            vec![
                Node::new("node-1", NodeKind::Question, Position::new(0.0, 0.0)).with_description("Screening"),
                Node::new("node-2", NodeKind::Terminal, Position::new(100.0, 0.0)),
            ],
            vec![],
        );
        let suggestions = vec![Suggestion::new("sug_01", "Ask about allergies").at("node-1", "questions")];
        DocumentPartitioner::default().partition(&doc, &suggestions)
    }

    struct Harness {
        oracle: Arc<ScriptedOracle>,
        clock: Arc<RecordingClock>,
        reconstructor: SectionReconstructor,
        tracker: ProgressTracker,
        sections: Vec<Section>,
    }

    fn harness(oracle: ScriptedOracle) -> Harness {
        let oracle = Arc::new(oracle);
        let clock = Arc::new(RecordingClock::new());
        let reconstructor = SectionReconstructor::new(oracle.clone(), clock.clone());
        let sections = make_sections();
        let tracker = ProgressTracker::new(&sections);
        Harness { oracle, clock, reconstructor, tracker, sections }
    }

    impl Harness {
        async fn run(&self, index: usize, policy: &RetryPolicy) -> Result<SectionOutput, SectionError> {
            let section = &self.sections[index];
            let handle = self.tracker.handle(section.id()).unwrap();
            self.reconstructor.reconstruct(section, "0.1.2", policy, &handle).await
        }
    }

    // ─── Retry Behaviour ───

    #[tokio::test]
    async fn test_first_attempt_success() {
        let h = harness(ScriptedOracle::echo());
        let output = h.run(1, &RetryPolicy::default()).await.unwrap();

        assert!(matches!(output, SectionOutput::Nodes(ref nodes) if nodes.len() == 2));
        let status = h.tracker.status(SectionId::new(1)).unwrap();
        assert!(status.is_completed());
        assert_eq!(status.retry_count, 0);
        assert!(h.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_then_valid() {
        let h = harness(ScriptedOracle::echo());
        let id = SectionId::new(1);
        h.oracle.push(id, "Sorry, here is the result: {broken").push(id, "not json at all");

        h.run(1, &RetryPolicy::default()).await.unwrap();

        assert_eq!(h.oracle.call_count(id), 3);
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(h.tracker.status(id).unwrap().retry_count, 2);

        let calls = h.oracle.calls();
        assert!(calls[0].previous_error.is_none());
        let corrective = calls[2].previous_error.as_deref().unwrap();
        assert!(corrective.starts_with("malformed JSON"));
        assert!(calls[2].prompt.contains(corrective));
    }

    #[tokio::test]
    async fn test_retry_bound_on_persistent_id_mismatch() {
        let only_first = json!({"reconstructedNodes": [
            {"id": "node-1", "type": "question", "position": {"x": 0.0, "y": 0.0}, "data": {}}
        ]})
        .to_string();
        let h = harness(ScriptedOracle::new().with_responder(move |_| Ok(only_first.clone())));
        let id = SectionId::new(1);

        let err = h.run(1, &RetryPolicy::default()).await.unwrap_err();

        match err {
            SectionError::ReconstructionFailed { section_id, attempts, last_error } => {
                assert_eq!(section_id, id);
                assert_eq!(attempts, 4);
                assert!(last_error.contains("node id mismatch"));
                assert!(last_error.contains("node-2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.oracle.call_count(id), 4);
        assert_eq!(
            h.clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
        let status = h.tracker.status(id).unwrap();
        assert!(matches!(status.state, SectionState::Failed(_)));
        assert_eq!(status.retry_count, 3);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let h = harness(ScriptedOracle::echo());
        let id = SectionId::new(1);
        let node = json!({"id": "node-1", "type": "question", "data": {}});
        let two = json!({"id": "node-2", "type": "end", "data": {}});
        h.oracle.push(id, json!({"reconstructedNodes": [node.clone(), node, two]}).to_string());

        h.run(1, &RetryPolicy::immediate(3)).await.unwrap();
        let calls = h.oracle.calls();
        assert!(calls[1].previous_error.as_deref().unwrap().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let h = harness(ScriptedOracle::new().with_responder(|_| Err(OracleError::Auth)));
        let err = h.run(0, &RetryPolicy::default()).await.unwrap_err();

        assert!(matches!(err, SectionError::ReconstructionFailed { attempts: 1, .. }));
        assert_eq!(h.oracle.call_count(SectionId::new(0)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout() {
        let oracle = ScriptedOracle::echo().with_delay(SectionId::new(0), Duration::from_secs(300));
        let h = harness(oracle);
        let policy = RetryPolicy::immediate(1);

        let err = h.run(0, &policy).await.unwrap_err();
        match err {
            SectionError::ReconstructionFailed { attempts, last_error, .. } => {
                assert_eq!(attempts, 2);
                assert!(last_error.starts_with("timeout"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_must_be_pending() {
        let h = harness(ScriptedOracle::echo());
        h.run(0, &RetryPolicy::default()).await.unwrap();
        let again = h.run(0, &RetryPolicy::default()).await;
        assert!(matches!(again, Err(SectionError::Transition(_))));
    }

    // ─── Section Contract ───

    #[test]
    fn test_metadata_contract() {
        let section = &make_sections()[0];
        let ok = validate_section_output(
            section,
            json!({"metadata": {"company": "acme", "name": "triage", "version": "0.1.2"}}),
        );
        assert!(matches!(ok, Ok(SectionOutput::Metadata(ref m)) if m.version == "0.1.2"));

        let bare = validate_section_output(section, json!({"company": "acme", "name": "triage", "version": "0.1.2"}));
        assert!(bare.is_ok());

        let err = validate_section_output(section, json!({"metadata": {"company": "acme", "name": "triage", "version": ""}}))
            .unwrap_err();
        assert_eq!(err, "metadata field 'version' missing or empty");
    }

    #[test]
    fn test_node_contract_required_fields() {
        let section = &make_sections()[1];
        let err = validate_section_output(
            section,
            json!([{"id": "node-1", "type": "question"}, {"id": "node-2", "type": "end", "data": {}}]),
        )
        .unwrap_err();
        assert_eq!(err, "node at index 0 missing required field 'data'");
    }

    #[test]
    fn test_node_contract_accepts_alternate_keys() {
        let sections = make_sections();
        let request = GenerationRequest {
            section: sections[1].clone(),
            new_version: "0.1.2".to_string(),
            attempt: 0,
            prompt: String::new(),
            previous_error: None,
        };
        let mut value: Value = serde_json::from_str(&echo_response(&request)).unwrap();
        let nodes = value["reconstructedNodes"].take();
        assert!(validate_section_output(&sections[1], json!({ "nodes": nodes.clone() })).is_ok());
        assert!(validate_section_output(&sections[1], nodes).is_ok());
    }

    #[test]
    fn test_node_contract_fixed_fields() {
        let section = &make_sections()[1];
        let retyped = validate_section_output(
            section,
            json!([
                {"id": "node-1", "type": "decision", "position": {"x": 0, "y": 0}, "data": {}},
                {"id": "node-2", "type": "terminal", "position": {"x": 100, "y": 0}, "data": {}}
            ]),
        )
        .unwrap_err();
        assert_eq!(retyped, "node node-1 changed type from 'question' to 'decision'");

        let moved = validate_section_output(
            section,
            json!([
                {"id": "node-1", "type": "question", "position": {"x": 0, "y": 0}, "data": {}},
                {"id": "node-2", "type": "terminal", "position": {"x": 5, "y": 0}, "data": {}}
            ]),
        )
        .unwrap_err();
        assert_eq!(moved, "node node-2 moved from (100, 0) to (5, 0)");
    }

    #[test]
    fn test_omitted_position_taken_from_input() {
        let section = &make_sections()[1];
        let output = validate_section_output(
            section,
            json!([
                {"id": "node-1", "type": "question", "data": {}},
                {"id": "node-2", "type": "terminal", "data": {}}
            ]),
        )
        .unwrap();
        let SectionOutput::Nodes(nodes) = output else {
            panic!("expected nodes");
        };
        assert_eq!(nodes[1].position, Position::new(100.0, 0.0));
    }

    #[tokio::test]
    async fn test_retyped_node_is_retried() {
        let h = harness(ScriptedOracle::echo());
        let id = SectionId::new(1);
        let bad = json!([
            {"id": "node-1", "type": "end", "position": {"x": 0, "y": 0}, "data": {}},
            {"id": "node-2", "type": "terminal", "position": {"x": 100, "y": 0}, "data": {}}
        ]);
        h.oracle.push(id, bad.to_string());

        h.run(1, &RetryPolicy::immediate(3)).await.unwrap();
        let calls = h.oracle.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].previous_error.as_deref().unwrap().contains("changed type"));
    }
}
