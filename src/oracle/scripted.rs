//! Scripted oracle for testing.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::prompt::changelog_entry;
use crate::types::{Section, SectionId};
use super::{GenerationRequest, OracleError, SuggestionOracle};

type Responder = dyn Fn(&GenerationRequest) -> Result<String, OracleError> + Send + Sync;

/// Oracle that replays queued responses per section.
///
/// Queued responses are consumed first; once a section's queue is empty the
/// fallback responder (if any) answers. Every call is recorded.
#[derive(Default)]
pub struct ScriptedOracle {
    queued: Mutex<BTreeMap<SectionId, VecDeque<Result<String, OracleError>>>>,
    responder: Option<Box<Responder>>,
    delays: BTreeMap<SectionId, Duration>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl fmt::Debug for ScriptedOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedOracle")
            .field("queued_sections", &self.queued.lock().len())
            .field("has_responder", &self.responder.is_some())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl ScriptedOracle {
    /// Create an oracle with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an oracle that answers every request with [`echo_response`].
    pub fn echo() -> Self {
        Self::default().with_responder(|req| Ok(echo_response(req)))
    }

    /// Set the fallback responder.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, OracleError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Delay every answer for `section_id`.
    pub fn with_delay(mut self, section_id: SectionId, delay: Duration) -> Self {
        self.delays.insert(section_id, delay);
        self
    }

    /// Queue a text response for `section_id`.
    pub fn push(&self, section_id: SectionId, text: impl Into<String>) -> &Self {
        self.queued
            .lock()
            .entry(section_id)
            .or_default()
            .push_back(Ok(text.into()));
        self
    }

    /// Queue a failure for `section_id`.
    pub fn push_error(&self, section_id: SectionId, error: OracleError) -> &Self {
        self.queued
            .lock()
            .entry(section_id)
            .or_default()
            .push_back(Err(error));
        self
    }

    /// All recorded requests, in call order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }

    /// Number of calls made for one section.
    pub fn call_count(&self, section_id: SectionId) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.section_id() == section_id)
            .count()
    }
}

#[async_trait]
impl SuggestionOracle for ScriptedOracle {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, OracleError> {
        let section_id = request.section_id();
        self.calls.lock().push(request.clone());

        if let Some(delay) = self.delays.get(&section_id) {
            tokio::time::sleep(*delay).await;
        }

        let queued = self
            .queued
            .lock()
            .get_mut(&section_id)
            .and_then(VecDeque::pop_front);
        match (queued, &self.responder) {
            (Some(response), _) => response,
            (None, Some(responder)) => responder(request),
            (None, None) => Err(OracleError::NotConfigured(format!(
                "no scripted response for {section_id}"
            ))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A well-formed answer for any section.
///
/// Metadata sections echo company and name with the new version. Node sections
/// echo every node, appending a changelog entry to the description of each node
/// targeted by a relevant suggestion.
pub fn echo_response(request: &GenerationRequest) -> String {
    match &request.section {
        Section::Metadata(section) => {
            let mut metadata = section.metadata.clone();
            metadata.version = request.new_version.clone();
            json!({ "metadata": metadata }).to_string()
        }
        Section::Nodes(section) => {
            let nodes: Vec<Value> = section
                .nodes
                .iter()
                .map(|node| {
                    let mut node = node.clone();
                    for suggestion in section
                        .relevant_suggestions
                        .iter()
                        .filter(|s| s.target_node() == Some(&node.id))
                    {
                        let entry = changelog_entry(
                            &request.new_version,
                            &suggestion.title,
                            suggestion.target_field().unwrap_or("data"),
                            &suggestion.description,
                            &suggestion.id,
                        );
                        let description = &mut node.data.description;
                        if description.is_empty() {
                            *description = entry;
                        } else {
                            description.push_str("\n\n");
                            description.push_str(&entry);
                        }
                    }
                    json!(node)
                })
                .collect();
            json!({ "reconstructedNodes": nodes }).to_string()
        }
    }
}
