//! Prompt rendering for section requests.
//!
//! Prompts are plain text; the oracle decides how to ship them. Each prompt
//! states the exact JSON shape the local contract will check, and a retry
//! prompt repeats the previous failure so the oracle can correct it.

use std::fmt::Write as _;

use crate::canonical::to_pretty_string;
use crate::types::{MetadataSection, NodeSection, Section, Suggestion};

/// Changelog marker prefix looked for by the change verifier.
pub const CHANGELOG_MARKER: &str = "[CHANGELOG";

/// Render the prompt for one section attempt.
pub fn build_prompt(section: &Section, new_version: &str, previous_error: Option<&str>) -> String {
    let mut prompt = match section {
        Section::Metadata(s) => metadata_prompt(s, new_version),
        Section::Nodes(s) => nodes_prompt(s, new_version),
    };
    if let Some(error) = previous_error {
        push_corrective_context(&mut prompt, error);
    }
    prompt
}

/// Changelog entry appended to a modified node's description.
pub fn changelog_entry(new_version: &str, summary: &str, changed: &str, reason: &str, suggestion_id: &str) -> String {
    format!(
        "{CHANGELOG_MARKER} v{new_version}]: {summary}\n- Changed: {changed}\n- Reason: {reason}\n- Suggestion ID: {suggestion_id}"
    )
}

fn metadata_prompt(section: &MetadataSection, new_version: &str) -> String {
    let mut prompt = String::from(
        "You are updating the metadata of a clinical decision-tree protocol.\n\n",
    );
    let _ = writeln!(prompt, "CURRENT METADATA:\n{}\n", to_pretty_string(&section.metadata));
    let _ = writeln!(prompt, "INSTRUCTIONS:");
    let _ = writeln!(prompt, "1. Set \"version\" to exactly \"{new_version}\"");
    let _ = writeln!(prompt, "2. Keep \"company\" and \"name\" unchanged");
    let _ = writeln!(prompt, "3. Keep every other field unchanged\n");
    let _ = writeln!(prompt, "OUTPUT FORMAT:");
    let _ = writeln!(prompt, "{{\"metadata\": {{\"company\": ..., \"name\": ..., \"version\": \"{new_version}\", ...}}}}\n");
    prompt.push_str("Return ONLY the JSON object. No markdown, no explanations.\n");
    prompt
}

fn nodes_prompt(section: &NodeSection, new_version: &str) -> String {
    let ids: Vec<&str> = section.node_ids.iter().map(|id| id.as_str()).collect();

    let mut prompt = String::from(
        "You are applying approved improvement suggestions to part of a clinical decision-tree protocol.\n\n",
    );
    let _ = writeln!(prompt, "NODES TO RECONSTRUCT ({}):\n{}\n", ids.len(), to_pretty_string(&section.nodes));
    let _ = writeln!(
        prompt,
        "CONNECTED EDGES (read-only context, do not return them):\n{}\n",
        to_pretty_string(&section.edges)
    );

    if section.relevant_suggestions.is_empty() {
        prompt.push_str("SUGGESTIONS TO APPLY: none. Return the nodes unchanged.\n\n");
    } else {
        prompt.push_str("SUGGESTIONS TO APPLY:\n");
        for (i, suggestion) in section.relevant_suggestions.iter().enumerate() {
            push_suggestion(&mut prompt, i + 1, suggestion);
        }
        prompt.push('\n');
    }

    let _ = writeln!(prompt, "INSTRUCTIONS:");
    let _ = writeln!(prompt, "1. Return exactly these node ids: {}", ids.join(", "));
    let _ = writeln!(prompt, "2. Keep every node's id, type and position unchanged");
    let _ = writeln!(prompt, "3. Modify only the \"data\" of nodes targeted by a suggestion");
    let _ = writeln!(prompt, "4. Do not add or remove nodes\n");
    let _ = writeln!(prompt, "For EVERY modified node, append a changelog entry to data.description, after a blank line:");
    let _ = writeln!(
        prompt,
        "{}\n",
        changelog_entry(new_version, "<summary of what changed>", "<specific detail>", "<reason from the suggestion>", "<suggestion id>")
    );
    let _ = writeln!(prompt, "OUTPUT FORMAT:");
    let _ = writeln!(prompt, "{{\"reconstructedNodes\": [<node>, ...]}}\n");
    prompt.push_str("Return ONLY the JSON object. No markdown, no explanations.\n");
    prompt
}

fn push_suggestion(prompt: &mut String, n: usize, suggestion: &Suggestion) {
    let _ = writeln!(
        prompt,
        "{n}. [{}] {} - {}\n   Title: {}\n   Description: {}\n   Location: node {} field {}",
        suggestion.id,
        or_na(&suggestion.category),
        or_na(&suggestion.priority),
        or_na(&suggestion.title),
        or_na(&suggestion.description),
        suggestion.target_node().map(|id| id.as_str()).unwrap_or("N/A"),
        suggestion.target_field().unwrap_or("N/A"),
    );
    if let Some(proposed) = &suggestion.implementation_path.proposed_value {
        let _ = writeln!(prompt, "   Proposed value: {proposed}");
    }
    if !suggestion.evidence.playbook_reference.is_empty() {
        let _ = writeln!(prompt, "   Evidence: {}", suggestion.evidence.playbook_reference);
    }
}

fn push_corrective_context(prompt: &mut String, error: &str) {
    let _ = write!(
        prompt,
        "\nPREVIOUS ATTEMPT FAILED:\n{error}\nFix this problem in your answer. Follow the output format exactly.\n"
    );
}

fn or_na(s: &str) -> &str {
    if s.trim().is_empty() {
        "N/A"
    } else {
        s
    }
}
