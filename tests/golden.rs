//! Golden tests for the reconstruction engine.
//!
//! These tests drive the full pipeline with a scripted oracle and a recording
//! clock, so retries never sleep for real.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use protocol_reconstructor::oracle::echo_response;
use protocol_reconstructor::{
    canonical_digest, to_canonical_bytes, Assembler, CrossReferenceValidator, Document,
    DocumentPartitioner, Edge, EngineConfig, GenerationRequest, Metadata, Node, NodeId, NodeKind,
    OracleError, Position, ProgressTracker, ReconstructionEngine, ReconstructionError,
    RecordingClock, RetryPolicy, ScriptedOracle, Section, SectionId, SectionOutput,
    SectionReconstructor, SectionStatus, Suggestion,
};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn node(i: usize, x: f64) -> Node {
    Node::new(format!("node-{i}"), NodeKind::Question, Position::new(x, 0.0))
        .with_description(format!("Step {i}"))
}

/// `n` nodes chained by edges, positions increasing with the index.
fn linear_document(n: usize) -> Document {
    let nodes = (1..=n).map(|i| node(i, i as f64 * 100.0)).collect();
    let edges = (1..n)
        .map(|i| Edge::new(format!("e{i}"), format!("node-{i}"), format!("node-{}", i + 1)))
        .collect();
    Document::new(Metadata::new("acme", "chest-pain", "0.1.1"), nodes, edges)
}

fn engine_with(oracle: Arc<ScriptedOracle>, config: EngineConfig, clock: Arc<RecordingClock>) -> ReconstructionEngine {
    ReconstructionEngine::new(oracle, config).with_clock(clock)
}

fn echo_engine() -> ReconstructionEngine {
    engine_with(
        Arc::new(ScriptedOracle::echo()),
        EngineConfig::default(),
        Arc::new(RecordingClock::new()),
    )
}

/// Echo answer with the last node removed for `section`.
fn drop_last_node_in(section: SectionId) -> impl Fn(&GenerationRequest) -> Result<String, OracleError> {
    move |request| {
        let mut value: Value = serde_json::from_str(&echo_response(request))
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
        if request.section_id() == section {
            if let Some(nodes) = value["reconstructedNodes"].as_array_mut() {
                nodes.pop();
            }
        }
        Ok(value.to_string())
    }
}

fn completed(id: usize, output: SectionOutput) -> (SectionId, SectionStatus) {
    let mut status = SectionStatus::pending(SectionId::new(id), output.kind());
    status.start().unwrap();
    status.complete(output).unwrap();
    (SectionId::new(id), status)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_nodes_no_suggestions() {
    let doc = linear_document(2);

    let sections = DocumentPartitioner::default().partition(&doc, &[]);
    assert_eq!(sections.len(), 2);
    assert!(matches!(sections[0], Section::Metadata(_)));
    let group = sections[1].as_nodes().unwrap();
    assert_eq!(group.nodes.len(), 2);

    let result = echo_engine().reconstruct(&doc, &[]).await.unwrap();
    assert_eq!(to_canonical_bytes(&result.document.nodes), to_canonical_bytes(&doc.nodes));
    assert_eq!(result.document.edges, doc.edges);
    assert!(result.change_records.is_empty());
    assert_eq!(result.verification_summary().verification_rate, 1.0);
    assert!(result.validation_passed);
}

#[tokio::test]
async fn test_malformed_twice_then_valid() {
    let doc = linear_document(2);
    let sections = DocumentPartitioner::default().partition(&doc, &[]);
    let tracker = ProgressTracker::new(&sections);
    let section = &sections[1];

    let oracle = Arc::new(ScriptedOracle::echo());
    oracle.push(section.id(), "I'm sorry, here is the protocol:");
    oracle.push(section.id(), "Unable to comply right now.");
    let clock = Arc::new(RecordingClock::new());
    let reconstructor = SectionReconstructor::new(oracle.clone(), clock.clone());

    let policy = RetryPolicy::default();
    let handle = tracker.handle(section.id()).unwrap();
    let output = reconstructor.reconstruct(section, "0.1.2", &policy, &handle).await.unwrap();

    assert!(matches!(output, SectionOutput::Nodes(ref nodes) if nodes.len() == 2));
    let status = tracker.status(section.id()).unwrap();
    assert!(status.is_completed());
    assert_eq!(status.retry_count, 2);
    assert_eq!(oracle.call_count(section.id()), 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);

    let calls = oracle.calls();
    assert!(calls[0].previous_error.is_none());
    assert!(calls[2].previous_error.as_deref().unwrap().contains("malformed JSON"));
}

#[tokio::test]
async fn test_missing_node_exhausts_retries() {
    // 6 nodes at 3 per section: section_1 = node-1..3, section_2 = node-4..6
    let doc = linear_document(6);
    let oracle = Arc::new(ScriptedOracle::new().with_responder(drop_last_node_in(SectionId::new(2))));
    let clock = Arc::new(RecordingClock::new());
    let engine = engine_with(oracle.clone(), EngineConfig::default(), clock.clone());

    let err = engine.reconstruct(&doc, &[]).await.unwrap_err();
    match &err {
        ReconstructionError::SectionReconstructionFailed { section_id, attempts, last_error } => {
            assert_eq!(*section_id, SectionId::new(2));
            assert_eq!(*attempts, 4);
            assert!(last_error.contains("node id mismatch"), "{last_error}");
            assert!(last_error.contains("node-6"), "{last_error}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.code(), "SECTION_RECONSTRUCTION_FAILED");

    // Retry bound: max_retries + 1 calls, 1 s / 2 s / 4 s backoff
    assert_eq!(oracle.call_count(SectionId::new(2)), 4);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
    );
}

#[tokio::test]
async fn test_two_suggestions_on_one_node() {
    let doc = linear_document(6);
    let suggestions = vec![
        Suggestion::new("sug_01", "Ask about allergies").at("node-5", "questions"),
        Suggestion::new("sug_02", "Clarify wording").at("node-5", "description"),
    ];

    let result = echo_engine().reconstruct(&doc, &suggestions).await.unwrap();

    assert_eq!(result.change_records.len(), 2);
    for record in &result.change_records {
        assert_eq!(record.node_id, Some(NodeId::from("node-5")));
        assert!(record.verified);
        assert!(record.has_changelog);
    }
    assert_eq!(result.change_records[0].target_field, "questions");
    assert_eq!(result.change_records[1].target_field, "description");

    let description = &result.document.node(&NodeId::from("node-5")).unwrap().data.description;
    assert!(description.starts_with("Step 5\n\n[CHANGELOG v0.1.2]: Ask about allergies"));
    assert!(description.contains("- Suggestion ID: sug_02"));
}

#[test]
fn test_dangling_edge_dropped_not_reraised() {
    let mut nodes: Vec<Node> = (1..=10).map(|i| node(i, i as f64)).collect();
    let original = Document::new(
        Metadata::new("acme", "chest-pain", "0.1.1"),
        nodes.clone(),
        vec![Edge::new("e1", "node-1", "node-2"), Edge::new("e9", "node-9", "node-10")],
    );

    // Fault injection: node-10 comes back under another id.
    nodes[9].id = NodeId::from("node-10-renamed");
    let statuses: BTreeMap<_, _> = [
        completed(0, SectionOutput::Metadata(Metadata::new("acme", "chest-pain", "0.1.2"))),
        completed(1, SectionOutput::Nodes(nodes)),
    ]
    .into_iter()
    .collect();

    let assembly = Assembler::default().assemble(&original, &statuses, "0.1.2").unwrap();
    assert_eq!(assembly.dropped_edges, 1);
    assert_eq!(assembly.document.edges.len(), 1);

    let warnings = CrossReferenceValidator::default().validate(&assembly.document);
    assert!(warnings.iter().all(|w| !w.contains("node-10")), "{warnings:?}");
}

// ─────────────────────────────────────────────────────────────────────────────
// Determinism
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_concurrency_does_not_change_output() {
    // Positions run right to left so assembly must reorder.
    let nodes = (1..=9).map(|i| node(i, (10 - i) as f64 * 10.0)).collect();
    let doc = Document::new(Metadata::new("acme", "sepsis", "2.3.9"), nodes, vec![Edge::new("e1", "node-1", "node-9")]);
    let suggestions = vec![Suggestion::new("sug_01", "Add lactate").at("node-4", "questions")];

    let sequential = echo_engine().reconstruct(&doc, &suggestions).await.unwrap();

    let slow_first = ScriptedOracle::echo()
        .with_delay(SectionId::new(1), Duration::from_millis(300))
        .with_delay(SectionId::new(2), Duration::from_millis(100));
    let config = EngineConfig {
        max_concurrency: 4,
        ..EngineConfig::default()
    };
    let concurrent = engine_with(Arc::new(slow_first), config, Arc::new(RecordingClock::new()))
        .reconstruct(&doc, &suggestions)
        .await
        .unwrap();

    assert_eq!(sequential.metadata.document_digest, concurrent.metadata.document_digest);
    assert_eq!(to_canonical_bytes(&sequential.document), to_canonical_bytes(&concurrent.document));
    assert_ne!(sequential.metadata.config_hash, concurrent.metadata.config_hash);

    let ids: Vec<_> = concurrent.document.nodes.iter().map(|n| n.id.as_str().to_string()).collect();
    let expected: Vec<_> = (1..=9).rev().map(|i| format!("node-{i}")).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_repeated_runs_same_digest() {
    let doc = linear_document(7);
    let suggestions = vec![Suggestion::new("sug_01", "x").at("node-7", "description")];
    let engine = echo_engine();

    let first = engine.reconstruct(&doc, &suggestions).await.unwrap();
    let second = engine.reconstruct(&doc, &suggestions).await.unwrap();

    assert_ne!(first.metadata.run_id, second.metadata.run_id);
    assert_eq!(first.metadata.document_digest, second.metadata.document_digest);
    assert_eq!(first.metadata.document_digest, canonical_digest(&second.document));
}

// ─────────────────────────────────────────────────────────────────────────────
// Warnings
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_identifier_becomes_warning() {
    let mut doc = linear_document(3);
    doc.nodes[1] = doc.nodes[1].clone().with_condition("idade > 65");

    let result = echo_engine().reconstruct(&doc, &[]).await.unwrap();
    assert!(!result.validation_passed);
    assert_eq!(
        result.validation_warnings,
        vec!["node-2.conditionalExpression: Unknown identifier: 'idade'".to_string()]
    );
}

#[tokio::test]
async fn test_document_from_json_round_trips_unknown_fields() {
    let raw = r#"{
        "metadata": {"company": "acme", "name": "triage", "version": "v0.4.0", "locale": "pt-BR"},
        "nodes": [
            {"id": "node-1", "type": "custom", "position": {"x": 0, "y": 0},
             "data": {"descricao": "Inicio", "questions": [
                {"id": "q1", "uid": "febre", "type": "boolean"}
             ]}},
            {"id": "node-2", "type": "end", "position": {"x": 200, "y": 0},
             "data": {"description": "Fim", "conditionalExpression": "febre == True"}}
        ],
        "edges": [{"id": "e1", "source": "node-1", "target": "node-2"}],
        "viewport": {"zoom": 1}
    }"#;
    let doc = Document::from_json(raw).unwrap();

    let result = echo_engine().reconstruct(&doc, &[]).await.unwrap();
    assert_eq!(result.document.metadata.version, "0.4.1");
    assert_eq!(result.document.metadata.extra["locale"], "pt-BR");
    assert_eq!(result.document.extra["viewport"]["zoom"], 1);
    assert!(result.validation_passed, "{:?}", result.validation_warnings);
}

#[tokio::test]
async fn test_node_types_and_positions_survive_reconstruction() {
    let kinds = ["question", "custom", "decision", "action", "conduct", "end", "summary", "terminal"];
    let nodes: Vec<Value> = kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            serde_json::json!({
                "id": format!("node-{}", i + 1),
                "type": kind,
                "position": {"x": (i + 1) * 100, "y": 40},
                "data": {"description": format!("Step {}", i + 1)}
            })
        })
        .collect();
    let raw = serde_json::json!({
        "metadata": {"company": "acme", "name": "triage", "version": "0.2.0"},
        "nodes": nodes,
        "edges": []
    });
    let doc = Document::from_json(&raw.to_string()).unwrap();

    let result = echo_engine().reconstruct(&doc, &[]).await.unwrap();

    let output = serde_json::to_value(&result.document).unwrap();
    let types: Vec<&str> = output["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["type"].as_str().unwrap())
        .collect();
    assert_eq!(types, kinds);
    assert_eq!(output["nodes"][0]["position"], serde_json::json!({"x": 100, "y": 40}));
    assert_eq!(output["nodes"][7]["position"]["x"].to_string(), "800");
}

#[tokio::test]
async fn test_duplicate_node_ids_fail_fast() {
    let mut doc = linear_document(3);
    doc.nodes.push(node(1, 50.0));
    let oracle = Arc::new(ScriptedOracle::echo());
    let clock = Arc::new(RecordingClock::new());
    let engine = engine_with(oracle.clone(), EngineConfig::default(), clock.clone());

    let err = engine.reconstruct(&doc, &[]).await.unwrap_err();

    assert_eq!(err.code(), "DUPLICATE_NODE_ID");
    assert_eq!(err.to_string(), "Invalid document: duplicate node id(s): node-1");
    assert!(oracle.calls().is_empty());
    assert!(clock.sleeps().is_empty());

    let text = serde_json::to_string(&doc).unwrap();
    assert!(Document::from_json(&text).is_err());
}
