//! Post-assembly cross-reference checks. Never fails; everything is a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::types::{Document, CONDITIONAL_EXPRESSION_FIELD};
use super::{BasicExpressionValidator, ExpressionValidator, KnownSymbols};

/// Checks references between questions, expressions and edges.
///
/// Order of checks:
/// 1. duplicate question uids across the document
/// 2. every non-empty conditional expression, via the [`ExpressionValidator`]
/// 3. edge endpoints
#[derive(Clone)]
pub struct CrossReferenceValidator {
    expressions: Arc<dyn ExpressionValidator>,
}

impl std::fmt::Debug for CrossReferenceValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossReferenceValidator").finish_non_exhaustive()
    }
}

impl Default for CrossReferenceValidator {
    fn default() -> Self {
        Self::new(Arc::new(BasicExpressionValidator))
    }
}

impl CrossReferenceValidator {
    /// Create a validator delegating expressions to `expressions`.
    pub fn new(expressions: Arc<dyn ExpressionValidator>) -> Self {
        Self { expressions }
    }

    /// Collect warnings for `document`.
    pub fn validate(&self, document: &Document) -> Vec<String> {
        let mut warnings = Vec::new();

        let mut uid_owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (node, question) in document.questions() {
            if !question.uid.is_empty() {
                uid_owners.entry(question.uid.as_str()).or_default().push(node.id.as_str());
            }
        }
        for (uid, owners) in uid_owners.iter().filter(|(_, owners)| owners.len() > 1) {
            warnings.push(format!("Duplicate question uid '{uid}' in nodes {}", owners.join(", ")));
        }

        let known = KnownSymbols::from_document(document);
        for node in &document.nodes {
            if let Some(expr) = non_empty(node.data.conditional_expression.as_deref()) {
                self.check_expression(&format!("{}.{CONDITIONAL_EXPRESSION_FIELD}", node.id), expr, &known, &mut warnings);
            }
            for question in &node.data.questions {
                if let Some(expr) = non_empty(question.conditional_expression.as_deref()) {
                    let context = format!("{}.{}.{CONDITIONAL_EXPRESSION_FIELD}", node.id, question.id);
                    self.check_expression(&context, expr, &known, &mut warnings);
                }
            }
        }

        let node_ids: BTreeSet<&str> = document.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &document.edges {
            for (end, id) in [("source", &edge.source), ("target", &edge.target)] {
                if !node_ids.contains(id.as_str()) {
                    warnings.push(format!("Edge {} references missing {end} node {id}", edge.id));
                }
            }
        }

        if !warnings.is_empty() {
            tracing::warn!(count = warnings.len(), "Cross-reference validation produced warnings");
        }
        warnings
    }

    fn check_expression(&self, context: &str, expression: &str, known: &KnownSymbols, warnings: &mut Vec<String>) {
        let check = self.expressions.validate_expression(expression, known);
        if !check.ok {
            tracing::warn!(context, expression, "Rejected conditional expression");
        }
        warnings.extend(check.diagnostics.into_iter().map(|d| format!("{context}: {d}")));
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}
