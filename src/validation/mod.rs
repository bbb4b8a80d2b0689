//! Document validation.
//!
//! Two seams, each with a reference implementation:
//!
//! | Trait | Default | Failure mode |
//! |-------|---------|--------------|
//! | [`ExpressionValidator`] | [`BasicExpressionValidator`] | diagnostics, never fails the run |
//! | [`SchemaValidator`] | [`StructuralSchemaValidator`] | [`SchemaError`], fatal at assembly |
//!
//! [`CrossReferenceValidator`] runs after assembly and only produces warnings.

pub mod cross_reference;
pub mod expression;
pub mod schema;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::Document;

/// Names a conditional expression may legitimately reference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KnownSymbols {
    /// Question uids, referenced as bare identifiers.
    pub uids: BTreeSet<String>,
    /// Option ids, referenced as string literals.
    pub option_ids: BTreeSet<String>,
}

impl KnownSymbols {
    /// Collect every question uid and option id in `document`.
    pub fn from_document(document: &Document) -> Self {
        let mut known = Self::default();
        for (_, question) in document.questions() {
            if !question.uid.trim().is_empty() {
                known.uids.insert(question.uid.clone());
            }
            known.option_ids.extend(
                question
                    .options
                    .iter()
                    .filter(|o| !o.id.trim().is_empty())
                    .map(|o| o.id.clone()),
            );
        }
        known
    }
}

/// Outcome of checking one expression.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpressionCheck {
    /// False when the expression is unsafe or does not parse.
    pub ok: bool,
    /// Rejections and warnings, in the order found.
    pub diagnostics: Vec<String>,
}

impl ExpressionCheck {
    /// A passing check with no diagnostics.
    pub fn clean() -> Self {
        Self {
            ok: true,
            diagnostics: Vec::new(),
        }
    }

    /// A failing check.
    pub fn rejected(diagnostics: Vec<String>) -> Self {
        Self { ok: false, diagnostics }
    }
}

/// Checks conditional expressions without evaluating them.
pub trait ExpressionValidator: Send + Sync {
    /// Check one expression.
    ///
    /// Must reject function calls, imports and assignments, and must flag
    /// identifiers absent from `known`.
    fn validate_expression(&self, expression: &str, known: &KnownSymbols) -> ExpressionCheck;
}

/// Structural check of a whole document.
pub trait SchemaValidator: Send + Sync {
    /// Validate `document`.
    fn validate(&self, document: &Document) -> Result<(), SchemaError>;
}

pub use cross_reference::CrossReferenceValidator;
pub use expression::BasicExpressionValidator;
pub use schema::{SchemaError, StructuralSchemaValidator};
