//! Suggestion oracle: the external generator that rewrites one section.
//!
//! The engine never talks to a model directly. It hands a [`GenerationRequest`]
//! to a [`SuggestionOracle`] and treats the returned text as untrusted input
//! that must pass extraction and the local section contract.

pub mod scripted;

#[cfg(feature = "http")]
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Section, SectionId};

/// Everything an oracle needs to rewrite one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Section being reconstructed.
    pub section: Section,
    /// Version stamped into this run.
    pub new_version: String,
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Fully rendered prompt text.
    pub prompt: String,
    /// Failure text from the previous attempt, also embedded in `prompt`.
    pub previous_error: Option<String>,
}

impl GenerationRequest {
    /// Section id shorthand.
    pub fn section_id(&self) -> SectionId {
        self.section.id()
    }
}

/// Error type for oracle calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// The call exceeded its deadline.
    #[error("Oracle call timed out after {0}s")]
    Timeout(u64),
    /// Network or transport failure.
    #[error("Oracle transport error: {0}")]
    Transport(String),
    /// Credentials rejected or no credit left.
    #[error("Oracle rejected credentials")]
    Auth,
    /// Provider throttled the call.
    #[error("Oracle rate limited")]
    RateLimited,
    /// Provider answered with something other than generated text.
    #[error("Oracle returned an invalid response: {0}")]
    InvalidResponse(String),
    /// Oracle is not configured (missing key, unknown endpoint).
    #[error("Oracle not configured: {0}")]
    NotConfigured(String),
}

impl OracleError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Credential and configuration failures repeat identically, so the
    /// reconstructor stops retrying on them.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth | Self::NotConfigured(_))
    }
}

/// Generates the rewritten content for one section.
///
/// Implementations must be safe to call concurrently for different sections.
#[async_trait]
pub trait SuggestionOracle: Send + Sync {
    /// Produce raw text for the request. The text is expected to contain JSON.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, OracleError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "oracle"
    }
}

pub use scripted::{echo_response, ScriptedOracle};

#[cfg(feature = "http")]
pub use http::{HttpOracle, HttpOracleConfig};
